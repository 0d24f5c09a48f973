//! Collaborator contracts for plugin discovery and environment state.
//!
//! The dispatcher never loads plugin code itself. It queries an external
//! [`PluginRegistry`] for registered plugins, asks it to instantiate their
//! listener objects, and subscribes for add/remove/change notifications so
//! its subscriber sets stay current for the life of the process. All
//! collaborators are injected trait objects, which keeps the dispatcher free
//! of process-wide statics and straightforward to test with in-memory
//! doubles.

use std::sync::Arc;

use crate::error::Result;
use crate::listener::{EnvironmentListener, LifecycleListener};

/// The two kinds of lifecycle plugin the registry can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    /// Generic lifecycle plugins, instantiated as [`LifecycleListener`].
    Lifecycle,
    /// Environment-scoped plugins, instantiated as [`EnvironmentListener`].
    Environment,
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Lifecycle => "lifecycle",
            Self::Environment => "environment",
        };
        write!(f, "{}", name)
    }
}

/// Opaque descriptor for a registered plugin.
///
/// The `id` is the registry's stable identity for the plugin; it is the key
/// used for subscriber-set membership and for removal notifications. The
/// `name` is human-readable and only used in log messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PluginHandle {
    id: String,
    name: String,
}

impl PluginHandle {
    /// Create a plugin handle.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Stable plugin identity.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable plugin name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for PluginHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Callback interface for registry change notifications.
///
/// The registry invokes these from its own notification thread(s), possibly
/// concurrently with dispatch running on an application thread.
pub trait RegistryEvents: Send + Sync {
    /// A plugin of the subscribed kind was registered.
    fn plugin_added(&self, handle: &PluginHandle);

    /// A plugin of the subscribed kind was unregistered.
    fn plugin_removed(&self, handle: &PluginHandle);

    /// A plugin of the subscribed kind changed. Reserved.
    fn plugin_changed(&self, handle: &PluginHandle) {
        let _ = handle;
    }
}

/// External plugin registry the dispatcher discovers listeners from.
pub trait PluginRegistry: Send + Sync {
    /// All currently-registered plugins of the given kind.
    fn plugins(&self, kind: PluginKind) -> Vec<PluginHandle>;

    /// Instantiate a plugin's listener object as a [`LifecycleListener`].
    fn instantiate_lifecycle(&self, handle: &PluginHandle) -> Result<Arc<dyn LifecycleListener>>;

    /// Instantiate a plugin's listener object as an [`EnvironmentListener`].
    fn instantiate_environment(&self, handle: &PluginHandle)
        -> Result<Arc<dyn EnvironmentListener>>;

    /// Subscribe to change notifications for plugins of the given kind.
    ///
    /// The registry owns the callback and keeps invoking it for the life of
    /// the process.
    fn subscribe(&self, kind: PluginKind, events: Box<dyn RegistryEvents>);
}

/// External environment state the dispatcher consults for late-join delivery.
pub trait EnvironmentState: Send + Sync {
    /// Whether the environment has already been initialized.
    fn is_initialized(&self) -> bool;
}
