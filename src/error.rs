//! Error types for lifecycle dispatch operations.

use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// An error reported by a listener callback.
///
/// Listeners flag an error as severe when the failure is unrecoverable and
/// the current dispatch must not continue. Non-severe errors are logged by
/// the dispatcher and dispatch moves on to the remaining listeners (where the
/// operation allows it).
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct LifecycleError {
    message: String,
    severe: bool,
}

impl LifecycleError {
    /// Create a non-severe listener error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severe: false,
        }
    }

    /// Create a severe listener error, mandating abort of the current dispatch.
    pub fn severe(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severe: true,
        }
    }

    /// Whether this error aborts the dispatch it occurred in.
    pub fn is_severe(&self) -> bool {
        self.severe
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors surfaced by the dispatcher and its collaborators.
#[derive(Error, Debug)]
pub enum Error {
    /// A plugin could not be turned into a listener object.
    ///
    /// Returned by [`PluginRegistry`](crate::PluginRegistry) instantiation;
    /// the dispatcher logs it and skips the plugin, it never propagates.
    #[error("failed to instantiate listener for plugin {plugin}: {reason}")]
    Instantiation {
        /// Plugin that failed to instantiate.
        plugin: String,
        /// Why instantiation failed.
        reason: String,
    },

    /// A listener callback failed during start or exit dispatch.
    #[error("lifecycle listener {listener} failed: {source}")]
    Listener {
        /// Name of the failing listener.
        listener: String,
        /// The error the listener reported.
        #[source]
        source: LifecycleError,
    },

    /// A severe or unexpected failure aborted environment-init dispatch.
    #[error("environment init aborted by listener {listener}: {message}")]
    Fatal {
        /// Name of the failing listener.
        listener: String,
        /// Description of the failure.
        message: String,
        /// The severe listener error, if the failure was one.
        #[source]
        source: Option<LifecycleError>,
    },
}

impl Error {
    /// Create an instantiation error.
    pub fn instantiation(plugin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Instantiation {
            plugin: plugin.into(),
            reason: reason.into(),
        }
    }

    /// Create a listener error.
    pub fn listener(listener: impl Into<String>, source: LifecycleError) -> Self {
        Self::Listener {
            listener: listener.into(),
            source,
        }
    }

    /// Create a fatal error from a severe listener error.
    pub fn fatal(listener: impl Into<String>, source: LifecycleError) -> Self {
        Self::Fatal {
            listener: listener.into(),
            message: source.message().to_string(),
            source: Some(source),
        }
    }

    /// Create a fatal error from an unexpected failure (e.g. a panic).
    pub fn fatal_unexpected(listener: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fatal {
            listener: listener.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Returns true if this error aborted an environment-init dispatch.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}
