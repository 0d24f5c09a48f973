//! # plugin-lifecycle
//!
//! Lifecycle event dispatcher for plugin listeners with live registry
//! subscription and late-join delivery.
//!
//! This crate provides:
//! - **Listener Discovery** - Instantiate listeners from an external plugin registry
//! - **Live Subscription** - Track plugin add/remove churn for the life of the process
//! - **Event Fan-out** - Dispatch environment-init, environment-shutdown, start, and exit
//! - **Late-join Delivery** - Replay start/init to listeners registered after the fact
//! - **Failure Isolation** - Per-listener failure handling with severity-aware abort
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use plugin_lifecycle::{EventContext, LifecycleDispatcher};
//!
//! // Wire the dispatcher to the host's registry and environment state
//! let dispatcher = LifecycleDispatcher::new(registry, environment);
//!
//! // Fan out lifecycle events
//! dispatcher.on_environment_init()?;
//! dispatcher.on_start(EventContext::new(session))?;
//! // ...
//! dispatcher.on_exit(EventContext::empty())?;
//! dispatcher.on_environment_shutdown();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod context;
mod dispatcher;
mod error;
mod listener;
mod registry;
mod subscribers;

pub use context::EventContext;
pub use dispatcher::LifecycleDispatcher;
pub use error::{Error, LifecycleError, Result};
pub use listener::{EnvironmentListener, LifecycleListener};
pub use registry::{EnvironmentState, PluginHandle, PluginKind, PluginRegistry, RegistryEvents};
pub use subscribers::SubscriberSet;

/// Crate version for compatibility checks.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
