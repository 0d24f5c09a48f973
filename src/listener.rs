//! Listener traits for lifecycle events.

use crate::context::EventContext;
use crate::error::LifecycleError;

/// A generic lifecycle listener, notified of application start and exit.
///
/// Implementations are held as `Arc<dyn LifecycleListener>` and may be
/// invoked from whichever thread triggers the dispatch, so they must be
/// `Send + Sync`. Callbacks default to doing nothing.
pub trait LifecycleListener: Send + Sync {
    /// Human-readable listener name, used in log and error messages.
    fn name(&self) -> &str;

    /// Called when the application starts.
    ///
    /// A listener registered after start has already happened receives this
    /// callback once, immediately on registration, with the context of the
    /// original start.
    fn on_start(&self, context: &EventContext) -> Result<(), LifecycleError> {
        let _ = context;
        Ok(())
    }

    /// Called when the application exits.
    fn on_exit(&self, context: &EventContext) -> Result<(), LifecycleError> {
        let _ = context;
        Ok(())
    }
}

/// An environment-scoped listener, notified of environment init and shutdown.
///
/// Environment listeners may flag an init failure as severe via
/// [`LifecycleError::severe`], which aborts the whole init dispatch. Shutdown
/// failures are never propagated.
pub trait EnvironmentListener: Send + Sync {
    /// Human-readable listener name, used in log and error messages.
    fn name(&self) -> &str;

    /// Called when the environment is initialized.
    ///
    /// A listener registered after the environment is already initialized
    /// receives this callback once, immediately on registration.
    fn on_environment_init(&self) -> Result<(), LifecycleError> {
        Ok(())
    }

    /// Called when the environment shuts down.
    fn on_environment_shutdown(&self) -> Result<(), LifecycleError> {
        Ok(())
    }
}
