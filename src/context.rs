//! Opaque event context forwarded to listeners.

use std::any::Any;
use std::sync::Arc;

/// Opaque value handed to every listener on start and exit dispatch.
///
/// The dispatcher never inspects the payload; it forwards the context
/// unchanged and keeps a copy of the most recent start context so listeners
/// registered after start still observe it. Cloning is cheap (an `Arc`
/// bump).
#[derive(Clone)]
pub struct EventContext {
    payload: Arc<dyn Any + Send + Sync>,
}

impl EventContext {
    /// Wrap an arbitrary payload in a context.
    pub fn new<T: Any + Send + Sync>(payload: T) -> Self {
        Self {
            payload: Arc::new(payload),
        }
    }

    /// Create a context with no payload.
    pub fn empty() -> Self {
        Self::new(())
    }

    /// Borrow the payload if it is of type `T`.
    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.payload.downcast_ref()
    }

    /// Whether two contexts share the same payload.
    pub fn same_payload(&self, other: &EventContext) -> bool {
        Arc::ptr_eq(&self.payload, &other.payload)
    }
}

impl Default for EventContext {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for EventContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventContext").finish_non_exhaustive()
    }
}
