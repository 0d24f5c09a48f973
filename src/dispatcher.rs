//! Lifecycle event fan-out to plugin listeners.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::context::EventContext;
use crate::error::{Error, LifecycleError, Result};
use crate::listener::{EnvironmentListener, LifecycleListener};
use crate::registry::{EnvironmentState, PluginHandle, PluginKind, PluginRegistry, RegistryEvents};
use crate::subscribers::SubscriberSet;

/// State shared between the dispatcher and its registry subscriptions.
struct Shared {
    lifecycle: SubscriberSet<dyn LifecycleListener>,
    environment: SubscriberSet<dyn EnvironmentListener>,
    started: AtomicBool,
    last_start_context: RwLock<Option<EventContext>>,
}

/// Fans lifecycle events out to plugin-provided listeners.
///
/// The dispatcher discovers listeners from an external [`PluginRegistry`] at
/// construction and subscribes for plugin churn, so its subscriber sets stay
/// current for the life of the process. Listeners that join late still
/// observe consistent state: one added after [`on_start`](Self::on_start)
/// has run receives a synthetic start callback with the recorded context,
/// and one added after the environment is initialized receives a synthetic
/// environment-init callback.
///
/// All dispatch runs synchronously on the calling thread; the dispatcher
/// creates no threads of its own. Registry notifications may mutate the
/// subscriber sets concurrently with an in-progress dispatch, which iterates
/// a snapshot and so may or may not observe the mutation.
pub struct LifecycleDispatcher {
    shared: Arc<Shared>,
    registry: Arc<dyn PluginRegistry>,
}

impl LifecycleDispatcher {
    /// Create a dispatcher wired to the given registry and environment state.
    ///
    /// Every already-registered plugin of both kinds is instantiated up
    /// front; a plugin that fails to instantiate is logged and skipped,
    /// never aborting construction. The dispatcher then subscribes to the
    /// registry for both kinds so later registrations and removals keep the
    /// subscriber sets current.
    pub fn new(registry: Arc<dyn PluginRegistry>, environment: Arc<dyn EnvironmentState>) -> Self {
        let shared = Arc::new(Shared {
            lifecycle: SubscriberSet::new(),
            environment: SubscriberSet::new(),
            started: AtomicBool::new(false),
            last_start_context: RwLock::new(None),
        });

        for handle in registry.plugins(PluginKind::Lifecycle) {
            match registry.instantiate_lifecycle(&handle) {
                Ok(listener) => shared.lifecycle.insert(handle.id(), listener),
                Err(err) => {
                    tracing::error!("Skipping lifecycle plugin {}: {}", handle, err);
                }
            }
        }

        for handle in registry.plugins(PluginKind::Environment) {
            match registry.instantiate_environment(&handle) {
                Ok(listener) => shared.environment.insert(handle.id(), listener),
                Err(err) => {
                    tracing::error!("Skipping environment plugin {}: {}", handle, err);
                }
            }
        }

        registry.subscribe(
            PluginKind::Lifecycle,
            Box::new(LifecycleSubscription {
                shared: Arc::downgrade(&shared),
                registry: Arc::downgrade(&registry),
            }),
        );
        registry.subscribe(
            PluginKind::Environment,
            Box::new(EnvironmentSubscription {
                shared: Arc::downgrade(&shared),
                registry: Arc::downgrade(&registry),
                environment,
            }),
        );

        Self { shared, registry }
    }

    /// The registry this dispatcher discovers listeners from.
    pub fn registry(&self) -> &Arc<dyn PluginRegistry> {
        &self.registry
    }

    /// Whether start has been dispatched.
    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::Acquire)
    }

    /// The context recorded by the most recent start dispatch, if any.
    pub fn last_start_context(&self) -> Option<EventContext> {
        self.shared.last_start_context.read().clone()
    }

    /// Number of lifecycle listeners currently subscribed.
    pub fn lifecycle_listeners(&self) -> usize {
        self.shared.lifecycle.len()
    }

    /// Number of environment listeners currently subscribed.
    pub fn environment_listeners(&self) -> usize {
        self.shared.environment.len()
    }

    /// Dispatch environment-init to every environment listener.
    ///
    /// A non-severe listener failure is logged and dispatch continues. A
    /// severe failure or a listener panic aborts the dispatch immediately
    /// with [`Error::Fatal`], skipping the remaining listeners. Iteration
    /// order is unspecified.
    pub fn on_environment_init(&self) -> Result<()> {
        for listener in self.shared.environment.snapshot() {
            match catch_panic(|| listener.on_environment_init()) {
                Ok(Ok(())) => {}
                Ok(Err(err)) if err.is_severe() => {
                    return Err(Error::fatal(listener.name(), err));
                }
                Ok(Err(err)) => {
                    tracing::error!(
                        "Environment listener {} failed during init: {}",
                        listener.name(),
                        err
                    );
                }
                Err(panic) => {
                    return Err(Error::fatal_unexpected(listener.name(), panic));
                }
            }
        }
        Ok(())
    }

    /// Dispatch environment-shutdown to every environment listener.
    ///
    /// Never fails: every listener failure, severe or not, and every panic
    /// is logged and dispatch continues unconditionally.
    pub fn on_environment_shutdown(&self) {
        for listener in self.shared.environment.snapshot() {
            match catch_panic(|| listener.on_environment_shutdown()) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::error!(
                        "Environment listener {} failed during shutdown: {}",
                        listener.name(),
                        err
                    );
                }
                Err(panic) => {
                    tracing::error!(
                        "Environment listener {} panicked during shutdown: {}",
                        listener.name(),
                        panic
                    );
                }
            }
        }
    }

    /// Dispatch start to every lifecycle listener.
    ///
    /// Records the context for replay to late-joining listeners, then
    /// invokes every listener in unspecified order. The first failure
    /// propagates immediately, skipping the remaining listeners.
    ///
    /// Known hazard: a second call overwrites the recorded context with no
    /// synchronization against a concurrent late-join replay reading it.
    /// Callers are expected to start exactly once.
    pub fn on_start(&self, context: EventContext) -> Result<()> {
        // Written before the flag so a late-join that observes `started`
        // also observes the context.
        *self.shared.last_start_context.write() = Some(context.clone());
        self.shared.started.store(true, Ordering::Release);

        for listener in self.shared.lifecycle.snapshot() {
            listener
                .on_start(&context)
                .map_err(|err| Error::listener(listener.name(), err))?;
        }
        Ok(())
    }

    /// Dispatch exit to every lifecycle listener.
    ///
    /// The first failure propagates immediately, skipping the remaining
    /// listeners. Iteration order is unspecified.
    pub fn on_exit(&self, context: EventContext) -> Result<()> {
        for listener in self.shared.lifecycle.snapshot() {
            listener
                .on_exit(&context)
                .map_err(|err| Error::listener(listener.name(), err))?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for LifecycleDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleDispatcher")
            .field("lifecycle_listeners", &self.shared.lifecycle.len())
            .field("environment_listeners", &self.shared.environment.len())
            .field("started", &self.is_started())
            .finish()
    }
}

/// Registry subscription for lifecycle-kind plugins.
///
/// Holds weak references so the registry keeping the subscription alive does
/// not keep dispatcher state alive; a notification arriving after either
/// side is gone is ignored.
struct LifecycleSubscription {
    shared: Weak<Shared>,
    registry: Weak<dyn PluginRegistry>,
}

impl RegistryEvents for LifecycleSubscription {
    fn plugin_added(&self, handle: &PluginHandle) {
        let (Some(shared), Some(registry)) = (self.shared.upgrade(), self.registry.upgrade())
        else {
            return;
        };

        let listener = match registry.instantiate_lifecycle(handle) {
            Ok(listener) => listener,
            Err(err) => {
                tracing::error!("Dropping lifecycle plugin {}: {}", handle, err);
                return;
            }
        };

        shared.lifecycle.insert(handle.id(), Arc::clone(&listener));

        // Late join: replay start so the listener observes consistent state.
        // Failures here must never propagate back into the registry.
        if shared.started.load(Ordering::Acquire) {
            // The context is written before the started flag, so it cannot
            // be absent once the flag reads true.
            let Some(context) = shared.last_start_context.read().clone() else {
                tracing::error!(
                    "Start flag set with no recorded context; skipping replay for {}",
                    listener.name()
                );
                return;
            };
            match catch_panic(|| listener.on_start(&context)) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::error!(
                        "Late-joining listener {} failed during start replay: {}",
                        listener.name(),
                        err
                    );
                }
                Err(panic) => {
                    tracing::error!(
                        "Late-joining listener {} panicked during start replay: {}",
                        listener.name(),
                        panic
                    );
                }
            }
        }
    }

    fn plugin_removed(&self, handle: &PluginHandle) {
        if let Some(shared) = self.shared.upgrade() {
            shared.lifecycle.remove(handle.id());
        }
    }
}

/// Registry subscription for environment-kind plugins.
struct EnvironmentSubscription {
    shared: Weak<Shared>,
    registry: Weak<dyn PluginRegistry>,
    environment: Arc<dyn EnvironmentState>,
}

impl RegistryEvents for EnvironmentSubscription {
    fn plugin_added(&self, handle: &PluginHandle) {
        let (Some(shared), Some(registry)) = (self.shared.upgrade(), self.registry.upgrade())
        else {
            return;
        };

        let listener = match registry.instantiate_environment(handle) {
            Ok(listener) => listener,
            Err(err) => {
                tracing::error!("Dropping environment plugin {}: {}", handle, err);
                return;
            }
        };

        shared.environment.insert(handle.id(), Arc::clone(&listener));

        if self.environment.is_initialized() {
            match catch_panic(|| listener.on_environment_init()) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::error!(
                        "Late-joining listener {} failed during init replay: {}",
                        listener.name(),
                        err
                    );
                }
                Err(panic) => {
                    tracing::error!(
                        "Late-joining listener {} panicked during init replay: {}",
                        listener.name(),
                        panic
                    );
                }
            }
        }
    }

    fn plugin_removed(&self, handle: &PluginHandle) {
        if let Some(shared) = self.shared.upgrade() {
            shared.environment.remove(handle.id());
        }
    }
}

/// Run a listener callback, turning a panic into a message.
fn catch_panic<F>(f: F) -> std::result::Result<std::result::Result<(), LifecycleError>, String>
where
    F: FnOnce() -> std::result::Result<(), LifecycleError>,
{
    catch_unwind(AssertUnwindSafe(f)).map_err(|panic| panic_message(panic.as_ref()))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    use parking_lot::Mutex;

    struct CountingListener {
        name: String,
        starts: AtomicUsize,
        exits: AtomicUsize,
    }

    impl CountingListener {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                starts: AtomicUsize::new(0),
                exits: AtomicUsize::new(0),
            })
        }
    }

    impl LifecycleListener for CountingListener {
        fn name(&self) -> &str {
            &self.name
        }

        fn on_start(&self, _context: &EventContext) -> std::result::Result<(), LifecycleError> {
            self.starts.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn on_exit(&self, _context: &EventContext) -> std::result::Result<(), LifecycleError> {
            self.exits.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    struct CountingEnvListener {
        name: String,
        inits: AtomicUsize,
        shutdowns: AtomicUsize,
    }

    impl CountingEnvListener {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                inits: AtomicUsize::new(0),
                shutdowns: AtomicUsize::new(0),
            })
        }
    }

    impl EnvironmentListener for CountingEnvListener {
        fn name(&self) -> &str {
            &self.name
        }

        fn on_environment_init(&self) -> std::result::Result<(), LifecycleError> {
            self.inits.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn on_environment_shutdown(&self) -> std::result::Result<(), LifecycleError> {
            self.shutdowns.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[derive(Default)]
    struct TestRegistry {
        lifecycle: Mutex<HashMap<String, (PluginHandle, Arc<dyn LifecycleListener>)>>,
        environment: Mutex<HashMap<String, (PluginHandle, Arc<dyn EnvironmentListener>)>>,
        broken: Mutex<Vec<String>>,
        subscriptions: Mutex<Vec<(PluginKind, Box<dyn RegistryEvents>)>>,
    }

    impl TestRegistry {
        fn preload_lifecycle(&self, id: &str, listener: Arc<dyn LifecycleListener>) {
            self.lifecycle
                .lock()
                .insert(id.to_string(), (PluginHandle::new(id, id), listener));
        }

        fn preload_broken(&self, kind: PluginKind, id: &str) {
            self.broken.lock().push(id.to_string());
            let handle = PluginHandle::new(id, id);
            match kind {
                PluginKind::Lifecycle => {
                    self.lifecycle
                        .lock()
                        .insert(id.to_string(), (handle, CountingListener::new(id)));
                }
                PluginKind::Environment => {
                    self.environment
                        .lock()
                        .insert(id.to_string(), (handle, CountingEnvListener::new(id)));
                }
            }
        }

        fn add_lifecycle(&self, id: &str, listener: Arc<dyn LifecycleListener>) {
            self.preload_lifecycle(id, listener);
            self.notify_added(PluginKind::Lifecycle, &PluginHandle::new(id, id));
        }

        fn add_environment(&self, id: &str, listener: Arc<dyn EnvironmentListener>) {
            self.environment
                .lock()
                .insert(id.to_string(), (PluginHandle::new(id, id), listener));
            self.notify_added(PluginKind::Environment, &PluginHandle::new(id, id));
        }

        fn remove(&self, kind: PluginKind, id: &str) {
            match kind {
                PluginKind::Lifecycle => {
                    self.lifecycle.lock().remove(id);
                }
                PluginKind::Environment => {
                    self.environment.lock().remove(id);
                }
            }
            let handle = PluginHandle::new(id, id);
            for (sub_kind, events) in self.subscriptions.lock().iter() {
                if *sub_kind == kind {
                    events.plugin_removed(&handle);
                }
            }
        }

        fn notify_added(&self, kind: PluginKind, handle: &PluginHandle) {
            for (sub_kind, events) in self.subscriptions.lock().iter() {
                if *sub_kind == kind {
                    events.plugin_added(handle);
                }
            }
        }
    }

    impl PluginRegistry for TestRegistry {
        fn plugins(&self, kind: PluginKind) -> Vec<PluginHandle> {
            match kind {
                PluginKind::Lifecycle => self
                    .lifecycle
                    .lock()
                    .values()
                    .map(|(handle, _)| handle.clone())
                    .collect(),
                PluginKind::Environment => self
                    .environment
                    .lock()
                    .values()
                    .map(|(handle, _)| handle.clone())
                    .collect(),
            }
        }

        fn instantiate_lifecycle(
            &self,
            handle: &PluginHandle,
        ) -> Result<Arc<dyn LifecycleListener>> {
            if self.broken.lock().contains(&handle.id().to_string()) {
                return Err(Error::instantiation(handle.id(), "marked broken"));
            }
            self.lifecycle
                .lock()
                .get(handle.id())
                .map(|(_, listener)| Arc::clone(listener))
                .ok_or_else(|| Error::instantiation(handle.id(), "unknown plugin"))
        }

        fn instantiate_environment(
            &self,
            handle: &PluginHandle,
        ) -> Result<Arc<dyn EnvironmentListener>> {
            if self.broken.lock().contains(&handle.id().to_string()) {
                return Err(Error::instantiation(handle.id(), "marked broken"));
            }
            self.environment
                .lock()
                .get(handle.id())
                .map(|(_, listener)| Arc::clone(listener))
                .ok_or_else(|| Error::instantiation(handle.id(), "unknown plugin"))
        }

        fn subscribe(&self, kind: PluginKind, events: Box<dyn RegistryEvents>) {
            self.subscriptions.lock().push((kind, events));
        }
    }

    struct TestEnvironment(AtomicBool);

    impl TestEnvironment {
        fn new(initialized: bool) -> Arc<Self> {
            Arc::new(Self(AtomicBool::new(initialized)))
        }

        fn set_initialized(&self, initialized: bool) {
            self.0.store(initialized, Ordering::Relaxed);
        }
    }

    impl EnvironmentState for TestEnvironment {
        fn is_initialized(&self) -> bool {
            self.0.load(Ordering::Relaxed)
        }
    }

    #[test]
    fn test_bulk_load_at_construction() {
        let registry = Arc::new(TestRegistry::default());
        registry.preload_lifecycle("a", CountingListener::new("a"));
        registry.preload_lifecycle("b", CountingListener::new("b"));

        let dispatcher = LifecycleDispatcher::new(registry, TestEnvironment::new(false));
        assert_eq!(dispatcher.lifecycle_listeners(), 2);
        assert_eq!(dispatcher.environment_listeners(), 0);
    }

    #[test]
    fn test_instantiation_failure_skips_plugin() {
        let registry = Arc::new(TestRegistry::default());
        registry.preload_lifecycle("good", CountingListener::new("good"));
        registry.preload_broken(PluginKind::Lifecycle, "bad");
        registry.preload_broken(PluginKind::Environment, "bad-env");

        let dispatcher = LifecycleDispatcher::new(registry, TestEnvironment::new(false));
        assert_eq!(dispatcher.lifecycle_listeners(), 1);
        assert_eq!(dispatcher.environment_listeners(), 0);
    }

    #[test]
    fn test_late_join_receives_start_replay() {
        let registry = Arc::new(TestRegistry::default());
        let dispatcher =
            LifecycleDispatcher::new(Arc::clone(&registry) as _, TestEnvironment::new(false));

        dispatcher.on_start(EventContext::new(42u32)).unwrap();

        let late = CountingListener::new("late");
        registry.add_lifecycle("late", Arc::clone(&late) as _);

        assert_eq!(late.starts.load(Ordering::Relaxed), 1);
        assert_eq!(dispatcher.lifecycle_listeners(), 1);
    }

    #[test]
    fn test_start_replay_uses_recorded_context() {
        struct CapturesPayload {
            payload: Mutex<Option<u32>>,
        }

        impl LifecycleListener for CapturesPayload {
            fn name(&self) -> &str {
                "captures-payload"
            }

            fn on_start(
                &self,
                context: &EventContext,
            ) -> std::result::Result<(), LifecycleError> {
                *self.payload.lock() = context.downcast_ref::<u32>().copied();
                Ok(())
            }
        }

        let registry = Arc::new(TestRegistry::default());
        let dispatcher =
            LifecycleDispatcher::new(Arc::clone(&registry) as _, TestEnvironment::new(false));

        dispatcher.on_start(EventContext::new(17u32)).unwrap();

        let listener = Arc::new(CapturesPayload {
            payload: Mutex::new(None),
        });
        registry.add_lifecycle("captures", Arc::clone(&listener) as _);

        assert_eq!(*listener.payload.lock(), Some(17));
    }

    #[test]
    fn test_add_before_start_gets_no_replay() {
        let registry = Arc::new(TestRegistry::default());
        let dispatcher =
            LifecycleDispatcher::new(Arc::clone(&registry) as _, TestEnvironment::new(false));

        let early = CountingListener::new("early");
        registry.add_lifecycle("early", Arc::clone(&early) as _);
        assert_eq!(early.starts.load(Ordering::Relaxed), 0);

        dispatcher.on_start(EventContext::empty()).unwrap();
        assert_eq!(early.starts.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_late_join_receives_init_replay() {
        let registry = Arc::new(TestRegistry::default());
        let environment = TestEnvironment::new(false);
        let _dispatcher =
            LifecycleDispatcher::new(Arc::clone(&registry) as _, Arc::clone(&environment) as _);

        let early = CountingEnvListener::new("early");
        registry.add_environment("early", Arc::clone(&early) as _);
        assert_eq!(early.inits.load(Ordering::Relaxed), 0);

        environment.set_initialized(true);
        let late = CountingEnvListener::new("late");
        registry.add_environment("late", Arc::clone(&late) as _);
        assert_eq!(late.inits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_removed_listener_no_longer_dispatched() {
        let registry = Arc::new(TestRegistry::default());
        let dispatcher =
            LifecycleDispatcher::new(Arc::clone(&registry) as _, TestEnvironment::new(false));

        let listener = CountingListener::new("transient");
        registry.add_lifecycle("transient", Arc::clone(&listener) as _);
        registry.remove(PluginKind::Lifecycle, "transient");

        dispatcher.on_start(EventContext::empty()).unwrap();
        assert_eq!(listener.starts.load(Ordering::Relaxed), 0);
        assert_eq!(dispatcher.lifecycle_listeners(), 0);
    }

    #[test]
    fn test_failed_late_instantiation_never_propagates() {
        let registry = Arc::new(TestRegistry::default());
        let dispatcher =
            LifecycleDispatcher::new(Arc::clone(&registry) as _, TestEnvironment::new(false));

        registry.broken.lock().push("bad".to_string());
        registry.preload_lifecycle("bad", CountingListener::new("bad"));
        registry.notify_added(PluginKind::Lifecycle, &PluginHandle::new("bad", "bad"));

        assert_eq!(dispatcher.lifecycle_listeners(), 0);
    }

    #[test]
    fn test_failing_start_replay_is_absorbed() {
        struct FailsOnStart;

        impl LifecycleListener for FailsOnStart {
            fn name(&self) -> &str {
                "fails-on-start"
            }

            fn on_start(
                &self,
                _context: &EventContext,
            ) -> std::result::Result<(), LifecycleError> {
                Err(LifecycleError::severe("refuses to start"))
            }
        }

        let registry = Arc::new(TestRegistry::default());
        let dispatcher =
            LifecycleDispatcher::new(Arc::clone(&registry) as _, TestEnvironment::new(false));

        dispatcher.on_start(EventContext::empty()).unwrap();

        // Replay failure is logged, the listener stays subscribed.
        registry.add_lifecycle("fails", Arc::new(FailsOnStart));
        assert_eq!(dispatcher.lifecycle_listeners(), 1);
    }

    #[test]
    fn test_start_records_context_and_flag() {
        let registry = Arc::new(TestRegistry::default());
        let dispatcher = LifecycleDispatcher::new(registry, TestEnvironment::new(false));
        assert!(!dispatcher.is_started());
        assert!(dispatcher.last_start_context().is_none());

        let context = EventContext::new("boot".to_string());
        dispatcher.on_start(context.clone()).unwrap();

        assert!(dispatcher.is_started());
        assert!(dispatcher.last_start_context().unwrap().same_payload(&context));
    }
}
