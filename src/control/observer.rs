//! Event observer registry.
//!
//! Observers are keyed by [`SubscriptionHandle`]s and owned by the channel.
//! Disconnecting the channel clears the registry in one step, so no
//! observer outlives the connection it was registered on.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::protocol::ControlEvent;

/// Token identifying a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(u64);

/// What an observer wants after handling an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverFlow {
    /// Keep receiving matching events.
    Continue,
    /// Unregister after this event.
    Done,
}

type Predicate = Box<dyn Fn(&ControlEvent) -> bool + Send>;
type Handler = Box<dyn FnMut(&ControlEvent) -> ObserverFlow + Send>;

struct Observer {
    predicate: Predicate,
    handler: Handler,
}

/// Registry of event observers.
///
/// Handlers run on the channel's reader task while the registry is locked.
/// They must be quick and must not register or unregister observers
/// themselves; return [`ObserverFlow::Done`] to unregister instead.
#[derive(Default)]
pub struct ObserverRegistry {
    next_id: AtomicU64,
    observers: Mutex<BTreeMap<SubscriptionHandle, Observer>>,
}

impl ObserverRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer and returns its handle.
    pub fn register<P, H>(&self, predicate: P, handler: H) -> SubscriptionHandle
    where
        P: Fn(&ControlEvent) -> bool + Send + 'static,
        H: FnMut(&ControlEvent) -> ObserverFlow + Send + 'static,
    {
        let handle = SubscriptionHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(
            handle,
            Observer {
                predicate: Box::new(predicate),
                handler: Box::new(handler),
            },
        );
        handle
    }

    /// Removes an observer. Returns false if it was already gone.
    pub fn unregister(&self, handle: SubscriptionHandle) -> bool {
        self.lock().remove(&handle).is_some()
    }

    /// Delivers an event to every matching observer, in registration order.
    ///
    /// Returns the number of handlers invoked.
    pub fn dispatch(&self, event: &ControlEvent) -> usize {
        let mut observers = self.lock();
        let mut invoked = 0;
        observers.retain(|_, observer| {
            if !(observer.predicate)(event) {
                return true;
            }
            invoked += 1;
            (observer.handler)(event) == ObserverFlow::Continue
        });
        invoked
    }

    /// Drops every observer.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of registered observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no observer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panicking handler must not disable event delivery for the others.
    fn lock(&self) -> MutexGuard<'_, BTreeMap<SubscriptionHandle, Observer>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn event(text: &str) -> ControlEvent {
        ControlEvent::parse(text).unwrap()
    }

    fn counter() -> (Arc<AtomicU64>, impl FnMut(&ControlEvent) -> ObserverFlow + Send) {
        let count = Arc::new(AtomicU64::new(0));
        let handler_count = Arc::clone(&count);
        let handler = move |_: &ControlEvent| {
            handler_count.fetch_add(1, Ordering::SeqCst);
            ObserverFlow::Continue
        };
        (count, handler)
    }

    #[test]
    fn dispatch_invokes_matching_observers_only() {
        let registry = ObserverRegistry::new();
        let (bootstrap_count, bootstrap_handler) = counter();
        let (circ_count, circ_handler) = counter();

        registry.register(|e| e.status_action() == Some("BOOTSTRAP"), bootstrap_handler);
        registry.register(|e| e.kind() == "CIRC", circ_handler);

        let invoked = registry.dispatch(&event("STATUS_CLIENT NOTICE BOOTSTRAP PROGRESS=5"));

        assert_eq!(invoked, 1);
        assert_eq!(bootstrap_count.load(Ordering::SeqCst), 1);
        assert_eq!(circ_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn done_unregisters_after_first_event() {
        let registry = ObserverRegistry::new();
        let count = Arc::new(AtomicU64::new(0));
        let handler_count = Arc::clone(&count);
        registry.register(
            |_| true,
            move |_| {
                handler_count.fetch_add(1, Ordering::SeqCst);
                ObserverFlow::Done
            },
        );

        registry.dispatch(&event("STATUS_CLIENT NOTICE CIRCUIT_ESTABLISHED"));
        registry.dispatch(&event("STATUS_CLIENT NOTICE CIRCUIT_ESTABLISHED"));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn double_unregister_is_harmless() {
        let registry = ObserverRegistry::new();
        let (_, keep_handler) = counter();
        let (_, drop_handler) = counter();
        let keep = registry.register(|_| true, keep_handler);
        let dropped = registry.register(|_| true, drop_handler);

        assert!(registry.unregister(dropped));
        assert!(!registry.unregister(dropped));
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister(keep));
    }

    #[test]
    fn handles_are_unique() {
        let registry = ObserverRegistry::new();
        let first = registry.register(|_| true, |_| ObserverFlow::Continue);
        let second = registry.register(|_| true, |_| ObserverFlow::Continue);
        assert_ne!(first, second);
    }

    #[test]
    fn clear_drops_everything() {
        let registry = ObserverRegistry::new();
        let (count, handler) = counter();
        registry.register(|_| true, handler);

        registry.clear();
        registry.dispatch(&event("STATUS_CLIENT NOTICE BOOTSTRAP PROGRESS=5"));

        assert!(registry.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
