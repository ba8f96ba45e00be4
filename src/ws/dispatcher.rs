//! Fan-out of routed events to UI handlers.
//!
//! Handlers are keyed by category and invoked in registration order. A
//! dispatch works on a snapshot of the handler list, so handlers may register
//! or unregister (including themselves) while being called, and one panicking
//! handler never prevents the rest from running.

use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use feedsync_shared::{EventCategory, InboundEvent};
use parking_lot::Mutex;

use super::connection::{LifecycleEvent, LifecycleKind};

pub type EventHandler = Arc<dyn Fn(&InboundEvent) + Send + Sync>;
pub type LifecycleHandler = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

/// Monotonic, so map order equals registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandlerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Event(EventCategory),
    Lifecycle(LifecycleKind),
}

#[derive(Default)]
struct Handlers {
    events: HashMap<EventCategory, BTreeMap<HandlerId, EventHandler>>,
    lifecycle: HashMap<LifecycleKind, BTreeMap<HandlerId, LifecycleHandler>>,
}

#[derive(Default)]
pub struct Dispatcher {
    next_id: AtomicU64,
    handlers: Mutex<Handlers>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&self) -> HandlerId {
        HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn register<F>(self: &Arc<Self>, category: EventCategory, handler: F) -> Registration
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        let id = self.allocate();
        self.handlers
            .lock()
            .events
            .entry(category)
            .or_default()
            .insert(id, Arc::new(handler));
        Registration::new(self, id, Slot::Event(category))
    }

    pub fn register_lifecycle<F>(self: &Arc<Self>, kind: LifecycleKind, handler: F) -> Registration
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        let id = self.allocate();
        self.handlers
            .lock()
            .lifecycle
            .entry(kind)
            .or_default()
            .insert(id, Arc::new(handler));
        Registration::new(self, id, Slot::Lifecycle(kind))
    }

    fn remove(&self, id: HandlerId, slot: Slot) {
        let mut handlers = self.handlers.lock();
        match slot {
            Slot::Event(category) => {
                if let Some(map) = handlers.events.get_mut(&category) {
                    map.remove(&id);
                    if map.is_empty() {
                        handlers.events.remove(&category);
                    }
                }
            }
            Slot::Lifecycle(kind) => {
                if let Some(map) = handlers.lifecycle.get_mut(&kind) {
                    map.remove(&id);
                    if map.is_empty() {
                        handlers.lifecycle.remove(&kind);
                    }
                }
            }
        }
    }

    pub fn handler_count(&self, category: EventCategory) -> usize {
        self.handlers
            .lock()
            .events
            .get(&category)
            .map_or(0, BTreeMap::len)
    }

    /// Deliver to every handler registered for the event's category. Returns
    /// how many handlers ran to completion.
    pub fn dispatch(&self, event: &InboundEvent) -> usize {
        let snapshot: Vec<EventHandler> = {
            let handlers = self.handlers.lock();
            match handlers.events.get(&event.category()) {
                Some(map) => map.values().cloned().collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for handler in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => delivered += 1,
                Err(_) => crate::log_error!(
                    "Handler for {} on {} panicked; continuing fan-out",
                    event.category(),
                    event.entity_id
                ),
            }
        }
        delivered
    }

    pub fn dispatch_lifecycle(&self, event: &LifecycleEvent) -> usize {
        let snapshot: Vec<LifecycleHandler> = {
            let handlers = self.handlers.lock();
            match handlers.lifecycle.get(&event.kind()) {
                Some(map) => map.values().cloned().collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for handler in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => delivered += 1,
                Err(_) => crate::log_error!("Lifecycle handler for {:?} panicked", event.kind()),
            }
        }
        delivered
    }
}

/// Keeps a handler registered. Dropping it (or calling
/// [`unregister`](Self::unregister)) removes the handler; removal is
/// idempotent and safe from inside the handler itself.
#[must_use = "the handler is removed as soon as the registration is dropped"]
pub struct Registration {
    dispatcher: Weak<Dispatcher>,
    id: HandlerId,
    slot: Slot,
    active: bool,
}

impl Registration {
    fn new(dispatcher: &Arc<Dispatcher>, id: HandlerId, slot: Slot) -> Self {
        Self {
            dispatcher: Arc::downgrade(dispatcher),
            id,
            slot,
            active: true,
        }
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn unregister(&mut self) {
        if !std::mem::take(&mut self.active) {
            return;
        }
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.remove(self.id, self.slot);
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.unregister();
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("slot", &self.slot)
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedsync_shared::EventKind;

    fn liked(actor: &str) -> InboundEvent {
        InboundEvent::new("post-1", EventKind::EntityLiked).by(actor)
    }

    fn recorder(log: Arc<Mutex<Vec<usize>>>, n: usize) -> impl Fn(&InboundEvent) + Send + Sync {
        move |_| log.lock().push(n)
    }

    #[test]
    fn test_fan_out_in_registration_order() {
        let dispatcher = Arc::new(Dispatcher::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut regs: Vec<Registration> = (0..5)
            .map(|n| dispatcher.register(EventCategory::EntityLiked, recorder(log.clone(), n)))
            .collect();

        assert_eq!(dispatcher.dispatch(&liked("u1")), 5);
        assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);

        regs[2].unregister();
        log.lock().clear();
        assert_eq!(dispatcher.dispatch(&liked("u2")), 4);
        assert_eq!(*log.lock(), vec![0, 1, 3, 4]);
    }

    #[test]
    fn test_drop_unregisters_and_repeat_is_noop() {
        let dispatcher = Arc::new(Dispatcher::new());
        let mut reg = dispatcher.register(EventCategory::EntityLiked, |_| {});
        assert_eq!(dispatcher.handler_count(EventCategory::EntityLiked), 1);
        reg.unregister();
        reg.unregister();
        drop(reg);
        assert_eq!(dispatcher.handler_count(EventCategory::EntityLiked), 0);
    }

    #[test]
    fn test_other_categories_are_not_called() {
        let dispatcher = Arc::new(Dispatcher::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let _reg = dispatcher.register(EventCategory::EntityUnliked, recorder(log.clone(), 1));
        assert_eq!(dispatcher.dispatch(&liked("u1")), 0);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let dispatcher = Arc::new(Dispatcher::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let _a = dispatcher.register(EventCategory::EntityLiked, recorder(log.clone(), 1));
        let _b = dispatcher.register(EventCategory::EntityLiked, |_| panic!("boom"));
        let _c = dispatcher.register(EventCategory::EntityLiked, recorder(log.clone(), 3));

        assert_eq!(dispatcher.dispatch(&liked("u1")), 2);
        assert_eq!(*log.lock(), vec![1, 3]);
    }

    #[test]
    fn test_handler_may_unregister_itself_mid_dispatch() {
        let dispatcher = Arc::new(Dispatcher::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let own: Arc<Mutex<Option<Registration>>> = Arc::new(Mutex::new(None));

        let _first = dispatcher.register(EventCategory::EntityLiked, recorder(log.clone(), 1));
        let slot = Arc::clone(&own);
        let log_self = Arc::clone(&log);
        let reg = dispatcher.register(EventCategory::EntityLiked, move |_| {
            log_self.lock().push(2);
            slot.lock().take();
        });
        *own.lock() = Some(reg);
        let _last = dispatcher.register(EventCategory::EntityLiked, recorder(log.clone(), 3));

        assert_eq!(dispatcher.dispatch(&liked("u1")), 3);
        assert_eq!(dispatcher.dispatch(&liked("u2")), 2);
        assert_eq!(*log.lock(), vec![1, 2, 3, 1, 3]);
    }

    #[test]
    fn test_registration_outliving_dispatcher() {
        let dispatcher = Arc::new(Dispatcher::new());
        let reg = dispatcher.register(EventCategory::EntityLiked, |_| {});
        drop(dispatcher);
        drop(reg);
    }

    #[test]
    fn test_lifecycle_handlers_by_kind() {
        let dispatcher = Arc::new(Dispatcher::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let _reg = dispatcher.register_lifecycle(LifecycleKind::ConnectionEstablished, move |e| {
            sink.lock().push(e.kind())
        });

        dispatcher.dispatch_lifecycle(&LifecycleEvent::ConnectionEstablished);
        dispatcher.dispatch_lifecycle(&LifecycleEvent::AuthRejected {
            reason: "expired".into(),
        });
        assert_eq!(*log.lock(), vec![LifecycleKind::ConnectionEstablished]);
    }
}
