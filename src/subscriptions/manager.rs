//! Subscription manager for aggregate callbacks and outcome events.

use crate::error::{Result, UnreadError};
use crate::types::UnreadMap;
use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

use super::aggregate::{AggregateMode, Aggregator};
use super::types::{
    AggregateCallback, DropReason, EventConfig, EventHandle, StoreEvent, SubscriptionHandle,
    SubscriptionId,
};

/// Internal event subscriber state.
struct EventSubscriber {
    sender: Sender<StoreEvent>,
}

impl EventSubscriber {
    /// Try to send an event. Returns false if buffer is full or receiver is gone.
    fn try_send(&self, event: StoreEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(crossbeam_channel::TrySendError::Full(_)) => false,
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Internal aggregate subscriber state.
struct AggregateSubscriber {
    callback: AggregateCallback,
    /// Generation of the newest total delivered.
    delivered: AtomicU64,
}

impl AggregateSubscriber {
    /// Deliver `total` unless a newer generation already reached this subscriber.
    fn deliver(&self, generation: u64, total: u64) {
        if self.delivered.fetch_max(generation, Ordering::SeqCst) < generation {
            (self.callback)(total);
        }
    }
}

/// Manages aggregate subscribers and event subscribers.
pub struct SubscriptionManager {
    /// Aggregate subscribers, in registration order.
    callbacks: RwLock<BTreeMap<SubscriptionId, Arc<AggregateSubscriber>>>,
    /// Event subscribers by ID.
    events: RwLock<HashMap<SubscriptionId, EventSubscriber>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
    /// Bumped once per notification.
    generation: AtomicU64,
    aggregator: Aggregator,
}

impl SubscriptionManager {
    /// Create a new subscription manager.
    pub fn new(mode: AggregateMode) -> Self {
        Self {
            callbacks: RwLock::new(BTreeMap::new()),
            events: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            generation: AtomicU64::new(0),
            aggregator: Aggregator::new(mode),
        }
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Aggregate for a snapshot under the configured mode.
    pub fn aggregate(&self, map: &UnreadMap) -> u64 {
        self.aggregator.aggregate(map)
    }

    // --- Aggregate Subscriptions ---

    /// Register an aggregate callback.
    ///
    /// Immediate invocation is the caller's job, since it needs the current
    /// snapshot under the writer lock.
    pub fn subscribe(self: &Arc<Self>, callback: AggregateCallback) -> SubscriptionHandle {
        let id = self.next_id();
        let subscriber = AggregateSubscriber {
            callback,
            delivered: AtomicU64::new(self.generation.load(Ordering::SeqCst)),
        };
        self.callbacks.write().insert(id, Arc::new(subscriber));

        SubscriptionHandle {
            id,
            manager: Arc::downgrade(self),
        }
    }

    /// Remove an aggregate callback. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.callbacks.write().remove(&id).is_some()
    }

    /// Get aggregate subscription count.
    pub fn subscription_count(&self) -> usize {
        self.callbacks.read().len()
    }

    /// Notify every aggregate subscriber of a new snapshot.
    ///
    /// The total is computed once per change. Callbacks run outside the
    /// registry lock so they may subscribe or unsubscribe. A callback that
    /// writes again triggers a nested notification; once that newer total has
    /// reached a subscriber, the older one is no longer delivered to it.
    pub fn notify(&self, map: &UnreadMap) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let subscribers: Vec<Arc<AggregateSubscriber>> = {
            let subs = self.callbacks.read();
            if subs.is_empty() {
                return;
            }
            subs.values().cloned().collect()
        };

        let total = self.aggregator.aggregate(map);
        for subscriber in subscribers {
            subscriber.deliver(generation, total);
        }
    }

    // --- Event Subscriptions ---

    /// Create a new event subscription. The buffer must hold at least one event.
    pub fn subscribe_events(&self, config: EventConfig) -> Result<EventHandle> {
        if config.buffer_size == 0 {
            return Err(UnreadError::Config("event buffer_size must be positive".into()));
        }

        let id = self.next_id();
        let (sender, receiver) = bounded(config.buffer_size);

        self.events.write().insert(id, EventSubscriber { sender });

        Ok(EventHandle { id, receiver })
    }

    /// Unsubscribe an event subscriber and clean up.
    pub fn unsubscribe_events(&self, id: SubscriptionId) {
        let mut subs = self.events.write();
        if let Some(sub) = subs.remove(&id) {
            // Best effort
            let _ = sub.sender.try_send(StoreEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    /// Get event subscription count.
    pub fn event_subscription_count(&self) -> usize {
        self.events.read().len()
    }

    /// Broadcast an event to every event subscriber. Drops subscribers that
    /// fail to receive.
    pub fn broadcast(&self, event: StoreEvent) {
        let mut to_remove = Vec::new();

        {
            let subs = self.events.read();
            for (id, sub) in subs.iter() {
                if !sub.try_send(event.clone()) {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            self.drop_subscribers(to_remove);
        }
    }

    fn drop_subscribers(&self, ids: Vec<SubscriptionId>) {
        let mut subs = self.events.write();
        for id in ids {
            if let Some(sub) = subs.remove(&id) {
                warn!(subscription = id.0, "Dropping slow event subscriber");
                // Might fail, that's ok
                let _ = sub.sender.try_send(StoreEvent::Dropped {
                    reason: DropReason::BufferOverflow,
                });
            }
        }
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new(AggregateMode::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TxId;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn recorder() -> (Arc<Mutex<Vec<u64>>>, AggregateCallback) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, Arc::new(move |total: u64| sink.lock().push(total)))
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let manager = Arc::new(SubscriptionManager::default());

        let (_, callback) = recorder();
        let handle = manager.subscribe(callback);
        assert_eq!(manager.subscription_count(), 1);

        assert!(handle.unsubscribe());
        assert_eq!(manager.subscription_count(), 0);
    }

    #[test]
    fn test_notify_delivers_sum() {
        let manager = Arc::new(SubscriptionManager::default());
        let (seen, callback) = recorder();
        let _handle = manager.subscribe(callback);

        let map: UnreadMap = [("a", 2), ("b", 5)].into_iter().collect();
        manager.notify(&map);

        assert_eq!(*seen.lock(), vec![7]);
    }

    #[test]
    fn test_unsubscribe_after_manager_dropped() {
        let manager = Arc::new(SubscriptionManager::default());
        let (_, callback) = recorder();
        let handle = manager.subscribe(callback);

        drop(manager);
        assert!(!handle.unsubscribe());
    }

    #[test]
    fn test_callback_can_unsubscribe_itself() {
        let manager = Arc::new(SubscriptionManager::default());
        let slot: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicU64::new(0));

        let handle = {
            let slot = Arc::clone(&slot);
            let calls = Arc::clone(&calls);
            manager.subscribe(Arc::new(move |_: u64| {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Some(handle) = slot.lock().take() {
                    handle.unsubscribe();
                }
            }))
        };
        *slot.lock() = Some(handle);

        manager.notify(&UnreadMap::new());
        manager.notify(&UnreadMap::new());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.subscription_count(), 0);
    }

    #[test]
    fn test_broadcast_events() {
        let manager = SubscriptionManager::default();
        let handle = manager.subscribe_events(EventConfig::default()).unwrap();

        manager.broadcast(StoreEvent::Persisted {
            tx: TxId(1),
            entries: 2,
        });

        let event = handle.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(
            event,
            StoreEvent::Persisted {
                tx: TxId(1),
                entries: 2
            }
        );
    }

    #[test]
    fn test_drop_slow_event_subscriber() {
        let manager = SubscriptionManager::default();
        let _handle = manager
            .subscribe_events(EventConfig { buffer_size: 2 })
            .unwrap();

        for _ in 0..10 {
            manager.broadcast(StoreEvent::Reset);
        }

        assert_eq!(manager.event_subscription_count(), 0);
    }

    #[test]
    fn test_zero_event_buffer_rejected() {
        let manager = SubscriptionManager::default();
        let result = manager.subscribe_events(EventConfig { buffer_size: 0 });

        assert!(matches!(result, Err(UnreadError::Config(_))));
        assert_eq!(manager.event_subscription_count(), 0);
    }

    #[test]
    fn test_nested_notify_supersedes_outer_total() {
        let manager = Arc::new(SubscriptionManager::default());
        let (seen, recorder_cb) = recorder();

        let _writer = {
            let weak = Arc::downgrade(&manager);
            manager.subscribe(Arc::new(move |total: u64| {
                if total == 1 {
                    if let Some(manager) = weak.upgrade() {
                        let next: UnreadMap = [("a", 1), ("b", 10)].into_iter().collect();
                        manager.notify(&next);
                    }
                }
            }))
        };
        let _reader = manager.subscribe(recorder_cb);

        let first: UnreadMap = [("a", 1)].into_iter().collect();
        manager.notify(&first);

        assert_eq!(*seen.lock(), vec![11]);
    }

    #[test]
    fn test_unsubscribe_events_sends_dropped() {
        let manager = SubscriptionManager::default();
        let handle = manager.subscribe_events(EventConfig::default()).unwrap();

        manager.unsubscribe_events(handle.id);

        assert_eq!(manager.event_subscription_count(), 0);
        let event = handle.try_recv().unwrap();
        assert!(matches!(
            event,
            StoreEvent::Dropped {
                reason: DropReason::Unsubscribed
            }
        ));
    }
}
