//! The state container holding the current unread map.

use crate::subscriptions::{AggregateCallback, SubscriptionHandle, SubscriptionManager};
use crate::types::UnreadMap;
use parking_lot::{ReentrantMutex, RwLock};
use std::sync::Arc;

/// Holds the current feed-id → count snapshot.
///
/// Readers get an immutable `Arc<UnreadMap>`; writers replace the whole
/// snapshot, so a partially applied change is never observable. Writes are
/// serialized by a re-entrant lock that stays held while subscribers are
/// notified, which keeps notifications in write order and lets callbacks
/// re-enter the container.
pub struct StateContainer {
    /// Current snapshot.
    state: RwLock<Arc<UnreadMap>>,

    /// Serializes writers (and subscriber notification).
    write_lock: ReentrantMutex<()>,

    subscriptions: Arc<SubscriptionManager>,
}

impl StateContainer {
    pub fn new(subscriptions: Arc<SubscriptionManager>) -> Self {
        Self {
            state: RwLock::new(Arc::new(UnreadMap::new())),
            write_lock: ReentrantMutex::new(()),
            subscriptions,
        }
    }

    /// Current snapshot.
    pub fn get(&self) -> Arc<UnreadMap> {
        Arc::clone(&self.state.read())
    }

    /// Atomically replace the state with `patch(current)`.
    pub fn set<F>(&self, patch: F) -> Arc<UnreadMap>
    where
        F: FnOnce(&UnreadMap) -> UnreadMap,
    {
        let _lock = self.write_lock.lock();
        let next = Arc::new(patch(&self.get()));
        self.commit(Arc::clone(&next));
        next
    }

    /// Like [`StateContainer::set`], but a failing patch leaves the state untouched.
    pub fn try_set<F, E>(&self, patch: F) -> Result<Arc<UnreadMap>, E>
    where
        F: FnOnce(&UnreadMap) -> Result<UnreadMap, E>,
    {
        let _lock = self.write_lock.lock();
        let next = Arc::new(patch(&self.get())?);
        self.commit(Arc::clone(&next));
        Ok(next)
    }

    /// Copy the current map, mutate the copy, and commit it.
    pub fn update<F>(&self, mutate: F) -> Arc<UnreadMap>
    where
        F: FnOnce(&mut UnreadMap),
    {
        self.set(|current| {
            let mut next = current.clone();
            mutate(&mut next);
            next
        })
    }

    /// Run `f` while holding the writer lock, so a read-then-write sequence
    /// cannot interleave with other writers.
    pub fn with_write_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        let _lock = self.write_lock.lock();
        f()
    }

    /// Register an aggregate callback, optionally invoking it once with the
    /// current aggregate before any change can be delivered.
    pub fn subscribe(
        &self,
        callback: AggregateCallback,
        invoke_immediately: bool,
    ) -> SubscriptionHandle {
        let _lock = self.write_lock.lock();
        if invoke_immediately {
            callback(self.subscriptions.aggregate(&self.get()));
        }
        self.subscriptions.subscribe(callback)
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    fn commit(&self, next: Arc<UnreadMap>) {
        *self.state.write() = Arc::clone(&next);
        self.subscriptions.notify(&next);
    }
}
