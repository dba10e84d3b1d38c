//! Subscription types for aggregate observers and outcome events.

use crate::types::{TxId, UnreadEntry};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};

use super::manager::SubscriptionManager;

/// Callback receiving the aggregate unread total.
pub type AggregateCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle returned by an aggregate subscription.
///
/// Dropping the handle does not unsubscribe; call [`SubscriptionHandle::unsubscribe`].
#[derive(Debug)]
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub(crate) manager: Weak<SubscriptionManager>,
}

impl SubscriptionHandle {
    /// Stop future notifications. Returns false if already gone.
    pub fn unsubscribe(self) -> bool {
        match self.manager.upgrade() {
            Some(manager) => manager.unsubscribe(self.id),
            None => false,
        }
    }
}

/// Configuration for an event subscription.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventConfig {
    /// Max buffered events before dropping the subscriber.
    /// Default: 256
    pub buffer_size: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { buffer_size: 256 }
    }
}

/// Out-of-band events about persistence outcomes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// A transaction's persist phase succeeded.
    Persisted { tx: TxId, entries: usize },

    /// A transaction's persist phase failed. The optimistic values are
    /// still in the store; a caller wanting rollback can use `entries`.
    PersistFailed {
        tx: TxId,
        entries: Vec<UnreadEntry>,
        error: String,
    },

    /// The local map was reset.
    Reset,

    /// The remote clear issued by a reset failed.
    RemoteClearFailed { error: String },

    /// Subscription was dropped.
    Dropped { reason: DropReason },
}

/// Why an event subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Handle to receive outcome events.
pub struct EventHandle {
    pub id: SubscriptionId,
    pub receiver: crossbeam_channel::Receiver<StoreEvent>,
}

impl EventHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<StoreEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<StoreEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<StoreEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently buffered.
    pub fn drain(&self) -> Vec<StoreEvent> {
        self.receiver.try_iter().collect()
    }
}
