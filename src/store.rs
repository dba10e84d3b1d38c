//! Main UnreadStore tying all components together.

use crate::error::{Result, UnreadError};
use crate::ports::{DirtyMarker, PersistenceSink, RemoteUnreadSource};
use crate::state::StateContainer;
use crate::subscriptions::{
    AggregateMode, EventConfig, EventHandle, StoreEvent, SubscriptionHandle, SubscriptionId,
    SubscriptionManager,
};
use crate::transaction::{PersistTicket, Transaction};
use crate::types::{FeedView, FetchScope, TxId, UnreadEntry, UnreadMap};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How aggregates delivered to subscribers are computed.
    pub aggregate: AggregateMode,

    /// Default buffer size for event subscriptions.
    pub event_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            aggregate: AggregateMode::FullRecompute,
            event_buffer_size: EventConfig::default().buffer_size,
        }
    }
}

impl StoreConfig {
    /// Parse a JSON config. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: StoreConfig = serde_json::from_str(json)?;
        if config.event_buffer_size == 0 {
            return Err(UnreadError::Config("event_buffer_size must be positive".into()));
        }
        Ok(config)
    }
}

/// Result of an increment.
#[derive(Debug)]
pub struct Increment {
    /// Count before the increment.
    pub previous: u64,
    /// Count after clamping at zero.
    pub current: u64,
    pub persist: PersistTicket,
}

/// Result of a remote fetch.
#[derive(Debug)]
pub struct Fetched {
    /// The mapping the remote returned.
    pub counts: HashMap<String, u64>,
    pub persist: PersistTicket,
}

struct Inner {
    config: StoreConfig,
    container: Arc<StateContainer>,
    source: Arc<dyn RemoteUnreadSource>,
    sink: Arc<dyn PersistenceSink>,
    dirty: Arc<dyn DirtyMarker>,
    runtime: Handle,
    next_tx: AtomicU64,
}

/// The unread-count store.
///
/// Provides a unified interface for:
/// - Optimistic updates with detached persistence
/// - Full and per-view reconciliation against the remote source
/// - Aggregate subscriptions and persistence outcome events
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct UnreadStore {
    inner: Arc<Inner>,
}

impl UnreadStore {
    /// Create a store on the current tokio runtime.
    pub fn new(
        config: StoreConfig,
        source: Arc<dyn RemoteUnreadSource>,
        sink: Arc<dyn PersistenceSink>,
        dirty: Arc<dyn DirtyMarker>,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| UnreadError::NoRuntime)?;
        Ok(Self::with_handle(config, runtime, source, sink, dirty))
    }

    /// Create a store that spawns persist tasks on `runtime`.
    pub fn with_handle(
        config: StoreConfig,
        runtime: Handle,
        source: Arc<dyn RemoteUnreadSource>,
        sink: Arc<dyn PersistenceSink>,
        dirty: Arc<dyn DirtyMarker>,
    ) -> Self {
        let subscriptions = Arc::new(SubscriptionManager::new(config.aggregate));
        let container = Arc::new(StateContainer::new(subscriptions));

        Self {
            inner: Arc::new(Inner {
                config,
                container,
                source,
                sink,
                dirty,
                runtime,
                next_tx: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// The underlying state container.
    pub fn container(&self) -> Arc<StateContainer> {
        Arc::clone(&self.inner.container)
    }

    /// Runtime that persist tasks are spawned on.
    pub fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        self.inner.container.subscriptions()
    }

    // --- Reads ---

    /// Current snapshot.
    pub fn get(&self) -> Arc<UnreadMap> {
        self.inner.container.get()
    }

    /// Count for one feed (0 if absent).
    pub fn count(&self, feed_id: &str) -> u64 {
        self.get().count(feed_id)
    }

    /// Current aggregate under the configured mode.
    pub fn total(&self) -> u64 {
        self.subscriptions().aggregate(&self.get())
    }

    // --- Transactions ---

    /// Start an empty transaction with a fresh id.
    pub fn transaction(&self) -> Transaction {
        Transaction::new(TxId(self.inner.next_tx.fetch_add(1, Ordering::SeqCst)))
    }

    /// Overlay `entries` in one transaction: one visible update, one save.
    pub fn update_many<I, E>(&self, entries: I) -> Result<PersistTicket>
    where
        I: IntoIterator<Item = E>,
        E: Into<UnreadEntry>,
    {
        let entries: Vec<UnreadEntry> = entries.into_iter().map(Into::into).collect();

        let container = self.container();
        let sink = Arc::clone(&self.inner.sink);
        let to_apply = entries.clone();

        self.observed(self.transaction(), entries.clone())
            .optimistic(move || {
                container.update(|map| {
                    map.overlay(to_apply.into_iter().map(|e| (e.id, e.count)));
                });
                Ok(())
            })
            .persist(move || async move { sink.save(&entries).await.map_err(UnreadError::persist) })
            .spawn(&self.inner.runtime)
    }

    /// Set one feed's count.
    pub fn update_by_feed_id(&self, feed_id: &str, count: u64) -> Result<PersistTicket> {
        self.update_many([(feed_id, count)])
    }

    /// Add `delta` to a feed's count, clamping at zero.
    ///
    /// The read and the write happen under the writer lock, so concurrent
    /// increments never lose updates.
    pub fn increment_by_feed_id(&self, feed_id: &str, delta: i64) -> Result<Increment> {
        let result: Result<Increment> = self.inner.container.with_write_lock(|| {
            let previous = self.count(feed_id);
            let current = apply_delta(previous, delta);
            let persist = self.update_many([(feed_id, current)])?;
            Ok(Increment {
                previous,
                current,
                persist,
            })
        });

        self.inner.dirty.mark_dirty(feed_id);
        result
    }

    // --- Reset ---

    /// Empty the local map immediately and ask the sink to clear.
    ///
    /// The local clear always succeeds. The remote clear runs detached; a
    /// failure is logged and published as [`StoreEvent::RemoteClearFailed`].
    pub fn clear(&self) -> JoinHandle<()> {
        self.inner.container.set(|_| UnreadMap::new());
        self.subscriptions().broadcast(StoreEvent::Reset);
        debug!("Unread map reset");

        let sink = Arc::clone(&self.inner.sink);
        let subscriptions = Arc::clone(self.subscriptions());
        self.inner.runtime.spawn(async move {
            if let Err(e) = sink.clear().await {
                warn!(error = %e, "Remote unread clear failed");
                subscriptions.broadcast(StoreEvent::RemoteClearFailed {
                    error: e.to_string(),
                });
            }
        })
    }

    // --- Reconciliation ---

    /// Fetch the full mapping and make the local map exactly equal to it.
    ///
    /// Feeds missing from the result are dropped. The persist phase clears
    /// the sink before saving, in one task.
    pub async fn fetch_all(&self) -> Result<Fetched> {
        let counts = self
            .inner
            .source
            .fetch(FetchScope::All)
            .await
            .map_err(UnreadError::fetch)?;
        debug!(entries = counts.len(), "Fetched all unread counts");

        let replacement: UnreadMap = counts.clone().into();
        let entries = replacement.entries();
        let container = self.container();
        let sink = Arc::clone(&self.inner.sink);
        let to_save = entries.clone();

        let persist = self
            .observed(self.transaction(), entries)
            .optimistic(move || {
                container.set(|_| replacement);
                Ok(())
            })
            .persist(move || async move {
                sink.clear().await.map_err(UnreadError::persist)?;
                sink.save(&to_save).await.map_err(UnreadError::persist)
            })
            .spawn(&self.inner.runtime)?;

        Ok(Fetched { counts, persist })
    }

    /// Fetch a partial mapping and overlay it, leaving other feeds alone.
    pub async fn fetch_by_view(&self, view: Option<FeedView>) -> Result<Fetched> {
        let counts = self
            .inner
            .source
            .fetch(FetchScope::View(view))
            .await
            .map_err(UnreadError::fetch)?;
        debug!(?view, entries = counts.len(), "Fetched unread counts for view");

        let persist = self.update_many(UnreadMap::from(counts.clone()).entries())?;
        Ok(Fetched { counts, persist })
    }

    /// Overlay counts that are already durable. No persist step.
    pub fn hydrate<I, E>(&self, entries: I)
    where
        I: IntoIterator<Item = E>,
        E: Into<UnreadEntry>,
    {
        let entries: Vec<UnreadEntry> = entries.into_iter().map(Into::into).collect();
        debug!(entries = entries.len(), "Hydrating unread counts");
        self.inner.container.update(|map| {
            map.overlay(entries.into_iter().map(|e| (e.id, e.count)));
        });
    }

    // --- Subscriptions ---

    /// Receive the aggregate total on every change.
    ///
    /// With `invoke_immediately`, `callback` runs once right away with the
    /// current total, before any change-driven call.
    pub fn subscribe<F>(&self, callback: F, invoke_immediately: bool) -> SubscriptionHandle
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.inner
            .container
            .subscribe(Arc::new(callback), invoke_immediately)
    }

    /// Number of aggregate subscribers.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions().subscription_count()
    }

    /// Receive persistence outcome events with the configured buffer size.
    pub fn subscribe_events(&self) -> Result<EventHandle> {
        self.subscribe_events_with(EventConfig {
            buffer_size: self.inner.config.event_buffer_size,
        })
    }

    /// Fails with [`UnreadError::Config`] for a zero `buffer_size`.
    pub fn subscribe_events_with(&self, config: EventConfig) -> Result<EventHandle> {
        self.subscriptions().subscribe_events(config)
    }

    pub fn unsubscribe_events(&self, id: SubscriptionId) {
        self.subscriptions().unsubscribe_events(id);
    }

    /// Number of live event subscribers.
    pub fn event_subscription_count(&self) -> usize {
        self.subscriptions().event_subscription_count()
    }

    /// Attach event publishing to a transaction.
    fn observed(&self, tx: Transaction, entries: Vec<UnreadEntry>) -> Transaction {
        let subscriptions = Arc::clone(self.subscriptions());
        tx.on_settled(move |tx, result| {
            let event = match result {
                Ok(()) => StoreEvent::Persisted {
                    tx,
                    entries: entries.len(),
                },
                Err(e) => StoreEvent::PersistFailed {
                    tx,
                    entries,
                    error: e.to_string(),
                },
            };
            subscriptions.broadcast(event);
        })
    }
}

/// `max(0, current + delta)` without overflow.
fn apply_delta(current: u64, delta: i64) -> u64 {
    if delta >= 0 {
        current.saturating_add(delta.unsigned_abs())
    } else {
        current.saturating_sub(delta.unsigned_abs())
    }
}
