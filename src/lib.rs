//! # Unread Sync
//!
//! An optimistic, transactional store for per-feed unread counts, kept in
//! step with a remote source of truth.
//!
//! ## Core Concepts
//!
//! - **State**: a feed-id → count map, replaced atomically on every change
//! - **Transactions**: an optimistic local mutation followed by a detached
//!   persist step; persist failures are reported, never rolled back
//! - **Subscriptions**: aggregate callbacks fed the summed total on every
//!   change, plus an event channel for persistence outcomes
//! - **Reconciliation**: full refetch (replace), per-view refetch (overlay)
//!   and hydration from already-durable data
//!
//! ## Example
//!
//! ```ignore
//! use unread_sync::{StoreConfig, UnreadStore, NoopDirtyMarker};
//!
//! let store = UnreadStore::new(StoreConfig::default(), source, sink, Arc::new(NoopDirtyMarker))?;
//!
//! let handle = store.subscribe(|total| println!("{} unread", total), true);
//!
//! // Visible immediately; persisted in the background
//! let inc = store.increment_by_feed_id("feed-1", 3)?;
//! assert_eq!(store.count("feed-1"), inc.previous + 3);
//!
//! // Optional: wait for durability
//! inc.persist.wait().await?;
//!
//! // Replace everything with the remote view
//! store.fetch_all().await?;
//! ```

pub mod adapters;
pub mod error;
pub mod ports;
pub mod state;
pub mod store;
pub mod subscriptions;
pub mod transaction;
pub mod types;

// Re-exports
pub use adapters::{MemoryError, MemorySink, MemorySource, RecordingDirtyMarker};
pub use error::{BoxError, Result, UnreadError};
pub use ports::{DirtyMarker, NoopDirtyMarker, PersistenceSink, RemoteUnreadSource};
pub use state::StateContainer;
pub use store::{Fetched, Increment, StoreConfig, UnreadStore};
pub use subscriptions::{
    AggregateCallback, AggregateMode, Aggregator, DropReason, EventConfig, EventHandle,
    StoreEvent, SubscriptionHandle, SubscriptionId, SubscriptionManager,
};
pub use transaction::{PersistTicket, Transaction};
pub use types::*;
