//! Collaborator ports.
//!
//! These traits define what the store needs from the outside world: a
//! remote source of truth to fetch counts from, a sink that durably records
//! them, and a marker told about feeds whose counts changed locally.

use crate::error::BoxError;
use crate::types::{FetchScope, UnreadEntry};
use async_trait::async_trait;
use std::collections::HashMap;

/// Authoritative remote unread counts.
#[async_trait]
pub trait RemoteUnreadSource: Send + Sync {
    /// Fetch the mapping for a scope. Failures go straight to the caller;
    /// nothing is retried.
    async fn fetch(&self, scope: FetchScope) -> Result<HashMap<String, u64>, BoxError>;
}

/// Durable storage for unread counts.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Record the given counts. Entries replace whatever was stored per feed.
    async fn save(&self, entries: &[UnreadEntry]) -> Result<(), BoxError>;

    /// Drop all stored counts.
    async fn clear(&self) -> Result<(), BoxError>;
}

/// Told about every feed whose count was incremented locally.
pub trait DirtyMarker: Send + Sync {
    fn mark_dirty(&self, feed_id: &str);
}

/// A [`DirtyMarker`] that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopDirtyMarker;

impl DirtyMarker for NoopDirtyMarker {
    fn mark_dirty(&self, _feed_id: &str) {}
}
