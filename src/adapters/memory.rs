//! In-memory collaborators for tests and embedding.

use crate::error::BoxError;
use crate::ports::{DirtyMarker, PersistenceSink, RemoteUnreadSource};
use crate::types::{FetchScope, UnreadEntry, UnreadMap};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::watch;

/// Failure injected into an in-memory collaborator.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct MemoryError(pub String);

/// A [`PersistenceSink`] backed by an in-memory map.
///
/// Records every save batch and clear, can be told to fail, and can be
/// paused so that persists stay in flight until resumed.
pub struct MemorySink {
    stored: Mutex<UnreadMap>,
    saves: Mutex<Vec<Vec<UnreadEntry>>>,
    clears: AtomicUsize,
    fail_saves: AtomicBool,
    fail_clears: AtomicBool,
    /// `true` while paused.
    gate: watch::Sender<bool>,
}

impl MemorySink {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            stored: Mutex::new(UnreadMap::new()),
            saves: Mutex::new(Vec::new()),
            clears: AtomicUsize::new(0),
            fail_saves: AtomicBool::new(false),
            fail_clears: AtomicBool::new(false),
            gate,
        }
    }

    /// What the sink currently holds.
    pub fn stored(&self) -> UnreadMap {
        self.stored.lock().clone()
    }

    /// Every save batch, in call order.
    pub fn saves(&self) -> Vec<Vec<UnreadEntry>> {
        self.saves.lock().clone()
    }

    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn fail_clears(&self, fail: bool) {
        self.fail_clears.store(fail, Ordering::SeqCst);
    }

    /// Hold saves and clears until [`MemorySink::resume`].
    pub fn pause(&self) {
        self.gate.send_replace(true);
    }

    pub fn resume(&self) {
        self.gate.send_replace(false);
    }

    async fn wait_open(&self) {
        let mut rx = self.gate.subscribe();
        // The sender lives in `self`, so this only ends once resumed.
        let _ = rx.wait_for(|paused| !*paused).await;
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceSink for MemorySink {
    async fn save(&self, entries: &[UnreadEntry]) -> Result<(), BoxError> {
        self.wait_open().await;
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(MemoryError("save rejected".into()).into());
        }

        self.saves.lock().push(entries.to_vec());
        self.stored
            .lock()
            .overlay(entries.iter().map(|e| (e.id.clone(), e.count)));
        Ok(())
    }

    async fn clear(&self) -> Result<(), BoxError> {
        self.wait_open().await;
        self.clears.fetch_add(1, Ordering::SeqCst);
        if self.fail_clears.load(Ordering::SeqCst) {
            return Err(MemoryError("clear rejected".into()).into());
        }

        self.stored.lock().clear();
        Ok(())
    }
}

/// A [`RemoteUnreadSource`] serving fixed mappings per scope.
#[derive(Default)]
pub struct MemorySource {
    responses: Mutex<HashMap<FetchScope, HashMap<String, u64>>>,
    fetches: Mutex<Vec<FetchScope>>,
    failing: AtomicBool,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `counts` for `scope`. Unconfigured scopes return an empty map.
    pub fn respond<I, K>(&self, scope: FetchScope, counts: I)
    where
        I: IntoIterator<Item = (K, u64)>,
        K: Into<String>,
    {
        let counts = counts.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self.responses.lock().insert(scope, counts);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Scopes fetched so far, in call order.
    pub fn fetches(&self) -> Vec<FetchScope> {
        self.fetches.lock().clone()
    }
}

#[async_trait]
impl RemoteUnreadSource for MemorySource {
    async fn fetch(&self, scope: FetchScope) -> Result<HashMap<String, u64>, BoxError> {
        self.fetches.lock().push(scope);
        if self.failing.load(Ordering::SeqCst) {
            return Err(MemoryError("source unavailable".into()).into());
        }
        Ok(self.responses.lock().get(&scope).cloned().unwrap_or_default())
    }
}

/// A [`DirtyMarker`] that remembers every feed it was told about.
#[derive(Default)]
pub struct RecordingDirtyMarker {
    marked: Mutex<Vec<String>>,
}

impl RecordingDirtyMarker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn marked(&self) -> Vec<String> {
        self.marked.lock().clone()
    }
}

impl DirtyMarker for RecordingDirtyMarker {
    fn mark_dirty(&self, feed_id: &str) {
        self.marked.lock().push(feed_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sink_records_saves() {
        let sink = MemorySink::new();
        sink.save(&[UnreadEntry::new("a", 1), UnreadEntry::new("b", 2)])
            .await
            .unwrap();
        sink.save(&[UnreadEntry::new("a", 5)]).await.unwrap();

        assert_eq!(sink.saves().len(), 2);
        assert_eq!(sink.stored().count("a"), 5);
        assert_eq!(sink.stored().total(), 7);

        sink.clear().await.unwrap();
        assert!(sink.stored().is_empty());
        assert_eq!(sink.clear_count(), 1);
    }

    #[tokio::test]
    async fn test_sink_failure() {
        let sink = MemorySink::new();
        sink.fail_saves(true);
        assert!(sink.save(&[UnreadEntry::new("a", 1)]).await.is_err());
        assert!(sink.saves().is_empty());
    }

    #[tokio::test]
    async fn test_sink_pause_holds_save() {
        let sink = Arc::new(MemorySink::new());
        sink.pause();

        let task = {
            let sink = Arc::clone(&sink);
            tokio::spawn(async move { sink.save(&[UnreadEntry::new("a", 1)]).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sink.saves().is_empty());

        sink.resume();
        task.await.unwrap().unwrap();
        assert_eq!(sink.saves().len(), 1);
    }

    #[tokio::test]
    async fn test_source_scopes() {
        let source = MemorySource::new();
        source.respond(FetchScope::All, [("a", 1)]);

        let all = source.fetch(FetchScope::All).await.unwrap();
        assert_eq!(all.get("a"), Some(&1));

        let view = source.fetch(FetchScope::View(None)).await.unwrap();
        assert!(view.is_empty());

        source.set_failing(true);
        assert!(source.fetch(FetchScope::All).await.is_err());
        assert_eq!(source.fetches().len(), 3);
    }
}
