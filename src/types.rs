//! Core types for the unread store.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::{self, HashMap};
use std::fmt;

/// Mapping from feed id to unread count.
///
/// Absent keys read as zero. The map keeps a running total alongside the
/// counts; [`UnreadMap::sum`] recomputes it from scratch.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "HashMap<String, u64>", into = "HashMap<String, u64>")]
pub struct UnreadMap {
    counts: HashMap<String, u64>,
    /// Exact running sum; cannot overflow for any number of `u64` counts.
    total: u128,
}

impl UnreadMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count for a feed (0 if absent).
    pub fn count(&self, feed_id: &str) -> u64 {
        self.counts.get(feed_id).copied().unwrap_or(0)
    }

    pub fn contains(&self, feed_id: &str) -> bool {
        self.counts.contains_key(feed_id)
    }

    /// Replace the count for a feed. Returns the previous count.
    pub fn set(&mut self, feed_id: impl Into<String>, count: u64) -> u64 {
        let previous = self.counts.insert(feed_id.into(), count).unwrap_or(0);
        self.total = self.total - u128::from(previous) + u128::from(count);
        previous
    }

    /// Remove a feed. Returns the count it had.
    pub fn remove(&mut self, feed_id: &str) -> u64 {
        let previous = self.counts.remove(feed_id).unwrap_or(0);
        self.total -= u128::from(previous);
        previous
    }

    pub fn clear(&mut self) {
        self.counts.clear();
        self.total = 0;
    }

    /// Overlay entries onto the map. Later duplicates win.
    pub fn overlay<I, K>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (K, u64)>,
        K: Into<String>,
    {
        for (feed_id, count) in entries {
            self.set(feed_id, count);
        }
    }

    /// Running total, maintained on every mutation. Saturates at `u64::MAX`.
    pub fn total(&self) -> u64 {
        u64::try_from(self.total).unwrap_or(u64::MAX)
    }

    /// Total recomputed from every value. Saturates at `u64::MAX`.
    pub fn sum(&self) -> u64 {
        saturating_sum(self.counts.values())
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, String, u64> {
        self.counts.iter()
    }

    pub fn to_hash_map(&self) -> HashMap<String, u64> {
        self.counts.clone()
    }

    /// Entries in feed-id order.
    pub fn entries(&self) -> Vec<UnreadEntry> {
        let mut entries: Vec<UnreadEntry> = self
            .counts
            .iter()
            .map(|(id, count)| UnreadEntry::new(id.clone(), *count))
            .collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }
}

fn saturating_sum<'a>(counts: impl Iterator<Item = &'a u64>) -> u64 {
    counts.copied().fold(0, u64::saturating_add)
}

impl From<HashMap<String, u64>> for UnreadMap {
    fn from(counts: HashMap<String, u64>) -> Self {
        let total = counts.values().map(|&c| u128::from(c)).sum();
        Self { counts, total }
    }
}

impl From<UnreadMap> for HashMap<String, u64> {
    fn from(map: UnreadMap) -> Self {
        map.counts
    }
}

impl<K: Into<String>> FromIterator<(K, u64)> for UnreadMap {
    fn from_iter<I: IntoIterator<Item = (K, u64)>>(iter: I) -> Self {
        let mut map = UnreadMap::new();
        map.overlay(iter);
        map
    }
}

impl fmt::Debug for UnreadMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.counts.iter()).finish()
    }
}

/// A single `(feed id, count)` pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadEntry {
    pub id: String,
    pub count: u64,
}

impl UnreadEntry {
    pub fn new(id: impl Into<String>, count: u64) -> Self {
        Self {
            id: id.into(),
            count,
        }
    }
}

impl<K: Into<String>> From<(K, u64)> for UnreadEntry {
    fn from((id, count): (K, u64)) -> Self {
        Self::new(id, count)
    }
}

/// Feed view used to scope partial fetches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedView {
    Articles,
    SocialMedia,
    Pictures,
    Videos,
    Audios,
    Notifications,
}

impl FeedView {
    /// Numeric code used by the remote API.
    pub fn code(self) -> u8 {
        match self {
            FeedView::Articles => 0,
            FeedView::SocialMedia => 1,
            FeedView::Pictures => 2,
            FeedView::Videos => 3,
            FeedView::Audios => 4,
            FeedView::Notifications => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(FeedView::Articles),
            1 => Some(FeedView::SocialMedia),
            2 => Some(FeedView::Pictures),
            3 => Some(FeedView::Videos),
            4 => Some(FeedView::Audios),
            5 => Some(FeedView::Notifications),
            _ => None,
        }
    }
}

/// What a remote fetch covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchScope {
    /// The full authoritative mapping.
    All,
    /// A partial mapping, optionally filtered by view.
    View(Option<FeedView>),
}

/// Unique identifier for a transaction.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxId(pub u64);

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", self.0)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxPhase {
    /// Built but not yet run.
    Pending,
    /// Local mutation is visible; persist not yet complete.
    OptimisticApplied,
    /// Remote save succeeded.
    Persisted,
    /// Either phase failed.
    Failed,
}
