//! Aggregate computation over the unread map.

use crate::types::UnreadMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// How the aggregate total is produced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AggregateMode {
    /// Sum every value on every notification.
    #[default]
    FullRecompute,
    /// Use the map's running total, checking it against a full sum every
    /// `revalidate_every` computations.
    Incremental { revalidate_every: u64 },
}

/// Computes aggregates according to an [`AggregateMode`].
pub struct Aggregator {
    mode: AggregateMode,
    computed: AtomicU64,
}

impl Aggregator {
    pub fn new(mode: AggregateMode) -> Self {
        Self {
            mode,
            computed: AtomicU64::new(0),
        }
    }

    pub fn mode(&self) -> AggregateMode {
        self.mode
    }

    /// Aggregate for a snapshot.
    pub fn aggregate(&self, map: &UnreadMap) -> u64 {
        match self.mode {
            AggregateMode::FullRecompute => map.sum(),
            AggregateMode::Incremental { revalidate_every } => {
                let n = self.computed.fetch_add(1, Ordering::Relaxed) + 1;
                let running = map.total();
                if revalidate_every == 0 || n % revalidate_every != 0 {
                    return running;
                }

                let full = map.sum();
                if full != running {
                    warn!(running, full, "Unread aggregate drifted; using full sum");
                }
                full
            }
        }
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(AggregateMode::default())
    }
}
