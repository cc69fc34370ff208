//! Process-local counters, monotone since start.
//!
//! Heartbeats carry a snapshot; the registry folds deltas server-side.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters every connector reports.
#[derive(Debug, Default)]
pub struct ConnectorCounters {
    /// Envelopes accepted by the switchboard (first time).
    pub ingested: AtomicU64,
    /// Envelopes accepted as duplicates.
    pub duplicates: AtomicU64,
    /// Submissions that failed.
    pub errors: AtomicU64,
    /// Envelopes submitted through backfill.
    pub backfilled: AtomicU64,
    /// Source read batches.
    pub reads: AtomicU64,
}

impl ConnectorCounters {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot for a heartbeat.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, u64> {
        HashMap::from([
            ("ingested".to_owned(), self.ingested.load(Ordering::Relaxed)),
            (
                "duplicates".to_owned(),
                self.duplicates.load(Ordering::Relaxed),
            ),
            ("errors".to_owned(), self.errors.load(Ordering::Relaxed)),
            (
                "backfilled".to_owned(),
                self.backfilled.load(Ordering::Relaxed),
            ),
            ("reads".to_owned(), self.reads.load(Ordering::Relaxed)),
        ])
    }
}
