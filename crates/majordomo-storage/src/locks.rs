//! Keyed advisory locks.
//!
//! Serializes concurrent writers of the same dedupe key without blocking
//! unrelated work: each 64-bit key maps to its own async mutex, held for
//! the duration of one check-and-insert. The unique index on the inbox
//! table is the backstop should two processes ever share the store.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Shared table of per-key async locks. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct AdvisoryLocks {
    table: Arc<DashMap<u64, Arc<Mutex<()>>>>,
}

/// Guard for one acquired advisory lock. Released on drop; the table entry
/// is reclaimed once no other waiter holds it.
#[derive(Debug)]
pub struct AdvisoryGuard {
    _guard: OwnedMutexGuard<()>,
    key: u64,
    entry: Arc<Mutex<()>>,
    table: Arc<DashMap<u64, Arc<Mutex<()>>>>,
}

impl Drop for AdvisoryGuard {
    fn drop(&mut self) {
        // Three strong refs are accounted for here: the map's, this guard's
        // `entry`, and the local clone in the closure check. More than that
        // means a waiter is queued; leave the entry for them.
        let entry = Arc::clone(&self.entry);
        self.table
            .remove_if(&self.key, |_, v| Arc::ptr_eq(v, &entry) && Arc::strong_count(v) <= 3);
    }
}

impl AdvisoryLocks {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting behind any current holder of the
    /// same key. Holders of other keys are unaffected.
    pub async fn acquire(&self, key: u64) -> AdvisoryGuard {
        let entry = Arc::clone(
            self.table
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let guard = Arc::clone(&entry).lock_owned().await;
        AdvisoryGuard {
            _guard: guard,
            key,
            entry,
            table: Arc::clone(&self.table),
        }
    }

    /// Number of keys currently tracked (observability only).
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.table.len()
    }
}
