//! Operation counters.
//!
//! Every collection keeps an [`OperationStats`]; the counters are atomic and
//! can be read while mutations are in progress.
//!
//! ```rust,ignore
//! let snap = collection.operation_stats();
//! println!("inserts: {} rollbacks: {}", snap.inserts, snap.rollbacks);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of one collection's operations.
#[derive(Debug, Default)]
pub struct OperationStats {
    inserts: AtomicU64,
    updates: AtomicU64,
    replaces: AtomicU64,
    removes: AtomicU64,
    lookups: AtomicU64,
    /// Updates whose patch carried nothing but the key.
    noop_updates: AtomicU64,
    conflicts: AtomicU64,
    /// Mutations undone after an index or log failure.
    rollbacks: AtomicU64,
    markers_written: AtomicU64,
    bytes_written: AtomicU64,
    index_fills: AtomicU64,
}

impl OperationStats {
    /// Zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_update(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_replace(&self) {
        self.replaces.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_remove(&self) {
        self.removes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lookup(&self) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_noop_update(&self) {
        self.noop_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_marker(&self, bytes: u64) {
        self.markers_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_index_fill(&self) {
        self.index_fills.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            inserts: load(&self.inserts),
            updates: load(&self.updates),
            replaces: load(&self.replaces),
            removes: load(&self.removes),
            lookups: load(&self.lookups),
            noop_updates: load(&self.noop_updates),
            conflicts: load(&self.conflicts),
            rollbacks: load(&self.rollbacks),
            markers_written: load(&self.markers_written),
            bytes_written: load(&self.bytes_written),
            index_fills: load(&self.index_fills),
        }
    }
}

/// A point-in-time copy of [`OperationStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Successful inserts.
    pub inserts: u64,
    /// Successful updates, no-ops included.
    pub updates: u64,
    /// Successful replaces.
    pub replaces: u64,
    /// Successful removes.
    pub removes: u64,
    /// Key lookups.
    pub lookups: u64,
    /// Updates that changed nothing.
    pub noop_updates: u64,
    /// Revision conflicts.
    pub conflicts: u64,
    /// Rolled back mutations.
    pub rollbacks: u64,
    /// Markers written by mutations and index changes.
    pub markers_written: u64,
    /// Bytes of those markers.
    pub bytes_written: u64,
    /// Indexes filled from the live documents.
    pub index_fills: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        assert_eq!(OperationStats::new().snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn record_operations() {
        let stats = OperationStats::new();
        stats.record_insert();
        stats.record_marker(100);
        stats.record_marker(50);
        stats.record_conflict();

        let snap = stats.snapshot();
        assert_eq!(snap.inserts, 1);
        assert_eq!(snap.markers_written, 2);
        assert_eq!(snap.bytes_written, 150);
        assert_eq!(snap.conflicts, 1);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(OperationStats::new());
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let s = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..100 {
                        s.record_lookup();
                        s.record_marker(1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = stats.snapshot();
        assert_eq!(snap.lookups, 1000);
        assert_eq!(snap.bytes_written, 1000);
    }
}
