//! Database-wide wait-for graph.
//!
//! Edges run from a blocked transaction to the holders of the collection
//! it waits on.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::types::{CollectionId, TransactionId};

#[derive(Debug, Default)]
struct Holders {
    readers: HashSet<TransactionId>,
    writer: Option<TransactionId>,
}

impl Holders {
    fn is_empty(&self) -> bool {
        self.readers.is_empty() && self.writer.is_none()
    }
}

#[derive(Debug, Clone, Copy)]
struct Blocked {
    collection: CollectionId,
    write: bool,
}

#[derive(Debug, Default)]
struct WaitGraph {
    holders: HashMap<CollectionId, Holders>,
    blocked: HashMap<TransactionId, Blocked>,
}

impl WaitGraph {
    /// Transactions `trx` is waiting for, if it is blocked.
    fn waits_for(&self, trx: TransactionId) -> Vec<TransactionId> {
        let Some(blocked) = self.blocked.get(&trx) else {
            return Vec::new();
        };
        let Some(holders) = self.holders.get(&blocked.collection) else {
            return Vec::new();
        };
        let mut out: Vec<TransactionId> = holders.writer.into_iter().collect();
        if blocked.write {
            out.extend(holders.readers.iter().copied());
        }
        out.retain(|other| *other != trx);
        out
    }

    /// Depth-first search for a path from `start` back to itself.
    fn has_cycle(&self, start: TransactionId) -> bool {
        let mut visited = HashSet::new();
        let mut stack = self.waits_for(start);
        while let Some(next) = stack.pop() {
            if next == start {
                return true;
            }
            if visited.insert(next) {
                stack.extend(self.waits_for(next));
            }
        }
        false
    }
}

/// Wait-for graph shared by all collections of a database.
///
/// Lock holders and blocked waiters register here. A waiter that would
/// complete a cycle is told so and must give up.
#[derive(Debug)]
pub struct DeadlockDetector {
    enabled: AtomicBool,
    graph: Mutex<WaitGraph>,
}

impl Default for DeadlockDetector {
    fn default() -> Self {
        Self::new(true)
    }
}

impl DeadlockDetector {
    /// Creates a detector.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            graph: Mutex::new(WaitGraph::default()),
        }
    }

    /// Switches detection on or off. Disabling clears the graph.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        if !enabled {
            *self.graph.lock() = WaitGraph::default();
        }
    }

    /// True if detection is active.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Records that `trx` holds a read lock on `collection`.
    pub fn add_reader(&self, trx: TransactionId, collection: CollectionId) {
        if self.is_enabled() {
            let mut graph = self.graph.lock();
            graph.blocked.remove(&trx);
            graph.holders.entry(collection).or_default().readers.insert(trx);
        }
    }

    /// Records that `trx` holds the write lock on `collection`.
    pub fn add_writer(&self, trx: TransactionId, collection: CollectionId) {
        if self.is_enabled() {
            let mut graph = self.graph.lock();
            graph.blocked.remove(&trx);
            graph.holders.entry(collection).or_default().writer = Some(trx);
        }
    }

    /// Removes the read registration of `trx`.
    pub fn unset_reader(&self, trx: TransactionId, collection: CollectionId) {
        self.unset(collection, |holders| {
            holders.readers.remove(&trx);
        });
    }

    /// Removes the write registration of `trx`.
    pub fn unset_writer(&self, trx: TransactionId, collection: CollectionId) {
        self.unset(collection, |holders| {
            if holders.writer == Some(trx) {
                holders.writer = None;
            }
        });
    }

    fn unset(&self, collection: CollectionId, f: impl FnOnce(&mut Holders)) {
        if !self.is_enabled() {
            return;
        }
        let mut graph = self.graph.lock();
        if let Some(holders) = graph.holders.get_mut(&collection) {
            f(holders);
            if holders.is_empty() {
                graph.holders.remove(&collection);
            }
        }
    }

    /// Registers `trx` as waiting for a read lock.
    ///
    /// Returns `true` if the wait closes a cycle; the registration is then
    /// withdrawn again.
    pub fn set_reader_blocked(&self, trx: TransactionId, collection: CollectionId) -> bool {
        self.set_blocked(trx, collection, false)
    }

    /// Registers `trx` as waiting for the write lock.
    ///
    /// Returns `true` if the wait closes a cycle; the registration is then
    /// withdrawn again.
    pub fn set_writer_blocked(&self, trx: TransactionId, collection: CollectionId) -> bool {
        self.set_blocked(trx, collection, true)
    }

    fn set_blocked(&self, trx: TransactionId, collection: CollectionId, write: bool) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let mut graph = self.graph.lock();
        graph.blocked.insert(trx, Blocked { collection, write });
        if graph.has_cycle(trx) {
            graph.blocked.remove(&trx);
            debug!(%trx, %collection, write, "deadlock detected on block");
            return true;
        }
        false
    }

    /// Withdraws the blocked registration of `trx`.
    pub fn unset_blocked(&self, trx: TransactionId) {
        if self.is_enabled() {
            self.graph.lock().blocked.remove(&trx);
        }
    }

    /// Re-checks a registered waiter. Returns `true` and withdraws the
    /// registration if it is part of a cycle.
    pub fn detect_deadlock(&self, trx: TransactionId) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let mut graph = self.graph.lock();
        if !graph.blocked.contains_key(&trx) || !graph.has_cycle(trx) {
            return false;
        }
        graph.blocked.remove(&trx);
        debug!(%trx, "deadlock detected on re-check");
        true
    }

    /// Number of registered waiters.
    #[must_use]
    pub fn blocked_count(&self) -> usize {
        self.graph.lock().blocked.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: CollectionId = CollectionId::new(1);
    const B: CollectionId = CollectionId::new(2);
    const T1: TransactionId = TransactionId::new(1);
    const T2: TransactionId = TransactionId::new(2);
    const T3: TransactionId = TransactionId::new(3);

    #[test]
    fn opposite_order_writers_deadlock() {
        let detector = DeadlockDetector::default();
        detector.add_writer(T1, A);
        detector.add_writer(T2, B);

        assert!(!detector.set_writer_blocked(T1, B));
        assert!(detector.set_writer_blocked(T2, A));
        assert_eq!(detector.blocked_count(), 1);
    }

    #[test]
    fn readers_do_not_block_readers() {
        let detector = DeadlockDetector::default();
        detector.add_reader(T1, A);
        detector.add_writer(T2, B);
        assert!(!detector.set_writer_blocked(T1, B));
        // T2 only wants to read A, which T1 holds for reading.
        assert!(!detector.set_reader_blocked(T2, A));
    }

    #[test]
    fn writer_waits_for_readers() {
        let detector = DeadlockDetector::default();
        detector.add_reader(T1, A);
        detector.add_writer(T2, B);
        assert!(!detector.set_reader_blocked(T1, B));
        assert!(detector.set_writer_blocked(T2, A));
    }

    #[test]
    fn three_party_cycle() {
        let detector = DeadlockDetector::default();
        detector.add_writer(T1, A);
        detector.add_writer(T2, B);
        detector.add_writer(T3, CollectionId::new(3));
        assert!(!detector.set_writer_blocked(T1, B));
        assert!(!detector.set_writer_blocked(T2, CollectionId::new(3)));
        assert!(detector.set_writer_blocked(T3, A));
    }

    #[test]
    fn released_holder_breaks_cycle() {
        let detector = DeadlockDetector::default();
        detector.add_writer(T1, A);
        detector.add_writer(T2, B);
        assert!(!detector.set_writer_blocked(T1, B));
        detector.unset_writer(T1, A);
        assert!(!detector.set_writer_blocked(T2, A));
        assert!(!detector.detect_deadlock(T1));
    }

    #[test]
    fn disabled_detector_sees_nothing() {
        let detector = DeadlockDetector::new(false);
        detector.add_writer(T1, A);
        detector.add_writer(T2, B);
        assert!(!detector.set_writer_blocked(T1, B));
        assert!(!detector.set_writer_blocked(T2, A));
        assert_eq!(detector.blocked_count(), 0);
    }
}
