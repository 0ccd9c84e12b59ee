//! The timed read/write lock of a single collection.
//!
//! Holders are counted per transaction. A waiter sleeps between polls and
//! asks the shared detector for a cycle every `check_interval` polls.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::deadlock::DeadlockDetector;
use crate::error::{CoreError, CoreResult};
use crate::types::{CollectionId, TransactionId};

/// Kind of collection lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared access.
    Read,
    /// Exclusive access.
    Write,
}

#[derive(Debug, Default)]
struct LockState {
    readers: HashMap<TransactionId, usize>,
    writer: Option<TransactionId>,
}

/// Counters of one lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockStats {
    /// Acquisitions that had to wait.
    pub waits: u64,
    /// Acquisitions failed with a deadlock.
    pub deadlocks: u64,
    /// Acquisitions failed with a timeout.
    pub timeouts: u64,
}

/// Timed read/write lock of one collection.
pub struct CollectionLock {
    collection: CollectionId,
    name: RwLock<String>,
    state: Mutex<LockState>,
    detector: Arc<DeadlockDetector>,
    sleep_period: Duration,
    check_interval: u32,
    waits: AtomicU64,
    deadlocks: AtomicU64,
    timeouts: AtomicU64,
}

/// Withdraws a blocked registration on every exit path of a wait loop.
struct Waiting<'a> {
    detector: &'a DeadlockDetector,
    trx: TransactionId,
    active: bool,
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        if self.active {
            self.detector.unset_blocked(self.trx);
        }
    }
}

impl CollectionLock {
    /// Creates the lock of collection `collection`.
    pub fn new(
        collection: CollectionId,
        name: impl Into<String>,
        detector: Arc<DeadlockDetector>,
        sleep_period: Duration,
        check_interval: u32,
    ) -> Self {
        Self {
            collection,
            name: RwLock::new(name.into()),
            state: Mutex::new(LockState::default()),
            detector,
            sleep_period,
            check_interval,
            waits: AtomicU64::new(0),
            deadlocks: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    /// Updates the collection name used in errors.
    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.write() = name.into();
    }

    /// Takes the lock without waiting. Returns `false` if it is held in a
    /// conflicting mode.
    pub fn try_lock(&self, trx: TransactionId, mode: LockMode) -> bool {
        let mut state = self.state.lock();
        match mode {
            LockMode::Read => {
                if state.writer.is_some() {
                    return false;
                }
                *state.readers.entry(trx).or_insert(0) += 1;
                self.detector.add_reader(trx, self.collection);
            }
            LockMode::Write => {
                if state.writer.is_some() || !state.readers.is_empty() {
                    return false;
                }
                state.writer = Some(trx);
                self.detector.add_writer(trx, self.collection);
            }
        }
        true
    }

    /// Takes the lock, polling until `timeout` expires.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Deadlock`] if waiting would close a wait-for cycle,
    ///   including a wait on a lock `trx` itself holds in the other mode
    /// - [`CoreError::LockTimeout`] if the lock is not granted in time
    ///
    /// In both cases nothing is held afterwards.
    pub fn lock(&self, trx: TransactionId, mode: LockMode, timeout: Duration) -> CoreResult<()> {
        if self.try_lock(trx, mode) {
            return Ok(());
        }
        if self.blocked_by_itself(trx, mode) {
            debug!(collection = %self.collection, %trx, ?mode, "lock conflicts with the caller's own lock");
            return Err(self.deadlock());
        }

        self.waits.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();
        let mut waiting = Waiting {
            detector: &self.detector,
            trx,
            active: true,
        };
        let closes_cycle = match mode {
            LockMode::Read => self.detector.set_reader_blocked(trx, self.collection),
            LockMode::Write => self.detector.set_writer_blocked(trx, self.collection),
        };
        if closes_cycle {
            waiting.active = false;
            return Err(self.deadlock());
        }

        let mut polls: u32 = 0;
        loop {
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                return Err(CoreError::LockTimeout {
                    collection: self.name.read().clone(),
                    waited_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                });
            }
            thread::sleep(self.sleep_period.min(timeout - elapsed));

            if self.try_lock(trx, mode) {
                waiting.active = false;
                debug!(
                    collection = %self.collection,
                    %trx,
                    ?mode,
                    waited_us = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX),
                    "lock acquired after waiting"
                );
                return Ok(());
            }

            polls = polls.wrapping_add(1);
            if self.check_interval > 0
                && polls % self.check_interval == 0
                && self.detector.detect_deadlock(trx)
            {
                waiting.active = false;
                return Err(self.deadlock());
            }
        }
    }

    /// True if `trx` itself holds a lock that excludes `mode`. Such a wait
    /// never ends: write locks are not reentrant and nothing is upgraded or
    /// downgraded in place.
    fn blocked_by_itself(&self, trx: TransactionId, mode: LockMode) -> bool {
        let state = self.state.lock();
        match mode {
            LockMode::Read => state.writer == Some(trx),
            LockMode::Write => state.writer == Some(trx) || state.readers.contains_key(&trx),
        }
    }

    fn deadlock(&self) -> CoreError {
        self.deadlocks.fetch_add(1, Ordering::Relaxed);
        CoreError::Deadlock {
            collection: self.name.read().clone(),
        }
    }

    /// Releases a lock held by `trx`. Returns `false` if it held none.
    pub fn unlock(&self, trx: TransactionId, mode: LockMode) -> bool {
        let mut state = self.state.lock();
        match mode {
            LockMode::Read => {
                let Some(count) = state.readers.get_mut(&trx) else {
                    return false;
                };
                *count -= 1;
                if *count == 0 {
                    state.readers.remove(&trx);
                    self.detector.unset_reader(trx, self.collection);
                }
            }
            LockMode::Write => {
                if state.writer != Some(trx) {
                    return false;
                }
                state.writer = None;
                self.detector.unset_writer(trx, self.collection);
            }
        }
        true
    }

    /// Shared lock released when the guard drops.
    ///
    /// # Errors
    ///
    /// See [`CollectionLock::lock`].
    pub fn read(&self, trx: TransactionId, timeout: Duration) -> CoreResult<ReadGuard<'_>> {
        self.lock(trx, LockMode::Read, timeout)?;
        Ok(ReadGuard { lock: self, trx })
    }

    /// Exclusive lock released when the guard drops.
    ///
    /// # Errors
    ///
    /// See [`CollectionLock::lock`].
    pub fn write(&self, trx: TransactionId, timeout: Duration) -> CoreResult<WriteGuard<'_>> {
        self.lock(trx, LockMode::Write, timeout)?;
        Ok(WriteGuard { lock: self, trx })
    }

    /// True if `trx` holds the lock in `mode`.
    #[must_use]
    pub fn is_held_by(&self, trx: TransactionId, mode: LockMode) -> bool {
        let state = self.state.lock();
        match mode {
            LockMode::Read => state.readers.contains_key(&trx),
            LockMode::Write => state.writer == Some(trx),
        }
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> LockStats {
        LockStats {
            waits: self.waits.load(Ordering::Relaxed),
            deadlocks: self.deadlocks.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for CollectionLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CollectionLock")
            .field("collection", &self.collection)
            .field("readers", &state.readers.len())
            .field("writer", &state.writer)
            .finish_non_exhaustive()
    }
}

/// Shared lock guard.
#[derive(Debug)]
pub struct ReadGuard<'a> {
    lock: &'a CollectionLock,
    trx: TransactionId,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock(self.trx, LockMode::Read);
    }
}

/// Exclusive lock guard.
#[derive(Debug)]
pub struct WriteGuard<'a> {
    lock: &'a CollectionLock,
    trx: TransactionId,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock(self.trx, LockMode::Write);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    fn lock_pair(detector: &Arc<DeadlockDetector>) -> (Arc<CollectionLock>, Arc<CollectionLock>) {
        let make = |id: u64, name: &str| {
            Arc::new(CollectionLock::new(
                CollectionId::new(id),
                name,
                Arc::clone(detector),
                Duration::from_millis(1),
                2,
            ))
        };
        (make(1, "a"), make(2, "b"))
    }

    #[test]
    fn readers_share_writers_exclude() {
        let lock = CollectionLock::new(
            CollectionId::new(1),
            "c",
            Arc::new(DeadlockDetector::default()),
            Duration::from_millis(1),
            5,
        );
        let t1 = TransactionId::new(1);
        let t2 = TransactionId::new(2);
        assert!(lock.try_lock(t1, LockMode::Read));
        assert!(lock.try_lock(t2, LockMode::Read));
        assert!(!lock.try_lock(t1, LockMode::Write));
        assert!(lock.unlock(t1, LockMode::Read));
        assert!(lock.unlock(t2, LockMode::Read));
        assert!(lock.try_lock(t1, LockMode::Write));
        assert!(!lock.try_lock(t2, LockMode::Read));
        assert!(!lock.unlock(t2, LockMode::Write));
    }

    #[test]
    fn waiting_on_own_lock_fails_at_once() {
        let detector = Arc::new(DeadlockDetector::default());
        let lock = CollectionLock::new(CollectionId::new(1), "c", Arc::clone(&detector), Duration::from_millis(1), 2);
        let trx = TransactionId::new(1);
        let timeout = Duration::from_secs(30);

        lock.lock(trx, LockMode::Read, timeout).unwrap();
        let start = Instant::now();
        let err = lock.lock(trx, LockMode::Write, timeout).unwrap_err();
        assert!(matches!(err, CoreError::Deadlock { .. }));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(lock.is_held_by(trx, LockMode::Read));
        assert!(!lock.is_held_by(trx, LockMode::Write));
        assert!(lock.unlock(trx, LockMode::Read));

        lock.lock(trx, LockMode::Write, timeout).unwrap();
        let err = lock.lock(trx, LockMode::Read, timeout).unwrap_err();
        assert!(matches!(err, CoreError::Deadlock { .. }));
        assert_eq!(lock.stats().deadlocks, 2);
        assert_eq!(detector.blocked_count(), 0);
    }

    #[test]
    fn timeout_leaves_nothing_behind() {
        let detector = Arc::new(DeadlockDetector::default());
        let (a, _) = lock_pair(&detector);
        let holder = TransactionId::new(1);
        let waiter = TransactionId::new(2);
        let _held = a.write(holder, Duration::from_secs(1)).unwrap();

        let err = a.lock(waiter, LockMode::Read, Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, CoreError::LockTimeout { .. }));
        assert!(!a.is_held_by(waiter, LockMode::Read));
        assert_eq!(detector.blocked_count(), 0);
        assert_eq!(a.stats().timeouts, 1);
    }

    #[test]
    fn guard_releases_on_drop() {
        let detector = Arc::new(DeadlockDetector::default());
        let (a, _) = lock_pair(&detector);
        let t1 = TransactionId::new(1);
        {
            let _guard = a.write(t1, Duration::from_secs(1)).unwrap();
            assert!(a.is_held_by(t1, LockMode::Write));
        }
        assert!(!a.is_held_by(t1, LockMode::Write));
    }

    #[test]
    fn opposite_order_resolves_with_one_deadlock() {
        let detector = Arc::new(DeadlockDetector::default());
        let (a, b) = lock_pair(&detector);
        let barrier = Arc::new(Barrier::new(2));

        let run = |first: Arc<CollectionLock>, second: Arc<CollectionLock>, trx: u64| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let trx = TransactionId::new(trx);
                first.lock(trx, LockMode::Write, Duration::from_secs(5)).unwrap();
                barrier.wait();
                let result = second.lock(trx, LockMode::Write, Duration::from_secs(5));
                if result.is_ok() {
                    second.unlock(trx, LockMode::Write);
                }
                first.unlock(trx, LockMode::Write);
                result
            })
        };

        let h1 = run(Arc::clone(&a), Arc::clone(&b), 1);
        let h2 = run(Arc::clone(&b), Arc::clone(&a), 2);
        let results = [h1.join().unwrap(), h2.join().unwrap()];

        let deadlocks = results
            .iter()
            .filter(|r| matches!(r, Err(CoreError::Deadlock { .. })))
            .count();
        assert_eq!(deadlocks, 1);
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(detector.blocked_count(), 0);
    }
}
