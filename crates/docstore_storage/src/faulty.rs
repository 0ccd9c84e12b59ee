//! Fault-injecting wrapper around another backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Shared control for a [`FaultyBackend`].
///
/// Appends and syncs have separate budgets. A budget counts down successful
/// calls; once it reaches zero every further call fails until the switch is
/// reset. A negative budget means "never fail".
#[derive(Debug, Clone)]
pub struct FaultSwitch {
    appends: Arc<AtomicI64>,
    syncs: Arc<AtomicI64>,
}

impl Default for FaultSwitch {
    fn default() -> Self {
        Self {
            appends: Arc::new(AtomicI64::new(-1)),
            syncs: Arc::new(AtomicI64::new(-1)),
        }
    }
}

fn consume(budget: &AtomicI64) -> bool {
    let mut current = budget.load(Ordering::SeqCst);
    loop {
        if current < 0 {
            return false;
        }
        if current == 0 {
            return true;
        }
        match budget.compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return false,
            Err(actual) => current = actual,
        }
    }
}

impl FaultSwitch {
    /// A switch that never fails until armed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets `successes` more appends through, then fails the rest.
    pub fn fail_after(&self, successes: u32) {
        self.appends.store(i64::from(successes), Ordering::SeqCst);
    }

    /// Fails the very next append.
    pub fn fail_now(&self) {
        self.fail_after(0);
    }

    /// Lets `successes` more syncs through, then fails the rest. Appends
    /// keep working.
    pub fn fail_sync_after(&self, successes: u32) {
        self.syncs.store(i64::from(successes), Ordering::SeqCst);
    }

    /// Fails the very next sync.
    pub fn fail_sync_now(&self) {
        self.fail_sync_after(0);
    }

    /// Disarms both budgets.
    pub fn reset(&self) {
        self.appends.store(-1, Ordering::SeqCst);
        self.syncs.store(-1, Ordering::SeqCst);
    }

    /// Consumes one unit of append budget. Returns `true` if the append
    /// must fail.
    pub fn should_fail(&self) -> bool {
        consume(&self.appends)
    }

    /// Consumes one unit of sync budget. Returns `true` if the sync must
    /// fail.
    pub fn should_fail_sync(&self) -> bool {
        consume(&self.syncs)
    }
}

/// Wraps a backend and fails appends or syncs when its [`FaultSwitch`]
/// says so.
///
/// Reads, sizes and truncation pass straight through. A failed sync leaves
/// the appended bytes in place, as a real device may.
pub struct FaultyBackend {
    inner: Box<dyn StorageBackend>,
    switch: FaultSwitch,
}

impl FaultyBackend {
    /// Wraps `inner`, controlled by `switch`.
    pub fn new(inner: Box<dyn StorageBackend>, switch: FaultSwitch) -> Self {
        Self { inner, switch }
    }
}

impl StorageBackend for FaultyBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if self.switch.should_fail() {
            return Err(StorageError::InjectedFault {
                operation: "append",
            });
        }
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.switch.should_fail_sync() {
            return Err(StorageError::InjectedFault { operation: "sync" });
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }
}

impl std::fmt::Debug for FaultyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultyBackend")
            .field("switch", &self.switch)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryBackend;

    #[test]
    fn unarmed_switch_passes_everything() {
        let switch = FaultSwitch::new();
        let mut backend = FaultyBackend::new(Box::new(InMemoryBackend::new()), switch);
        for _ in 0..10 {
            backend.append(b"x").unwrap();
        }
        assert_eq!(backend.size().unwrap(), 10);
    }

    #[test]
    fn fail_after_budget() {
        let switch = FaultSwitch::new();
        let mut backend = FaultyBackend::new(Box::new(InMemoryBackend::new()), switch.clone());
        switch.fail_after(2);
        backend.append(b"a").unwrap();
        backend.append(b"b").unwrap();
        assert!(matches!(
            backend.append(b"c"),
            Err(StorageError::InjectedFault { .. })
        ));
        assert_eq!(backend.size().unwrap(), 2);

        switch.reset();
        backend.append(b"d").unwrap();
        assert_eq!(backend.read_at(0, 3).unwrap(), b"abd");
    }

    #[test]
    fn sync_fault_keeps_appended_bytes() {
        let switch = FaultSwitch::new();
        let mut backend = FaultyBackend::new(Box::new(InMemoryBackend::new()), switch.clone());
        switch.fail_sync_now();
        backend.append(b"abc").unwrap();
        assert!(matches!(
            backend.sync(),
            Err(StorageError::InjectedFault { operation: "sync" })
        ));
        assert_eq!(backend.size().unwrap(), 3);

        switch.reset();
        backend.sync().unwrap();
    }
}
