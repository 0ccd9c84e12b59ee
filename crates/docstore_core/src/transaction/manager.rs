//! Transaction id allocation and tracking.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::transaction::state::Transaction;
use crate::types::TransactionId;

/// Hands out transaction contexts with unique ids.
///
/// Ids start at 1 and increase; the manager knows which transactions are
/// still alive.
#[derive(Debug)]
pub struct TransactionManager {
    next_id: AtomicU64,
    active: Arc<Mutex<BTreeSet<TransactionId>>>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    /// Creates a manager whose first id is 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            active: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    /// Begins a new transaction.
    pub fn begin(&self) -> Transaction {
        let id = TransactionId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.active.lock().insert(id);
        Transaction::registered(id, Arc::clone(&self.active))
    }

    /// Ids of transactions not yet dropped.
    #[must_use]
    pub fn active(&self) -> Vec<TransactionId> {
        self.active.lock().iter().copied().collect()
    }

    /// Number of live transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_tracked() {
        let manager = TransactionManager::new();
        let a = manager.begin();
        let b = manager.begin();
        assert!(a.id() < b.id());
        assert_eq!(manager.active(), vec![a.id(), b.id()]);

        drop(a);
        assert_eq!(manager.active_count(), 1);
        drop(b);
        assert_eq!(manager.active_count(), 0);
    }
}
