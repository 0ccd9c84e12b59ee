//! Transaction state.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::collection::DocumentCollection;
use crate::error::CoreResult;
use crate::lock::{CollectionLock, LockMode};
use crate::types::TransactionId;

/// A transaction context.
///
/// Collections named in the no-lock set are accessed without taking their
/// lock, because the caller already serializes access at a higher level.
pub struct Transaction {
    id: TransactionId,
    no_lock: Mutex<HashSet<String>>,
    held: Mutex<Vec<(Arc<CollectionLock>, LockMode)>>,
    registry: Option<Arc<Mutex<BTreeSet<TransactionId>>>>,
}

impl Transaction {
    /// A standalone transaction with the given id.
    #[must_use]
    pub fn new(id: TransactionId) -> Self {
        Self {
            id,
            no_lock: Mutex::new(HashSet::new()),
            held: Mutex::new(Vec::new()),
            registry: None,
        }
    }

    pub(crate) fn registered(id: TransactionId, registry: Arc<Mutex<BTreeSet<TransactionId>>>) -> Self {
        Self {
            id,
            no_lock: Mutex::new(HashSet::new()),
            held: Mutex::new(Vec::new()),
            registry: Some(registry),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Declares that the collection named `name` needs no locking.
    pub fn add_no_lock(&self, name: impl Into<String>) {
        self.no_lock.lock().insert(name.into());
    }

    /// Withdraws a no-lock declaration.
    pub fn remove_no_lock(&self, name: &str) -> bool {
        self.no_lock.lock().remove(name)
    }

    /// True if `name` was declared as needing no lock.
    #[must_use]
    pub fn is_no_lock(&self, name: &str) -> bool {
        self.no_lock.lock().contains(name)
    }

    /// Locks `collection` for the rest of the transaction.
    ///
    /// Taking a mode that is already held is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::LockTimeout`] or
    /// [`crate::CoreError::Deadlock`]; nothing is held afterwards.
    pub fn lock_collection(&self, collection: &DocumentCollection, mode: LockMode, timeout: Duration) -> CoreResult<()> {
        let lock = collection.collection_lock();
        if lock.is_held_by(self.id, mode) {
            return Ok(());
        }
        lock.lock(self.id, mode, timeout)?;
        self.held.lock().push((Arc::clone(lock), mode));
        Ok(())
    }

    /// Releases a lock taken with [`Transaction::lock_collection`].
    /// Returns `false` if it was not held.
    pub fn unlock_collection(&self, collection: &DocumentCollection, mode: LockMode) -> bool {
        let lock = collection.collection_lock();
        let mut held = self.held.lock();
        let Some(position) = held
            .iter()
            .rposition(|(l, m)| Arc::ptr_eq(l, lock) && *m == mode)
        else {
            return false;
        };
        held.remove(position);
        lock.unlock(self.id, mode)
    }

    /// Number of locks currently held.
    #[must_use]
    pub fn held_locks(&self) -> usize {
        self.held.lock().len()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        for (lock, mode) in self.held.get_mut().drain(..).rev() {
            lock.unlock(self.id, mode);
        }
        if let Some(registry) = &self.registry {
            registry.lock().remove(&self.id);
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("held_locks", &self.held_locks())
            .finish_non_exhaustive()
    }
}
