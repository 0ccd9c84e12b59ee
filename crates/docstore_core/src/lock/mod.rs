//! Collection locking.
//!
//! Each collection has one [`CollectionLock`]: a non-reentrant read/write
//! lock acquired by polling with a timeout. While a caller waits it is
//! registered as blocked in the database-wide [`DeadlockDetector`], which
//! fails the acquisition when waiting would close a cycle.

mod collection_lock;
mod deadlock;

pub use collection_lock::{CollectionLock, LockMode, LockStats, ReadGuard, WriteGuard};
pub use deadlock::DeadlockDetector;
