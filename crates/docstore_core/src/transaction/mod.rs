//! Transaction contexts.
//!
//! A transaction here is a context object, not an isolation mechanism: it
//! carries an id for the lock manager and deadlock detector, the set of
//! collections it declared as "no lock needed", and the collection locks
//! it currently holds. Held locks are released when it is dropped.

mod manager;
mod state;

pub use manager::TransactionManager;
pub use state::Transaction;
