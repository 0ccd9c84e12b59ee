//! # docstore core
//!
//! Single-node transactional document-collection engine.
//!
//! This crate provides:
//! - Document collections with insert, update, replace and remove
//! - An append-only, segmented collection log with checksummed markers
//! - Primary, edge and secondary indexes (hash, skiplist, persistent, geo,
//!   fulltext), filled in parallel on open
//! - Per-collection reader/writer locks with deadlock detection
//! - Recovery by replaying the collection log
//!
//! Every mutation updates the revision arena and all indexes before its
//! marker is written. If any step fails, everything done so far is rolled
//! back and the error returned, so memory and log never disagree.
//!
//! ```rust,ignore
//! use docstore_core::{CollectionType, Database, OperationOptions};
//! use docstore_codec::Value;
//!
//! let db = Database::open_in_memory()?;
//! let users = db.create_collection("users", CollectionType::Document)?;
//! let trx = db.begin();
//! let result = users.insert(&trx, &Value::object([("name", Value::from("alice"))]), &OperationOptions::new(), true)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod config;
mod database;
mod dir;
pub mod document;
mod error;
pub mod hlc;
pub mod index;
pub mod key_generator;
pub mod lock;
pub mod revision;
pub mod sharding;
mod stats;
mod transaction;
mod types;
pub mod wal;

pub use collection::{
    is_allowed_collection_name, CollectionContext, CollectionFigures, CollectionInfo, DatafileStatistics,
    DirectoryMetadata, DocumentCollection, EnsuredIndex, MemoryMetadata, MetadataStore, OperationKind,
    OperationOptions, OperationResult, SegmentStatistics, MAX_INDEX_BUCKETS, MAX_NAME_LENGTH, MIN_JOURNAL_SIZE,
    PAGE_SIZE,
};
pub use config::{EngineConfig, DEFAULT_LOCK_TIMEOUT};
pub use database::Database;
pub use error::{CoreError, CoreResult};
pub use hlc::HybridLogicalClock;
pub use lock::{DeadlockDetector, LockMode};
pub use revision::DocumentHandle;
pub use stats::{OperationStats, StatsSnapshot};
pub use transaction::{Transaction, TransactionManager};
pub use types::{CollectionId, CollectionType, FileId, IndexId, RevisionId, ServerRole, Tick, TransactionId};
