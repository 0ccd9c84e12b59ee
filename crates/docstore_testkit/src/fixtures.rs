//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases
//! and common test scenarios.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use docstore_codec::Value;
use docstore_core::{CollectionType, Database, DocumentCollection, EngineConfig, MemoryMetadata};
use docstore_storage::FaultSwitch;
use tempfile::TempDir;

/// Engine settings for tests: short lock waits and a small fill pool.
pub fn test_config() -> EngineConfig {
    EngineConfig::default()
        .lock_timeout(Duration::from_secs(2))
        .lock_sleep_period(Duration::from_millis(1))
        .deadlock_check_interval(2)
        .fill_worker_threads(2)
}

/// A document `{_key: key, n: n}`.
pub fn doc(key: &str, n: i64) -> Value {
    Value::object([("_key", Value::from(key)), ("n", Value::from(n))])
}

/// An edge from `from` to `to`.
pub fn edge(key: &str, from: &str, to: &str) -> Value {
    Value::object([
        ("_key", Value::from(key)),
        ("_from", Value::from(from)),
        ("_to", Value::from(to)),
    ])
}

enum Backing {
    Memory(MemoryMetadata),
    Directory(TempDir),
}

/// A test database that can be reopened over the same storage.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    config: EngineConfig,
    backing: Backing,
}

impl TestDatabase {
    /// Creates a new in-memory test database.
    pub fn memory() -> Self {
        Self::memory_with(MemoryMetadata::new(), test_config())
    }

    /// Creates an in-memory test database over `metadata`.
    pub fn memory_with(metadata: MemoryMetadata, config: EngineConfig) -> Self {
        let db = Database::with_metadata(Arc::new(metadata.clone()), config.clone())
            .expect("Failed to open in-memory database");
        Self {
            db,
            config,
            backing: Backing::Memory(metadata),
        }
    }

    /// Creates an in-memory database whose new collection logs fail
    /// appends or syncs when the returned switch says so.
    pub fn with_log_faults() -> (Self, FaultSwitch) {
        let switch = FaultSwitch::new();
        let metadata = MemoryMetadata::new().with_segment_faults(switch.clone());
        (Self::memory_with(metadata, test_config()), switch)
    }

    /// Creates a new directory-backed test database.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = test_config();
        let db = Database::open_with_config(&temp_dir.path().join("db"), config.clone())
            .expect("Failed to open file database");
        Self {
            db,
            config,
            backing: Backing::Directory(temp_dir),
        }
    }

    /// Returns the database path if directory-backed, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        match &self.backing {
            Backing::Directory(dir) => Some(dir.path().join("db")),
            Backing::Memory(_) => None,
        }
    }

    /// The shared metadata of an in-memory database.
    pub fn metadata(&self) -> Option<&MemoryMetadata> {
        match &self.backing {
            Backing::Memory(metadata) => Some(metadata),
            Backing::Directory(_) => None,
        }
    }

    /// Closes the database and opens it again over the same storage.
    pub fn reopen(self) -> Self {
        let Self { db, config, backing } = self;
        db.close().expect("Failed to close database");
        drop(db);
        let db = match &backing {
            Backing::Memory(metadata) => Database::with_metadata(Arc::new(metadata.clone()), config.clone()),
            Backing::Directory(dir) => Database::open_with_config(&dir.path().join("db"), config.clone()),
        }
        .expect("Failed to reopen database");
        Self { db, config, backing }
    }

    /// Creates a document collection, panicking on error.
    pub fn documents(&self, name: &str) -> Arc<DocumentCollection> {
        self.db
            .create_collection(name, CollectionType::Document)
            .expect("Failed to create collection")
    }

    /// Creates an edge collection, panicking on error.
    pub fn edges(&self, name: &str) -> Arc<DocumentCollection> {
        self.db
            .create_collection(name, CollectionType::Edge)
            .expect("Failed to create collection")
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory database.
///
/// # Example
///
/// ```rust,ignore
/// use docstore_testkit::with_temp_db;
///
/// #[test]
/// fn my_test() {
///     with_temp_db(|db| {
///         let users = db.create_collection("users", CollectionType::Document).unwrap();
///         // ... test operations
///     });
/// }
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Runs a test with a temporary directory-backed database.
pub fn with_file_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database, &Path) -> R,
{
    let test_db = TestDatabase::file();
    let path = test_db.path().expect("File database should have a path");
    f(&test_db.db, &path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use docstore_core::OperationOptions;

    /// A database with one collection `test` holding `count` documents
    /// keyed `k0..k{count}`.
    pub fn populated_database(count: usize) -> (TestDatabase, Arc<DocumentCollection>) {
        let test_db = TestDatabase::memory();
        let collection = test_db.documents("test");
        let trx = test_db.begin();
        for i in 0..count {
            let n = i64::try_from(i).expect("count fits i64");
            collection
                .insert(&trx, &doc(&format!("k{i}"), n), &OperationOptions::new(), true)
                .expect("Failed to insert document");
        }
        drop(trx);
        (test_db, collection)
    }

    /// A database with `count` collections, one document each.
    pub fn multi_collection_database(count: usize) -> (TestDatabase, Vec<Arc<DocumentCollection>>) {
        let test_db = TestDatabase::memory();
        let trx = test_db.begin();
        let collections = (0..count)
            .map(|i| {
                let collection = test_db.documents(&format!("collection_{i}"));
                collection
                    .insert(&trx, &doc("only", 0), &OperationOptions::new(), true)
                    .expect("Failed to insert document");
                collection
            })
            .collect();
        drop(trx);
        (test_db, collections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_database() {
        let test_db = TestDatabase::memory();
        let collection = test_db.documents("test");
        assert_eq!(collection.document_count(), 0);
        assert!(test_db.metadata().is_some());
    }

    #[test]
    fn test_with_temp_db() {
        with_temp_db(|db| {
            db.create_collection("test", CollectionType::Document).unwrap();
            assert_eq!(db.collection_names(), vec!["test".to_string()]);
        });
    }

    #[test]
    fn test_populated_scenario_survives_reopen() {
        let (test_db, collection) = scenarios::populated_database(10);
        assert_eq!(collection.document_count(), 10);
        drop(collection);

        let test_db = test_db.reopen();
        assert_eq!(test_db.collection("test").unwrap().document_count(), 10);
    }

    #[test]
    fn test_file_database_reopens() {
        let test_db = TestDatabase::file();
        test_db.edges("links");
        let test_db = test_db.reopen();
        assert!(test_db.collection("links").unwrap().is_edge());
    }
}
