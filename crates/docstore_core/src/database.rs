//! Database facade and recovery.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use docstore_codec::Value;
use parking_lot::RwLock;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info, warn};

use crate::collection::{
    CollectionContext, CollectionInfo, DirectoryMetadata, DocumentCollection, MemoryMetadata, MetadataStore,
};
use crate::config::EngineConfig;
use crate::error::{CoreError, CoreResult};
use crate::hlc::HybridLogicalClock;
use crate::lock::{DeadlockDetector, LockMode};
use crate::transaction::{Transaction, TransactionManager};
use crate::types::{CollectionId, CollectionType};

/// The main database handle.
///
/// `Database` owns every loaded collection together with what they share:
/// the tick clock, the deadlock detector, the index fill pool and the
/// metadata store.
///
/// # Opening a Database
///
/// ```rust,ignore
/// use docstore_core::{CollectionType, Database, OperationOptions};
/// use docstore_codec::Value;
/// use std::path::Path;
///
/// let db = Database::open(Path::new("my_database"))?;
/// let users = db.create_collection("users", CollectionType::Document)?;
///
/// let trx = db.begin();
/// let doc = Value::object([("_key", Value::from("alice"))]);
/// users.insert(&trx, &doc, &OperationOptions::new(), true)?;
///
/// db.close()?;
/// ```
///
/// # Recovery
///
/// [`Database::open_for_recovery`] loads every collection without filling
/// its secondary indexes. Replay code may then apply further operations;
/// [`Database::finish_recovery`] fills all indexes at once.
pub struct Database {
    /// Engine configuration.
    config: EngineConfig,
    /// Source of ticks, revisions and ids.
    clock: Arc<HybridLogicalClock>,
    /// Waits-for graph shared by all collection locks.
    detector: Arc<DeadlockDetector>,
    /// Workers for parallel index fills.
    pool: Option<Arc<ThreadPool>>,
    /// Collection descriptors, index descriptors and log segments.
    metadata: Arc<dyn MetadataStore>,
    /// Loaded collections by name.
    collections: RwLock<HashMap<String, Arc<DocumentCollection>>>,
    /// Transaction manager.
    transactions: TransactionManager,
    /// Set while secondary index fills are deferred.
    in_recovery: AtomicBool,
    /// Whether the database is open.
    is_open: RwLock<bool>,
}

impl Database {
    /// Opens a database from a directory path.
    ///
    /// The directory is created if missing and locked for the lifetime of
    /// the handle.
    ///
    /// # Errors
    ///
    /// - [`CoreError::DatabaseLocked`] if another handle holds the directory
    /// - [`CoreError::WalCorruption`] if a log cannot be replayed
    /// - I/O errors
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, EngineConfig::default())
    }

    /// Opens a database from a directory path with custom configuration.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use docstore_core::{Database, EngineConfig};
    /// use std::time::Duration;
    ///
    /// let config = EngineConfig::default()
    ///     .lock_timeout(Duration::from_secs(5))
    ///     .wait_for_sync(true);
    ///
    /// let db = Database::open_with_config(Path::new("my_database"), config)?;
    /// ```
    pub fn open_with_config(path: &Path, config: EngineConfig) -> CoreResult<Self> {
        let metadata = DirectoryMetadata::open(path)?;
        Self::with_metadata(Arc::new(metadata), config)
    }

    /// Creates an empty in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the fill pool cannot be started.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::with_metadata(Arc::new(MemoryMetadata::new()), EngineConfig::default())
    }

    /// Opens a database over an existing metadata store and fills every
    /// index as collections load.
    ///
    /// # Errors
    ///
    /// Returns any error raised while loading a collection.
    pub fn with_metadata(metadata: Arc<dyn MetadataStore>, config: EngineConfig) -> CoreResult<Self> {
        Self::start(metadata, config, false)
    }

    /// Opens a database in recovery mode.
    ///
    /// Secondary indexes stay empty until [`Database::finish_recovery`].
    ///
    /// # Errors
    ///
    /// Returns any error raised while loading a collection.
    pub fn open_for_recovery(metadata: Arc<dyn MetadataStore>, config: EngineConfig) -> CoreResult<Self> {
        Self::start(metadata, config, true)
    }

    fn start(metadata: Arc<dyn MetadataStore>, config: EngineConfig, in_recovery: bool) -> CoreResult<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.fill_worker_threads)
            .thread_name(|i| format!("docstore-fill-{i}"))
            .build()
            .map_err(|e| CoreError::internal(format!("cannot start index fill pool: {e}")))?;

        let db = Self {
            clock: Arc::new(HybridLogicalClock::new()),
            detector: Arc::new(DeadlockDetector::new(true)),
            pool: Some(Arc::new(pool)),
            metadata,
            collections: RwLock::new(HashMap::new()),
            transactions: TransactionManager::new(),
            in_recovery: AtomicBool::new(in_recovery),
            is_open: RwLock::new(true),
            config,
        };
        db.load_collections()?;
        Ok(db)
    }

    fn context(&self) -> CollectionContext {
        CollectionContext {
            config: self.config.clone(),
            clock: Arc::clone(&self.clock),
            detector: Arc::clone(&self.detector),
            pool: self.pool.clone(),
            metadata: Arc::clone(&self.metadata),
        }
    }

    fn load_collections(&self) -> CoreResult<()> {
        let fill = !self.is_in_recovery();
        let mut loaded = HashMap::new();

        for cid in self.metadata.collections()? {
            // Ids come from the clock; keep new ones above every stored id.
            self.clock.observe(cid.as_u64());

            let Some(parameters) = self.metadata.load_parameters(cid)? else {
                warn!(collection = %cid, "collection directory without descriptor");
                continue;
            };
            let mut info = CollectionInfo::from_value(&parameters, &self.config)?;
            if info.deleted {
                debug!(collection = %cid, "skipping deleted collection");
                continue;
            }
            info.cid = cid;

            let collection = DocumentCollection::open(info, self.context(), fill)?;
            loaded.insert(collection.name(), Arc::new(collection));
        }

        info!(collections = loaded.len(), recovery = !fill, "opened database");
        *self.collections.write() = loaded;
        Ok(())
    }

    /// Begins a new transaction.
    pub fn begin(&self) -> Transaction {
        self.transactions.begin()
    }

    /// Number of transactions not yet dropped.
    #[must_use]
    pub fn active_transactions(&self) -> usize {
        self.transactions.active_count()
    }

    /// Returns the collection named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CollectionNotFound`] if no such collection is
    /// loaded.
    pub fn collection(&self, name: &str) -> CoreResult<Arc<DocumentCollection>> {
        self.ensure_open()?;
        self.collections
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::CollectionNotFound { name: name.to_string() })
    }

    /// Names of all loaded collections, sorted.
    #[must_use]
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// All loaded collections.
    #[must_use]
    pub fn collections(&self) -> Vec<Arc<DocumentCollection>> {
        self.collections.read().values().cloned().collect()
    }

    /// Creates a collection with default settings.
    ///
    /// # Errors
    ///
    /// As for [`Database::create_collection_with_options`].
    pub fn create_collection(&self, name: &str, collection_type: CollectionType) -> CoreResult<Arc<DocumentCollection>> {
        let kind = if collection_type == CollectionType::Edge { "edge" } else { "document" };
        let options = Value::object([("name", Value::from(name)), ("type", Value::from(kind))]);
        self.create_collection_with_options(&options)
    }

    /// Creates a collection from an options object.
    ///
    /// A missing `cid` is allocated from the clock; the plan id defaults to
    /// the cid.
    ///
    /// # Errors
    ///
    /// - [`CoreError::IllegalName`] or [`CoreError::BadParameter`] for bad
    ///   options
    /// - [`CoreError::DuplicateName`] if the name is taken
    /// - storage errors
    pub fn create_collection_with_options(&self, options: &Value) -> CoreResult<Arc<DocumentCollection>> {
        self.ensure_open()?;
        let mut info = CollectionInfo::from_value(options, &self.config)?;

        let mut collections = self.collections.write();
        if collections.contains_key(&info.name) {
            return Err(CoreError::DuplicateName { name: info.name });
        }
        if info.cid.as_u64() == 0 {
            info.cid = CollectionId::new(self.clock.next());
        } else {
            self.clock.observe(info.cid.as_u64());
        }
        if info.plan_id == 0 {
            info.plan_id = info.cid.as_u64();
        }

        self.metadata.save_parameters(info.cid, &info.to_value())?;
        let name = info.name.clone();
        let cid = info.cid;
        let collection = Arc::new(DocumentCollection::empty(info, self.context())?);
        collections.insert(name.clone(), Arc::clone(&collection));
        debug!(collection = %cid, name = %name, "created collection");
        Ok(collection)
    }

    /// Renames a collection.
    ///
    /// # Errors
    ///
    /// - [`CoreError::CollectionNotFound`] for an unknown `from`
    /// - [`CoreError::DuplicateName`] if `to` is taken
    /// - [`CoreError::IllegalName`] or a storage error
    pub fn rename_collection(&self, from: &str, to: &str) -> CoreResult<()> {
        self.ensure_open()?;
        let mut collections = self.collections.write();
        if collections.contains_key(to) {
            return Err(CoreError::DuplicateName { name: to.to_string() });
        }
        let collection = collections
            .get(from)
            .cloned()
            .ok_or_else(|| CoreError::CollectionNotFound { name: from.to_string() })?;
        collection.rename(to)?;
        collections.remove(from);
        collections.insert(to.to_string(), collection);
        debug!(from, to, "renamed collection");
        Ok(())
    }

    /// Drops a collection with its log and descriptors.
    ///
    /// The collection's write lock is taken first, so running writers finish
    /// before the files go away.
    ///
    /// # Errors
    ///
    /// - [`CoreError::CollectionNotFound`] for an unknown name
    /// - lock errors; nothing is dropped then
    /// - storage errors
    pub fn drop_collection(&self, name: &str) -> CoreResult<()> {
        let collection = self.collection(name)?;
        let trx = self.begin();
        trx.lock_collection(&collection, LockMode::Write, self.config.effective_timeout(self.config.lock_timeout))?;

        self.collections.write().remove(name);
        collection.drop_log()?;
        self.metadata.remove_collection(collection.cid())?;
        debug!(collection = %collection.cid(), name, "dropped collection");
        Ok(())
    }

    /// True while secondary index fills are deferred.
    #[must_use]
    pub fn is_in_recovery(&self) -> bool {
        self.in_recovery.load(Ordering::Acquire)
    }

    /// Fills the secondary indexes of every collection and leaves recovery
    /// mode.
    ///
    /// # Errors
    ///
    /// Returns the first fill error; the flag stays set then.
    pub fn finish_recovery(&self) -> CoreResult<()> {
        if !self.is_in_recovery() {
            return Ok(());
        }
        for collection in self.collections() {
            collection.fill_indexes()?;
        }
        self.in_recovery.store(false, Ordering::Release);
        info!("recovery finished");
        Ok(())
    }

    /// Unloads every collection and closes the database.
    ///
    /// # Errors
    ///
    /// Returns the first unload error; the remaining collections are still
    /// unloaded.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }

        let mut first_error = None;
        for collection in self.collections.read().values() {
            if let Err(e) = collection.unload() {
                warn!(collection = %collection.cid(), error = %e, "unload failed");
                first_error.get_or_insert(e);
            }
        }

        *is_open = false;
        first_error.map_or(Ok(()), Err)
    }

    /// Checks if the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }

    /// Returns the engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the shared clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<HybridLogicalClock> {
        &self.clock
    }

    /// Returns the shared deadlock detector.
    #[must_use]
    pub fn deadlock_detector(&self) -> &Arc<DeadlockDetector> {
        &self.detector
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("collections", &self.collection_names())
            .field("in_recovery", &self.is_in_recovery())
            .field("is_open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::collection::OperationOptions;

    fn config() -> EngineConfig {
        EngineConfig::default()
            .lock_timeout(Duration::from_millis(500))
            .lock_sleep_period(Duration::from_millis(1))
            .fill_worker_threads(2)
    }

    fn doc(key: &str, n: i64) -> Value {
        Value::object([("_key", Value::from(key)), ("n", Value::from(n))])
    }

    #[test]
    fn open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.is_open());
        assert!(db.collection_names().is_empty());
        assert!(!db.is_in_recovery());
    }

    #[test]
    fn create_and_lookup_collection() {
        let db = Database::open_in_memory().unwrap();
        let users = db.create_collection("users", CollectionType::Document).unwrap();
        assert_ne!(users.cid().as_u64(), 0);
        assert_eq!(users.info().plan_id, users.cid().as_u64());

        let found = db.collection("users").unwrap();
        assert_eq!(found.cid(), users.cid());
        assert!(matches!(
            db.collection("missing"),
            Err(CoreError::CollectionNotFound { .. })
        ));
    }

    #[test]
    fn duplicate_collection_name() {
        let db = Database::open_in_memory().unwrap();
        db.create_collection("users", CollectionType::Document).unwrap();
        let err = db.create_collection("users", CollectionType::Edge).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateName { .. }));
    }

    #[test]
    fn collection_ids_are_unique() {
        let db = Database::open_in_memory().unwrap();
        let a = db.create_collection("a", CollectionType::Document).unwrap();
        let b = db.create_collection("b", CollectionType::Edge).unwrap();
        assert_ne!(a.cid(), b.cid());
        assert!(b.is_edge());
    }

    #[test]
    fn rename_collection() {
        let db = Database::open_in_memory().unwrap();
        db.create_collection("old", CollectionType::Document).unwrap();
        db.create_collection("taken", CollectionType::Document).unwrap();

        assert!(matches!(
            db.rename_collection("old", "taken"),
            Err(CoreError::DuplicateName { .. })
        ));
        db.rename_collection("old", "new").unwrap();
        assert_eq!(db.collection_names(), vec!["new".to_string(), "taken".to_string()]);
        assert_eq!(db.collection("new").unwrap().name(), "new");
    }

    #[test]
    fn drop_collection_removes_it() {
        let db = Database::open_in_memory().unwrap();
        let docs = db.create_collection("docs", CollectionType::Document).unwrap();
        let trx = db.begin();
        docs.insert(&trx, &doc("a", 1), &OperationOptions::new(), true).unwrap();
        drop(trx);

        db.drop_collection("docs").unwrap();
        assert!(db.collection("docs").is_err());
        assert!(matches!(
            db.drop_collection("docs"),
            Err(CoreError::CollectionNotFound { .. })
        ));
    }

    #[test]
    fn drop_waits_for_the_write_lock() {
        let db = Database::with_metadata(Arc::new(MemoryMetadata::new()), config()).unwrap();
        let docs = db.create_collection("docs", CollectionType::Document).unwrap();
        let reader = db.begin();
        reader
            .lock_collection(&docs, LockMode::Read, Duration::from_millis(100))
            .unwrap();

        let err = db.drop_collection("docs").unwrap_err();
        assert!(matches!(err, CoreError::LockTimeout { .. }));
        assert!(db.collection("docs").is_ok());
    }

    #[test]
    fn close_database() {
        let db = Database::open_in_memory().unwrap();
        db.create_collection("docs", CollectionType::Document).unwrap();
        db.close().unwrap();
        assert!(!db.is_open());
        assert!(matches!(db.collection("docs"), Err(CoreError::DatabaseClosed)));
        // Closing twice is fine.
        db.close().unwrap();
    }

    #[test]
    fn reopen_replays_documents_and_indexes() {
        let metadata = MemoryMetadata::new();
        let hash = {
            let db = Database::with_metadata(Arc::new(metadata.clone()), config()).unwrap();
            let docs = db.create_collection("docs", CollectionType::Document).unwrap();
            let trx = db.begin();
            let hash = docs.ensure_hash_index(&trx, vec!["n".to_string()], false, false).unwrap();
            for i in 0..10 {
                docs.insert(&trx, &doc(&format!("k{i}"), i % 3), &OperationOptions::new(), true)
                    .unwrap();
            }
            docs.remove(&trx, &Value::from("k0"), &OperationOptions::new(), true).unwrap();
            hash.id
        };

        let db = Database::with_metadata(Arc::new(metadata), config()).unwrap();
        let docs = db.collection("docs").unwrap();
        assert_eq!(docs.document_count(), 9);
        assert!(docs.indexes_filled());
        assert_eq!(docs.index_count(), 2);

        let trx = db.begin();
        let hits = docs.lookup_index(&trx, hash, &[Value::from(1)]).unwrap();
        assert_eq!(hits.len(), 3);
        let misses = docs.lookup_index(&trx, hash, &[Value::from(0)]).unwrap();
        assert_eq!(misses.len(), 3);
    }

    #[test]
    fn new_ids_stay_above_loaded_ones() {
        let metadata = MemoryMetadata::new();
        let first = {
            let db = Database::with_metadata(Arc::new(metadata.clone()), config()).unwrap();
            db.create_collection("a", CollectionType::Document).unwrap().cid()
        };
        let db = Database::with_metadata(Arc::new(metadata), config()).unwrap();
        let second = db.create_collection("b", CollectionType::Document).unwrap().cid();
        assert!(second > first);
    }

    #[test]
    fn recovery_defers_index_fill() {
        let metadata = MemoryMetadata::new();
        {
            let db = Database::with_metadata(Arc::new(metadata.clone()), config()).unwrap();
            let docs = db.create_collection("docs", CollectionType::Document).unwrap();
            let trx = db.begin();
            docs.ensure_skiplist_index(&trx, vec!["n".to_string()], false, false)
                .unwrap();
            docs.insert(&trx, &doc("a", 1), &OperationOptions::new(), true).unwrap();
        }

        let db = Database::open_for_recovery(Arc::new(metadata), config()).unwrap();
        assert!(db.is_in_recovery());
        let docs = db.collection("docs").unwrap();
        assert!(!docs.indexes_filled());
        assert_eq!(docs.document_count(), 1);

        db.finish_recovery().unwrap();
        assert!(!db.is_in_recovery());
        assert!(docs.indexes_filled());
    }

    #[test]
    fn writes_during_recovery_reach_indexes_on_finish() {
        let metadata = MemoryMetadata::new();
        let index = {
            let db = Database::with_metadata(Arc::new(metadata.clone()), config()).unwrap();
            let docs = db.create_collection("docs", CollectionType::Document).unwrap();
            let trx = db.begin();
            let index = docs
                .ensure_hash_index(&trx, vec!["n".to_string()], false, false)
                .unwrap();
            docs.insert(&trx, &doc("a", 1), &OperationOptions::new(), true).unwrap();
            docs.insert(&trx, &doc("b", 2), &OperationOptions::new(), true).unwrap();
            index.id
        };

        let db = Database::open_for_recovery(Arc::new(metadata), config()).unwrap();
        let docs = db.collection("docs").unwrap();
        let trx = db.begin();
        docs.update(&trx, &doc("a", 2), &OperationOptions::new(), true).unwrap();
        docs.remove(&trx, &Value::from("b"), &OperationOptions::new(), true).unwrap();
        docs.insert(&trx, &doc("c", 2), &OperationOptions::new(), true).unwrap();
        assert!(!docs.indexes_filled());

        db.finish_recovery().unwrap();
        assert_eq!(docs.lookup_index(&trx, index, &[Value::from(2)]).unwrap().len(), 2);
        assert!(docs.lookup_index(&trx, index, &[Value::from(1)]).unwrap().is_empty());

        // maintenance is back on once filled
        docs.insert(&trx, &doc("d", 1), &OperationOptions::new(), true).unwrap();
        assert_eq!(docs.lookup_index(&trx, index, &[Value::from(1)]).unwrap().len(), 1);
    }

    #[test]
    fn dropped_collection_stays_dropped() {
        let metadata = MemoryMetadata::new();
        {
            let db = Database::with_metadata(Arc::new(metadata.clone()), config()).unwrap();
            db.create_collection("gone", CollectionType::Document).unwrap();
            db.create_collection("kept", CollectionType::Document).unwrap();
            db.drop_collection("gone").unwrap();
        }
        let db = Database::with_metadata(Arc::new(metadata), config()).unwrap();
        assert_eq!(db.collection_names(), vec!["kept".to_string()]);
    }
}
