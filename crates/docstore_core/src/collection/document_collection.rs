//! The document collection.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use docstore_codec::Value;
use parking_lot::RwLock;
use rayon::ThreadPool;
use tracing::{debug, error, warn};

use crate::collection::figures::{CollectionFigures, SegmentStatistics};
use crate::collection::info::CollectionInfo;
use crate::collection::metadata::MetadataStore;
use crate::config::EngineConfig;
use crate::error::{CoreError, CoreResult};
use crate::hlc::HybridLogicalClock;
use crate::index::{edge_index, fill_index, DocumentSource, IndexDefinition, IndexRegistry};
use crate::key_generator::{self, KeyGenerator};
use crate::lock::{CollectionLock, DeadlockDetector, LockMode, ReadGuard, WriteGuard};
use crate::revision::{DocumentHandle, RevisionArena};
use crate::sharding::AttributeShardKeys;
use crate::stats::{OperationStats, StatsSnapshot};
use crate::transaction::Transaction;
use crate::types::{CollectionId, CollectionType, IndexId, RevisionId, ServerRole, Tick};
use crate::wal::{CollectionLog, LogWriter, Marker, MarkerLocation};

/// Services a collection borrows from its database.
#[derive(Clone, Debug)]
pub struct CollectionContext {
    /// Engine settings.
    pub config: EngineConfig,
    /// Clock for revisions, ticks and ids.
    pub clock: Arc<HybridLogicalClock>,
    /// Wait-for graph shared by every collection lock.
    pub detector: Arc<DeadlockDetector>,
    /// Worker pool for index filling.
    pub pool: Option<Arc<ThreadPool>>,
    /// Where descriptors and segments live.
    pub metadata: Arc<dyn MetadataStore>,
}

/// In-memory documents and indexes, guarded by the collection.
#[derive(Debug)]
pub(crate) struct CollectionState {
    pub arena: RevisionArena,
    pub indexes: IndexRegistry,
    pub number_documents: u64,
    pub segments: SegmentStatistics,
    pub tick_max: Tick,
    pub last_revision: RevisionId,
    /// False while secondary indexes are registered but not yet filled.
    pub indexes_filled: bool,
}

impl CollectionState {
    pub(super) fn new(config: &EngineConfig) -> Self {
        Self {
            arena: RevisionArena::new(config.max_handles),
            indexes: IndexRegistry::new(),
            number_documents: 0,
            segments: SegmentStatistics::new(),
            tick_max: 0,
            last_revision: RevisionId::default(),
            indexes_filled: true,
        }
    }

    /// Records a marker that is not a document revision.
    pub fn observe(&mut self, location: &MarkerLocation) {
        self.segments.observe(location.fid, location.tick);
        self.tick_max = self.tick_max.max(location.tick);
    }
}

/// Per-call options of the mutation entry points.
#[derive(Debug, Clone, Copy)]
pub struct OperationOptions {
    /// Sync the log segment after the marker, whatever the collection says.
    pub wait_for_sync: bool,
    /// Skip the `_rev` comparison of update, replace and remove.
    pub ignore_revs: bool,
    /// Keep attributes set to null by an update patch.
    pub keep_null: bool,
    /// Merge nested objects in an update patch.
    pub merge_objects: bool,
    /// Keep client keys and revisions as given.
    pub is_restore: bool,
}

impl Default for OperationOptions {
    fn default() -> Self {
        Self {
            wait_for_sync: false,
            ignore_revs: true,
            keep_null: true,
            merge_objects: true,
            is_restore: false,
        }
    }
}

impl OperationOptions {
    /// Default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sync flag.
    #[must_use]
    pub const fn wait_for_sync(mut self, value: bool) -> Self {
        self.wait_for_sync = value;
        self
    }

    /// Sets whether `_rev` is ignored.
    #[must_use]
    pub const fn ignore_revs(mut self, value: bool) -> Self {
        self.ignore_revs = value;
        self
    }

    /// Sets null handling for updates.
    #[must_use]
    pub const fn keep_null(mut self, value: bool) -> Self {
        self.keep_null = value;
        self
    }

    /// Sets nested object merging for updates.
    #[must_use]
    pub const fn merge_objects(mut self, value: bool) -> Self {
        self.merge_objects = value;
        self
    }

    /// Sets restore mode.
    #[must_use]
    pub const fn is_restore(mut self, value: bool) -> Self {
        self.is_restore = value;
        self
    }
}

/// Outcome of a mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationResult {
    /// The revision now visible, `None` after a remove.
    pub new: Option<DocumentHandle>,
    /// The revision that was replaced or removed.
    pub old: Option<DocumentHandle>,
    /// Tick of the written marker; 0 when nothing was written.
    pub tick: Tick,
}

/// Outcome of an ensure-index call.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsuredIndex {
    /// Id of the matching or new index.
    pub id: IndexId,
    /// Its serialized definition.
    pub definition: Value,
    /// False if an existing index matched.
    pub created: bool,
}

/// A collection of documents with its indexes and log.
///
/// The logical [`CollectionLock`] serializes writers against readers for
/// the whole span of an operation; the inner state lock is only held while
/// the arena and indexes are touched.
pub struct DocumentCollection {
    pub(super) info: RwLock<CollectionInfo>,
    pub(super) lock: Arc<CollectionLock>,
    pub(super) state: RwLock<CollectionState>,
    pub(super) log: CollectionLog,
    pub(super) key_generator: Box<dyn KeyGenerator>,
    pub(super) shard_keys: AttributeShardKeys,
    pub(super) context: CollectionContext,
    pub(super) stats: OperationStats,
}

impl DocumentCollection {
    /// Builds an empty collection over the segments `context.metadata`
    /// provides for `info.cid`. Edge collections get their edge index.
    pub(crate) fn empty(info: CollectionInfo, context: CollectionContext) -> CoreResult<Self> {
        let key_generator = key_generator::from_options(info.key_options.as_ref())?;
        let segments = context.metadata.segments(info.cid)?;
        let log = CollectionLog::new(
            segments,
            Arc::clone(&context.clock),
            info.maximal_size,
            info.wait_for_sync,
        );
        let lock = Arc::new(CollectionLock::new(
            info.cid,
            info.name.clone(),
            Arc::clone(&context.detector),
            context.config.lock_sleep_period,
            context.config.deadlock_check_interval,
        ));
        let mut state = CollectionState::new(&context.config);
        if info.is_edge() {
            state.indexes.add(edge_index(IndexId::EDGE));
        }
        Ok(Self {
            shard_keys: AttributeShardKeys::new(info.shard_keys.clone()),
            info: RwLock::new(info),
            lock,
            state: RwLock::new(state),
            log,
            key_generator,
            context,
            stats: OperationStats::new(),
        })
    }

    /// Collection id.
    #[must_use]
    pub fn cid(&self) -> CollectionId {
        self.info.read().cid
    }

    /// Current name.
    #[must_use]
    pub fn name(&self) -> String {
        self.info.read().name.clone()
    }

    /// Document or edge collection.
    #[must_use]
    pub fn collection_type(&self) -> CollectionType {
        self.info.read().collection_type
    }

    /// True for edge collections.
    #[must_use]
    pub fn is_edge(&self) -> bool {
        self.info.read().is_edge()
    }

    /// A copy of the descriptor.
    #[must_use]
    pub fn info(&self) -> CollectionInfo {
        self.info.read().clone()
    }

    /// Live documents.
    #[must_use]
    pub fn document_count(&self) -> u64 {
        self.state.read().number_documents
    }

    /// Largest revision stored.
    #[must_use]
    pub fn last_revision(&self) -> RevisionId {
        self.state.read().last_revision
    }

    /// The lock guarding this collection.
    #[must_use]
    pub fn collection_lock(&self) -> &Arc<CollectionLock> {
        &self.lock
    }

    /// Operation counters.
    #[must_use]
    pub fn operation_stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Markers written to the log by this instance, framing included.
    #[must_use]
    pub fn markers_written(&self) -> u64 {
        self.log.markers_written()
    }

    /// The key generator options.
    #[must_use]
    pub fn key_options(&self) -> Value {
        self.key_generator.to_value()
    }

    /// The `_id` stored in new documents.
    pub(super) fn id_value(&self) -> i64 {
        let info = self.info.read();
        let id = if self.context.config.server_role == ServerRole::DbServer && !info.is_system {
            info.plan_id
        } else {
            info.cid.as_u64()
        };
        i64::try_from(id).unwrap_or(i64::MAX)
    }

    fn lock_timeout(&self) -> Duration {
        let config = &self.context.config;
        config.effective_timeout(config.lock_timeout)
    }

    /// Shared lock for one call, unless `trx` already holds one or declared
    /// the collection lock-free.
    pub(super) fn read_guard(&self, trx: &Transaction) -> CoreResult<Option<ReadGuard<'_>>> {
        let id = trx.id();
        if self.lock.is_held_by(id, LockMode::Read)
            || self.lock.is_held_by(id, LockMode::Write)
            || trx.is_no_lock(&self.name())
        {
            return Ok(None);
        }
        self.lock.read(id, self.lock_timeout()).map(Some)
    }

    /// Exclusive lock for one call. Skipped when `lock` is false, when `trx`
    /// holds it already, or when the collection is in its no-lock set.
    pub(super) fn write_guard(&self, trx: &Transaction, lock: bool) -> CoreResult<Option<WriteGuard<'_>>> {
        let id = trx.id();
        if !lock || self.lock.is_held_by(id, LockMode::Write) || trx.is_no_lock(&self.name()) {
            return Ok(None);
        }
        self.lock.write(id, self.lock_timeout()).map(Some)
    }

    /// The visible revision of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DocumentNotFound`] if the key is absent, or a
    /// lock error.
    pub fn lookup(&self, trx: &Transaction, key: &str) -> CoreResult<DocumentHandle> {
        let _guard = self.read_guard(trx)?;
        self.stats.record_lookup();
        let state = self.state.read();
        state
            .indexes
            .primary()
            .lookup_key(key)
            .and_then(|handle| state.arena.get(handle))
            .cloned()
            .ok_or_else(|| CoreError::not_found(key))
    }

    /// The decoded visible revision of `key`.
    ///
    /// # Errors
    ///
    /// See [`DocumentCollection::lookup`].
    pub fn document(&self, trx: &Transaction, key: &str) -> CoreResult<Value> {
        self.lookup(trx, key)?.to_value()
    }

    /// Every live key, sorted.
    ///
    /// # Errors
    ///
    /// Returns a lock error.
    pub fn keys(&self, trx: &Transaction) -> CoreResult<Vec<String>> {
        let _guard = self.read_guard(trx)?;
        let state = self.state.read();
        Ok(state
            .indexes
            .primary()
            .entries()
            .into_iter()
            .map(|(key, _)| key.to_string())
            .collect())
    }

    /// Documents whose values in index `id` equal `values`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BadParameter`] for an unknown index, or a lock
    /// error.
    pub fn lookup_index(&self, trx: &Transaction, id: IndexId, values: &[Value]) -> CoreResult<Vec<DocumentHandle>> {
        let _guard = self.read_guard(trx)?;
        let state = self.state.read();
        let index = state
            .indexes
            .get(id)
            .ok_or_else(|| CoreError::bad_parameter(format!("no index {id}")))?;
        Ok(index
            .lookup(values)
            .into_iter()
            .filter_map(|handle| state.arena.get(handle).cloned())
            .collect())
    }

    /// Definitions of every index, primary first.
    #[must_use]
    pub fn index_definitions(&self) -> Vec<Value> {
        self.state.read().indexes.definitions()
    }

    /// Number of indexes, primary included.
    #[must_use]
    pub fn index_count(&self) -> usize {
        self.state.read().indexes.len()
    }

    /// Per-segment statistics.
    #[must_use]
    pub fn segment_statistics(&self) -> SegmentStatistics {
        self.state.read().segments.clone()
    }

    /// Current figures.
    #[must_use]
    pub fn figures(&self) -> CollectionFigures {
        let state = self.state.read();
        let total = state.segments.total();
        CollectionFigures {
            alive_count: total.number_alive,
            alive_size: total.size_alive,
            dead_count: total.number_dead,
            dead_size: total.size_dead,
            deletions: total.number_deletions,
            datafile_count: state.segments.len(),
            index_count: state.indexes.len(),
            index_memory: state.indexes.memory(),
            last_tick: state.tick_max,
            document_count: state.number_documents,
        }
    }

    /// Returns a matching index or creates, fills, persists and logs a new
    /// one.
    ///
    /// # Errors
    ///
    /// - [`CoreError::BadParameter`] for an invalid request
    /// - [`CoreError::UniqueConstraintViolated`] if existing documents
    ///   violate a unique request
    /// - storage or log errors; nothing is registered in that case
    pub fn ensure_index(&self, trx: &Transaction, definition: IndexDefinition) -> CoreResult<EnsuredIndex> {
        definition.validate()?;
        let _guard = self.write_guard(trx, true)?;
        let mut state = self.state.write();

        if let Some(existing) = state
            .indexes
            .secondary()
            .iter()
            .find(|index| definition.matches(index.as_ref()))
        {
            return Ok(EnsuredIndex {
                id: existing.id(),
                definition: existing.definition(),
                created: false,
            });
        }

        let (cid, buckets) = {
            let info = self.info.read();
            (info.cid, info.index_buckets)
        };
        let id = IndexId::new(self.context.clock.next());
        let mut index = definition.instantiate(id, buckets)?;
        if state.indexes_filled {
            let source = DocumentSource::new(state.indexes.primary(), &state.arena);
            fill_index(
                index.as_mut(),
                &source,
                self.context.pool.as_deref(),
                buckets,
                &self.context.config,
            )?;
            self.stats.record_index_fill();
        }

        let descriptor = index.definition();
        self.context.metadata.save_index(cid, id, &descriptor)?;
        let location = match Marker::create_index(&descriptor).and_then(|m| self.log.write_marker(&m)) {
            Ok(location) => location,
            Err(e) => {
                if let Err(cleanup) = self.context.metadata.remove_index(cid, id) {
                    error!(collection = %cid, index = %id, error = %cleanup, "cannot remove index descriptor");
                }
                return Err(e);
            }
        };
        self.stats.record_marker(location.size);
        state.observe(&location);
        state.indexes.add(index);
        debug!(collection = %cid, index = %id, kind = %definition.kind, "created index");

        Ok(EnsuredIndex {
            id,
            definition: descriptor,
            created: true,
        })
    }

    /// Ensures a hash index on `fields`.
    ///
    /// # Errors
    ///
    /// See [`DocumentCollection::ensure_index`].
    pub fn ensure_hash_index(
        &self,
        trx: &Transaction,
        fields: Vec<String>,
        unique: bool,
        sparse: bool,
    ) -> CoreResult<EnsuredIndex> {
        self.ensure_index(trx, IndexDefinition::hash(fields, unique, sparse))
    }

    /// Ensures a skiplist index on `fields`.
    ///
    /// # Errors
    ///
    /// See [`DocumentCollection::ensure_index`].
    pub fn ensure_skiplist_index(
        &self,
        trx: &Transaction,
        fields: Vec<String>,
        unique: bool,
        sparse: bool,
    ) -> CoreResult<EnsuredIndex> {
        self.ensure_index(trx, IndexDefinition::skiplist(fields, unique, sparse))
    }

    /// Ensures a persistent index on `fields`.
    ///
    /// # Errors
    ///
    /// See [`DocumentCollection::ensure_index`].
    pub fn ensure_persistent_index(
        &self,
        trx: &Transaction,
        fields: Vec<String>,
        unique: bool,
        sparse: bool,
    ) -> CoreResult<EnsuredIndex> {
        self.ensure_index(trx, IndexDefinition::persistent(fields, unique, sparse))
    }

    /// Ensures a geo index on one location field or a latitude and a
    /// longitude field.
    ///
    /// # Errors
    ///
    /// See [`DocumentCollection::ensure_index`].
    pub fn ensure_geo_index(&self, trx: &Transaction, fields: Vec<String>, geo_json: bool) -> CoreResult<EnsuredIndex> {
        self.ensure_index(trx, IndexDefinition::geo(fields, geo_json))
    }

    /// Ensures a fulltext index on `field`.
    ///
    /// # Errors
    ///
    /// See [`DocumentCollection::ensure_index`].
    pub fn ensure_fulltext_index(&self, trx: &Transaction, field: String, min_length: usize) -> CoreResult<EnsuredIndex> {
        self.ensure_index(trx, IndexDefinition::fulltext(field, min_length))
    }

    /// Drops index `id`.
    ///
    /// Returns `true` for id 0 without doing anything and `false` for an
    /// unknown or non-droppable index.
    ///
    /// # Errors
    ///
    /// Returns a lock error, or a storage error if the descriptor cannot be
    /// removed, in which case the index stays registered.
    pub fn drop_index(&self, trx: &Transaction, id: IndexId) -> CoreResult<bool> {
        if id == IndexId::PRIMARY {
            return Ok(true);
        }
        let _guard = self.write_guard(trx, true)?;
        let mut state = self.state.write();
        let Some(index) = state.indexes.remove(id) else {
            return Ok(false);
        };
        let cid = self.cid();
        if let Err(e) = self.context.metadata.remove_index(cid, id) {
            state.indexes.add(index);
            return Err(e);
        }
        match Marker::drop_index(id).and_then(|m| self.log.write_marker(&m)) {
            Ok(location) => {
                self.stats.record_marker(location.size);
                state.observe(&location);
            }
            Err(e) => warn!(collection = %cid, index = %id, error = %e, "could not write drop-index marker"),
        }
        debug!(collection = %cid, index = %id, "dropped index");
        Ok(true)
    }

    /// Runs cleanup on every index that defers work.
    ///
    /// # Errors
    ///
    /// Returns the first cleanup error.
    pub fn cleanup_indexes(&self) -> CoreResult<()> {
        let mut state = self.state.write();
        if state.indexes.cleanup_count() == 0 {
            return Ok(());
        }
        state.indexes.cleanup()
    }

    /// Switches maintenance of non-persistent secondary indexes.
    pub fn set_use_secondary_indexes(&self, value: bool) {
        self.state.write().indexes.set_use_secondary(value);
    }

    /// Purges deferred index removals, seals the log and persists the
    /// descriptor with the current document count as its initial count.
    ///
    /// # Errors
    ///
    /// Returns a log or storage error. A failed purge is only logged.
    pub fn unload(&self) -> CoreResult<()> {
        if let Err(e) = self.cleanup_indexes() {
            warn!(collection = %self.cid(), error = %e, "index cleanup before unload failed");
        }
        self.log.seal()?;
        let (count, revision) = {
            let state = self.state.read();
            (state.number_documents, state.last_revision)
        };
        let mut info = self.info.write();
        info.initial_count = i64::try_from(count).unwrap_or(i64::MAX);
        info.revision = info.revision.max(revision);
        self.context.metadata.save_parameters(info.cid, &info.to_value())?;
        debug!(collection = %info.cid, documents = count, "unloaded collection");
        Ok(())
    }

    /// Renames the collection and persists the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalName`] or a storage error; the old name
    /// is kept on error.
    pub(crate) fn rename(&self, name: &str) -> CoreResult<()> {
        let mut info = self.info.write();
        let old = info.name.clone();
        info.rename(name)?;
        if let Err(e) = self.context.metadata.save_parameters(info.cid, &info.to_value()) {
            info.name = old;
            return Err(e);
        }
        self.lock.set_name(name);
        Ok(())
    }

    /// Applies changeable properties and persists them.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BadParameter`] or a storage error; nothing
    /// changes on error.
    pub fn update_properties(&self, properties: &Value) -> CoreResult<()> {
        let mut info = self.info.write();
        let mut next = info.clone();
        next.update_properties(properties)?;
        self.context.metadata.save_parameters(next.cid, &next.to_value())?;
        self.log.set_maximal_size(next.maximal_size);
        self.log.set_wait_for_sync(next.wait_for_sync);
        *info = next;
        Ok(())
    }

    /// Deletes every log segment.
    pub(crate) fn drop_log(&self) -> CoreResult<()> {
        self.log.drop_all()
    }
}

impl fmt::Debug for DocumentCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = self.info.read();
        f.debug_struct("DocumentCollection")
            .field("cid", &info.cid)
            .field("name", &info.name)
            .field("type", &info.collection_type)
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}
