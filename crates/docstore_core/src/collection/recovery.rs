//! Opening a collection from its log.
//!
//! Open runs through these phases, in order:
//!
//! 1. **Replaying**: every marker of every segment is applied to the
//!    primary index, the arena and the segment statistics.
//! 2. **IndexesDetected**: persisted index descriptors are turned into
//!    empty indexes.
//! 3. **IndexesFilled**: secondary indexes are filled from the live
//!    documents, unless the database is itself recovering.
//!
//! Any error aborts the open; the half-built collection is dropped.

use std::sync::Arc;

use tracing::{debug, info};

use crate::collection::document_collection::{CollectionContext, CollectionState};
use crate::collection::info::CollectionInfo;
use crate::collection::DocumentCollection;
use crate::document::{key_hash, KEY, REV};
use crate::error::{CoreError, CoreResult};
use crate::hlc::{self, HybridLogicalClock};
use crate::index::{self, IndexDefinition, IndexKind};
use crate::key_generator::KeyGenerator;
use crate::revision::DocumentHandle;
use crate::wal::{LogEntry, MarkerType};

#[derive(Debug, Clone, Copy)]
enum OpenPhase {
    Replaying,
    IndexesDetected,
    IndexesFilled,
}

fn marker_key(entry: &LogEntry) -> CoreResult<(String, Option<String>)> {
    let slice = entry.marker.document_slice()?;
    let key = slice.get_str(KEY)?.ok_or_else(|| {
        CoreError::wal_corruption(format!(
            "{:?} marker without _key in segment {} at {}",
            entry.marker.kind(),
            entry.fid,
            entry.offset
        ))
    })?;
    Ok((key.to_string(), slice.get_str(REV)?.map(str::to_string)))
}

/// Applies one marker read back from the log.
pub(crate) fn replay_marker(
    state: &mut CollectionState,
    key_generator: &dyn KeyGenerator,
    clock: &HybridLogicalClock,
    entry: &LogEntry,
) -> CoreResult<()> {
    state.segments.observe(entry.fid, entry.tick);
    state.tick_max = state.tick_max.max(entry.tick);
    clock.observe(entry.tick);

    match entry.marker.kind() {
        MarkerType::Document => {
            let (key, revision) = marker_key(entry)?;
            key_generator.track(&key);
            let revision = revision
                .as_deref()
                .and_then(hlc::parse_revision)
                .map(|parsed| parsed.revision)
                .unwrap_or_default();
            clock.observe(revision.as_u64());
            state.last_revision = state.last_revision.max(revision);

            let document = DocumentHandle {
                hash: key_hash(&key),
                fid: entry.fid,
                offset: entry.offset,
                tick: entry.tick,
                marker_size: entry.size,
                revision,
                body: Some(Arc::from(entry.marker.payload())),
            };
            match state.indexes.primary().lookup_key(&key) {
                None => {
                    let handle = state.arena.request()?;
                    state.arena.replace(handle, document)?;
                    state.indexes.primary_mut().insert_key(&key, handle)?;
                    state.number_documents += 1;
                }
                Some(handle) => {
                    let old = state.arena.replace(handle, document)?;
                    state.segments.dead(old.fid, old.marker_size);
                }
            }
            state.segments.alive(entry.fid, entry.size);
        }
        MarkerType::Remove => {
            let (key, _) = marker_key(entry)?;
            key_generator.track(&key);
            state.segments.deletion(entry.fid);
            if let Some(handle) = state.indexes.primary_mut().remove_key(&key) {
                if let Some(old) = state.arena.release(handle) {
                    state.segments.dead(old.fid, old.marker_size);
                }
                state.number_documents = state.number_documents.saturating_sub(1);
            }
        }
        _ => {}
    }
    Ok(())
}

impl DocumentCollection {
    /// Opens the collection described by `info` from its log and index
    /// descriptors. With `fill` false the secondary indexes stay empty
    /// until [`DocumentCollection::fill_indexes`] runs.
    pub(crate) fn open(info: CollectionInfo, context: CollectionContext, fill: bool) -> CoreResult<Self> {
        let collection = Self::empty(info, context)?;
        let cid = collection.cid();

        debug!(collection = %cid, phase = ?OpenPhase::Replaying, "opening collection");
        {
            let mut state = collection.state.write();
            let key_generator = collection.key_generator.as_ref();
            let clock = collection.context.clock.as_ref();
            collection
                .log
                .for_each_marker(|entry| replay_marker(&mut state, key_generator, clock, &entry))?;
        }

        collection.detect_indexes()?;
        debug!(
            collection = %cid,
            phase = ?OpenPhase::IndexesDetected,
            documents = collection.document_count(),
            indexes = collection.index_count(),
            "replayed log"
        );

        if fill {
            collection.fill_indexes()?;
            debug!(collection = %cid, phase = ?OpenPhase::IndexesFilled, "filled indexes");
        }

        info!(
            collection = %cid,
            name = %collection.name(),
            documents = collection.document_count(),
            "opened collection"
        );
        Ok(collection)
    }

    fn detect_indexes(&self) -> CoreResult<()> {
        let (cid, buckets) = {
            let info = self.info.read();
            (info.cid, info.index_buckets)
        };
        let descriptors = self.context.metadata.load_indexes(cid)?;
        let mut state = self.state.write();
        for descriptor in &descriptors {
            let definition = IndexDefinition::from_value(descriptor)?;
            if matches!(definition.kind, IndexKind::Primary | IndexKind::Edge) {
                continue;
            }
            let id = definition
                .id
                .ok_or_else(|| CoreError::internal("persisted index descriptor without id"))?;
            if state.indexes.get(id).is_some() {
                continue;
            }
            state.indexes.add(definition.instantiate(id, buckets)?);
            debug!(collection = %cid, index = %id, kind = %definition.kind, "detected index");
        }
        state.indexes_filled = state.indexes.secondary().is_empty();
        if !state.indexes_filled {
            state.indexes.suspend();
        }
        Ok(())
    }

    /// Fills every secondary index from the live documents. Does nothing if
    /// they are already filled.
    ///
    /// # Errors
    ///
    /// Returns the first fill error; every secondary index is left empty
    /// and unmaintained then.
    pub fn fill_indexes(&self) -> CoreResult<()> {
        let buckets = self.info.read().index_buckets;
        let mut guard = self.state.write();
        let state = &mut *guard;
        if state.indexes_filled {
            return Ok(());
        }
        {
            let (_, secondary) = state.indexes.split_mut();
            secondary.iter_mut().for_each(|index| index.clear());
        }
        let filled = index::fill_indexes(
            &mut state.indexes,
            &state.arena,
            self.context.pool.as_deref(),
            buckets,
            &self.context.config,
        );
        let (_, secondary) = state.indexes.split_mut();
        if let Err(e) = filled {
            secondary.iter_mut().for_each(|index| index.clear());
            return Err(e);
        }
        secondary.iter().for_each(|_| self.stats.record_index_fill());
        state.indexes.resume();
        state.indexes_filled = true;
        Ok(())
    }

    /// True once secondary indexes reflect the live documents.
    #[must_use]
    pub fn indexes_filled(&self) -> bool {
        self.state.read().indexes_filled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::test_support::{context, document};
    use crate::collection::{MemoryMetadata, MetadataStore, OperationOptions};
    use crate::config::EngineConfig;
    use crate::transaction::Transaction;
    use crate::types::{CollectionType, IndexId, TransactionId};
    use docstore_codec::Value;

    fn create(metadata: &MemoryMetadata, name: &str, kind: CollectionType) -> DocumentCollection {
        let config = EngineConfig::default();
        let mut info = CollectionInfo::new(name, kind, &config).unwrap();
        info.cid = crate::types::CollectionId::new(7);
        metadata.save_parameters(info.cid, &info.to_value()).unwrap();
        DocumentCollection::empty(info, context(metadata)).unwrap()
    }

    fn reopen(metadata: &MemoryMetadata, original: &DocumentCollection, fill: bool) -> DocumentCollection {
        DocumentCollection::open(original.info(), context(metadata), fill).unwrap()
    }

    #[test]
    fn replay_restores_documents() {
        let metadata = MemoryMetadata::new();
        let collection = create(&metadata, "users", CollectionType::Document);
        let trx = Transaction::new(TransactionId::new(1));
        let opts = OperationOptions::default();

        collection.insert(&trx, &document("a", 1), &opts, true).unwrap();
        collection.insert(&trx, &document("b", 2), &opts, true).unwrap();
        collection.insert(&trx, &document("c", 3), &opts, true).unwrap();
        collection
            .update(&trx, &Value::object([("_key", Value::from("a")), ("n", Value::from(10))]), &opts, true)
            .unwrap();
        collection.remove(&trx, &Value::from("b"), &opts, true).unwrap();

        let reopened = reopen(&metadata, &collection, true);
        assert_eq!(reopened.document_count(), 2);
        assert_eq!(reopened.keys(&trx).unwrap(), vec!["a".to_string(), "c".to_string()]);
        assert_eq!(
            reopened.document(&trx, "a").unwrap(),
            collection.document(&trx, "a").unwrap()
        );
        assert_eq!(reopened.last_revision(), collection.last_revision());
    }

    #[test]
    fn overwrite_and_remove_adjust_statistics() {
        let metadata = MemoryMetadata::new();
        let collection = create(&metadata, "stats", CollectionType::Document);
        let trx = Transaction::new(TransactionId::new(1));
        let opts = OperationOptions::default();

        collection.insert(&trx, &document("a", 1), &opts, true).unwrap();
        collection
            .replace(&trx, &Value::object([("_key", Value::from("a")), ("n", Value::from(5))]), &opts, true)
            .unwrap();
        collection.insert(&trx, &document("b", 1), &opts, true).unwrap();
        collection.remove(&trx, &Value::from("b"), &opts, true).unwrap();

        let reopened = reopen(&metadata, &collection, true);
        let total = reopened.segment_statistics().total();
        assert_eq!(total.number_alive, 1);
        assert_eq!(total.number_dead, 2);
        assert_eq!(total.number_deletions, 1);
        assert_eq!(reopened.figures().document_count, 1);
    }

    #[test]
    fn orphaned_remove_only_counts_deletion() {
        let metadata = MemoryMetadata::new();
        let collection = create(&metadata, "orphans", CollectionType::Document);
        let trx = Transaction::new(TransactionId::new(1));
        let opts = OperationOptions::default();
        collection.insert(&trx, &document("a", 1), &opts, true).unwrap();
        collection.remove(&trx, &Value::from("a"), &opts, true).unwrap();

        let mut state = CollectionState::new(&EngineConfig::default());
        let clock = HybridLogicalClock::new();
        let generator = crate::key_generator::from_options(None).unwrap();
        let mut entries = Vec::new();
        collection
            .log
            .for_each_marker(|entry| {
                entries.push(entry);
                Ok(())
            })
            .unwrap();
        let removes: Vec<_> = entries
            .iter()
            .filter(|e| e.marker.kind() == MarkerType::Remove)
            .collect();
        replay_marker(&mut state, generator.as_ref(), &clock, removes[0]).unwrap();

        assert_eq!(state.number_documents, 0);
        assert_eq!(state.segments.total().number_deletions, 1);
        assert_eq!(state.segments.total().number_dead, 0);
    }

    #[test]
    fn indexes_are_detected_and_filled() {
        let metadata = MemoryMetadata::new();
        let collection = create(&metadata, "indexed", CollectionType::Document);
        let trx = Transaction::new(TransactionId::new(1));
        let opts = OperationOptions::default();
        for (key, n) in [("a", 1), ("b", 2), ("c", 2)] {
            collection.insert(&trx, &document(key, n), &opts, true).unwrap();
        }
        let ensured = collection
            .ensure_hash_index(&trx, vec!["n".to_string()], false, false)
            .unwrap();

        let deferred = reopen(&metadata, &collection, false);
        assert!(!deferred.indexes_filled());
        assert!(deferred
            .lookup_index(&trx, ensured.id, &[Value::from(2)])
            .unwrap()
            .is_empty());
        deferred.fill_indexes().unwrap();
        assert!(deferred.indexes_filled());
        assert_eq!(deferred.lookup_index(&trx, ensured.id, &[Value::from(2)]).unwrap().len(), 2);
        assert_eq!(deferred.operation_stats().index_fills, 1);
    }

    #[test]
    fn edge_collection_reopens_with_edge_index() {
        let metadata = MemoryMetadata::new();
        let collection = create(&metadata, "links", CollectionType::Edge);
        let trx = Transaction::new(TransactionId::new(1));
        let edge = Value::object([
            ("_key", Value::from("e1")),
            ("_from", Value::from("users/a")),
            ("_to", Value::from("users/b")),
        ]);
        collection
            .insert(&trx, &edge, &OperationOptions::default(), true)
            .unwrap();

        let reopened = reopen(&metadata, &collection, true);
        assert_eq!(reopened.index_count(), 2);
        assert_eq!(
            reopened
                .lookup_index(&trx, IndexId::EDGE, &[Value::from("users/a")])
                .unwrap()
                .len(),
            1
        );
    }
}
