//! Insert, update, replace and remove.
//!
//! Each entry point validates and builds the new object before taking the
//! write lock, so validation errors have no side effects. Under the lock a
//! [`DocumentOperation`] updates the arena and indexes, then writes its
//! marker; any failure after the first index change is rolled back before
//! the error is returned.
//!
//! `lock = false` tells the engine the caller already serializes access to
//! the collection.

use std::sync::Arc;

use docstore_codec::{to_document_bytes, Value};

use crate::collection::document_collection::{CollectionState, OperationOptions, OperationResult};
use crate::collection::operation::{DocumentOperation, OperationKind, Revision};
use crate::collection::DocumentCollection;
use crate::document::{
    check_revision, edge_endpoint, key_hash, key_of, merge_objects_for_update, new_object_for_insert,
    new_object_for_remove, new_object_for_replace, replace_endpoints, revision_for_remove, revision_for_write,
    InsertContext, MergeOptions, FROM, REV, TO,
};
use crate::error::{CoreError, CoreResult};
use crate::revision::{DocumentHandle, HandleId};
use crate::sharding::ShardKeyPredicate;
use crate::transaction::Transaction;
use crate::types::{RevisionId, ServerRole};
use crate::wal::{Marker, MarkerLocation, SyncedLog};

/// Encodes `value` into a handle without location and its document marker.
fn stage(key: &str, revision: RevisionId, value: &Value) -> CoreResult<(DocumentHandle, Marker)> {
    let bytes = to_document_bytes(value)?;
    let document = DocumentHandle {
        hash: key_hash(key),
        revision,
        body: Some(Arc::from(bytes.as_slice())),
        ..DocumentHandle::default()
    };
    Ok((document, Marker::document(bytes)))
}

impl DocumentCollection {
    /// Inserts a new document.
    ///
    /// # Errors
    ///
    /// - [`CoreError::DocumentTypeInvalid`] if `input` is not an object
    /// - [`CoreError::InvalidEdgeAttribute`] for bad edge endpoints
    /// - [`CoreError::InvalidKey`] or [`CoreError::OutOfKeys`] from key
    ///   handling
    /// - [`CoreError::UniqueConstraintViolated`] for a taken key or a unique
    ///   secondary index
    /// - [`CoreError::OutOfMemory`] when the arena is full
    /// - [`CoreError::LogWriteFailed`], lock errors
    pub fn insert(
        &self,
        trx: &Transaction,
        input: &Value,
        options: &OperationOptions,
        lock: bool,
    ) -> CoreResult<OperationResult> {
        if !input.is_object() {
            return Err(CoreError::DocumentTypeInvalid);
        }
        let endpoints = if self.is_edge() {
            Some((edge_endpoint(input, FROM)?.clone(), edge_endpoint(input, TO)?.clone()))
        } else {
            None
        };
        let context = InsertContext {
            id: self.id_value(),
            key_generator: self.key_generator.as_ref(),
            clock: &self.context.clock,
            endpoints,
            is_restore: options.is_restore,
        };
        let (value, revision) = new_object_for_insert(&context, input)?;
        let key = key_of(&value)?.to_string();
        let (document, marker) = stage(&key, revision, &value)?;

        let _guard = self.write_guard(trx, lock)?;
        let mut state = self.state.write();
        let operation = DocumentOperation::insert(&mut state, key, Revision { document, value })?;
        let (location, stored) = self.apply(&mut state, operation, &marker, options)?;
        self.stats.record_insert();
        Ok(OperationResult {
            new: stored,
            old: None,
            tick: location.tick,
        })
    }

    /// Merges `input` into the stored document with the same `_key`.
    ///
    /// A patch holding nothing but `_key` changes nothing and writes no
    /// marker; the result then has tick 0.
    ///
    /// # Errors
    ///
    /// - [`CoreError::DocumentTypeInvalid`], [`CoreError::DocumentHandleBad`]
    /// - [`CoreError::DocumentNotFound`] if the key is absent
    /// - [`CoreError::Conflict`] for a stale `_rev` unless revisions are
    ///   ignored
    /// - [`CoreError::ShardKeyChanged`] on a cluster participant
    /// - index, log and lock errors as for [`DocumentCollection::insert`]
    pub fn update(
        &self,
        trx: &Transaction,
        input: &Value,
        options: &OperationOptions,
        lock: bool,
    ) -> CoreResult<OperationResult> {
        self.modify(OperationKind::Update, trx, input, options, lock)
    }

    /// Replaces the stored document with the same `_key` by `input`.
    ///
    /// # Errors
    ///
    /// As for [`DocumentCollection::update`], plus
    /// [`CoreError::InvalidEdgeAttribute`] when an edge replace lacks string
    /// endpoints.
    pub fn replace(
        &self,
        trx: &Transaction,
        input: &Value,
        options: &OperationOptions,
        lock: bool,
    ) -> CoreResult<OperationResult> {
        self.modify(OperationKind::Replace, trx, input, options, lock)
    }

    fn modify(
        &self,
        kind: OperationKind,
        trx: &Transaction,
        input: &Value,
        options: &OperationOptions,
        lock: bool,
    ) -> CoreResult<OperationResult> {
        if !input.is_object() {
            return Err(CoreError::DocumentTypeInvalid);
        }
        let key = key_of(input)?.to_string();
        let is_edge = self.is_edge();
        let endpoints = if kind == OperationKind::Replace && is_edge {
            Some(replace_endpoints(input)?)
        } else {
            None
        };
        let revision = revision_for_write(input, options.is_restore, &self.context.clock)?;

        let _guard = self.write_guard(trx, lock)?;
        let mut state = self.state.write();
        let (handle, old_document) = self.visible(&state, &key)?;
        if !options.ignore_revs {
            if let Err(e) = check_revision(&key, input.get(REV), old_document.revision) {
                self.stats.record_conflict();
                return Err(e);
            }
        }

        if kind == OperationKind::Update && input.len() <= 1 {
            self.stats.record_update();
            self.stats.record_noop_update();
            return Ok(OperationResult {
                new: Some(old_document.clone()),
                old: Some(old_document),
                tick: 0,
            });
        }

        let old_value = old_document.to_value()?;
        let new_value = match kind {
            OperationKind::Update => {
                let merge = MergeOptions {
                    merge_objects: options.merge_objects,
                    keep_null: options.keep_null,
                };
                merge_objects_for_update(&old_value, input, is_edge, revision, merge)
            }
            _ => new_object_for_replace(&old_value, input, endpoints, revision),
        };
        if self.context.config.server_role == ServerRole::DbServer
            && self.shard_keys.would_change_shard_key(&old_value, &new_value)
        {
            return Err(CoreError::ShardKeyChanged);
        }

        let (document, marker) = stage(&key, revision, &new_value)?;
        let old = Revision {
            document: old_document.clone(),
            value: old_value,
        };
        let new = Revision {
            document,
            value: new_value,
        };
        let operation = DocumentOperation::modify(kind, key, handle, old, new);
        let (location, stored) = self.apply(&mut state, operation, &marker, options)?;
        match kind {
            OperationKind::Update => self.stats.record_update(),
            _ => self.stats.record_replace(),
        }
        Ok(OperationResult {
            new: stored,
            old: Some(old_document),
            tick: location.tick,
        })
    }

    /// Removes the document named by `input`: a key string or an object
    /// with `_key`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::DocumentHandleBad`] if no key can be resolved
    /// - [`CoreError::DocumentNotFound`], [`CoreError::Conflict`]
    /// - index, log and lock errors as for [`DocumentCollection::insert`]
    pub fn remove(
        &self,
        trx: &Transaction,
        input: &Value,
        options: &OperationOptions,
        lock: bool,
    ) -> CoreResult<OperationResult> {
        let key = key_of(input)?.to_string();
        let revision = revision_for_remove(input, options.is_restore, &self.context.clock);
        let marker = Marker::remove(to_document_bytes(&new_object_for_remove(&key, revision))?);

        let _guard = self.write_guard(trx, lock)?;
        let mut state = self.state.write();
        let (handle, old_document) = self.visible(&state, &key)?;
        if !options.ignore_revs {
            if let Err(e) = check_revision(&key, input.get(REV), old_document.revision) {
                self.stats.record_conflict();
                return Err(e);
            }
        }

        let old = Revision {
            value: old_document.to_value()?,
            document: old_document.clone(),
        };
        let operation = DocumentOperation::remove(key, handle, old);
        let (location, _) = self.apply(&mut state, operation, &marker, options)?;
        self.stats.record_remove();
        Ok(OperationResult {
            new: None,
            old: Some(old_document),
            tick: location.tick,
        })
    }

    fn visible(&self, state: &CollectionState, key: &str) -> CoreResult<(HandleId, DocumentHandle)> {
        let handle = state
            .indexes
            .primary()
            .lookup_key(key)
            .ok_or_else(|| CoreError::not_found(key))?;
        let document = state
            .arena
            .get(handle)
            .cloned()
            .ok_or_else(|| CoreError::internal(format!("primary index points at free {handle}")))?;
        Ok((handle, document))
    }

    fn apply(
        &self,
        state: &mut CollectionState,
        mut operation: DocumentOperation,
        marker: &Marker,
        options: &OperationOptions,
    ) -> CoreResult<(MarkerLocation, Option<DocumentHandle>)> {
        if let Err(e) = operation.index(state) {
            self.stats.record_rollback();
            return Err(e);
        }
        let committed = if options.wait_for_sync {
            operation.commit(state, &SyncedLog(&self.log), marker)
        } else {
            operation.commit(state, &self.log, marker)
        };
        match committed {
            Ok((location, stored)) => {
                self.stats.record_marker(location.size);
                Ok((location, stored))
            }
            Err(e) => {
                self.stats.record_rollback();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::test_support::{context, document};
    use crate::collection::{CollectionContext, CollectionInfo, MemoryMetadata};
    use crate::config::EngineConfig;
    use crate::lock::LockMode;
    use crate::types::{CollectionId, CollectionType, IndexId, TransactionId};
    use docstore_storage::FaultSwitch;
    use std::time::Duration;

    fn build(info_fn: impl FnOnce(&mut CollectionInfo), context: CollectionContext, kind: CollectionType) -> DocumentCollection {
        let mut info = CollectionInfo::new("docs", kind, &EngineConfig::default()).unwrap();
        info.cid = CollectionId::new(42);
        info_fn(&mut info);
        DocumentCollection::empty(info, context).unwrap()
    }

    fn collection(metadata: &MemoryMetadata) -> DocumentCollection {
        build(|_| {}, context(metadata), CollectionType::Document)
    }

    fn trx() -> Transaction {
        Transaction::new(TransactionId::new(1))
    }

    fn opts() -> OperationOptions {
        OperationOptions::default()
    }

    fn n_of(collection: &DocumentCollection, key: &str) -> Option<i64> {
        collection
            .document(&trx(), key)
            .unwrap()
            .get("n")
            .and_then(Value::as_integer)
    }

    #[test]
    fn inserted_bytes_are_the_canonical_object() {
        let collection = collection(&MemoryMetadata::new());
        let input = Value::object([
            ("n", Value::from(1)),
            ("_key", Value::from("a")),
            ("_rev", Value::from("ignored")),
        ]);
        let result = collection.insert(&trx(), &input, &opts(), true).unwrap();
        let stored = collection.lookup(&trx(), "a").unwrap();
        assert_eq!(result.new.as_ref(), Some(&stored));
        assert!(result.tick > 0);

        let expected = Value::object([
            ("_key", Value::from("a")),
            ("_id", Value::Integer(42)),
            ("_rev", Value::Text(stored.revision.to_string())),
            ("n", Value::from(1)),
        ]);
        assert_eq!(
            stored.body.as_deref(),
            Some(to_document_bytes(&expected).unwrap().as_slice())
        );
        assert_eq!(stored.hash, key_hash("a"));
        assert_eq!(collection.document_count(), 1);
    }

    #[test]
    fn missing_key_is_generated() {
        let collection = collection(&MemoryMetadata::new());
        let result = collection
            .insert(&trx(), &Value::object([("n", Value::from(1))]), &opts(), true)
            .unwrap();
        let key = result.new.unwrap().key().unwrap();
        assert!(!key.is_empty());
        assert!(collection.lookup(&trx(), &key).is_ok());
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let collection = collection(&MemoryMetadata::new());
        collection.insert(&trx(), &document("a", 1), &opts(), true).unwrap();
        let err = collection
            .insert(&trx(), &document("a", 2), &opts(), true)
            .unwrap_err();
        assert!(err.is_unique_violation());
        assert_eq!(collection.document_count(), 1);
        assert_eq!(collection.keys(&trx()).unwrap(), vec!["a".to_string()]);
        assert_eq!(n_of(&collection, "a"), Some(1));
    }

    #[test]
    fn non_object_input_is_rejected() {
        let collection = collection(&MemoryMetadata::new());
        assert!(matches!(
            collection.insert(&trx(), &Value::from("a"), &opts(), true),
            Err(CoreError::DocumentTypeInvalid)
        ));
        assert!(matches!(
            collection.update(&trx(), &Value::from(1), &opts(), true),
            Err(CoreError::DocumentTypeInvalid)
        ));
    }

    #[test]
    fn stale_revision_conflicts_without_marker() {
        let collection = collection(&MemoryMetadata::new());
        collection.insert(&trx(), &document("a", 1), &opts(), true).unwrap();
        let markers = collection.markers_written();
        let before = collection.lookup(&trx(), "a").unwrap();

        let patch = Value::object([
            ("_key", Value::from("a")),
            ("_rev", Value::from("_stale___")),
            ("n", Value::from(2)),
        ]);
        let strict = opts().ignore_revs(false);
        let err = collection.update(&trx(), &patch, &strict, true).unwrap_err();
        assert!(matches!(err, CoreError::Conflict { .. }));
        let err = collection.remove(&trx(), &patch, &strict, true).unwrap_err();
        assert!(matches!(err, CoreError::Conflict { .. }));

        assert_eq!(collection.markers_written(), markers);
        assert_eq!(collection.lookup(&trx(), "a").unwrap(), before);
        assert_eq!(collection.operation_stats().conflicts, 2);
    }

    #[test]
    fn matching_revision_is_accepted() {
        let collection = collection(&MemoryMetadata::new());
        let inserted = collection
            .insert(&trx(), &document("a", 1), &opts(), true)
            .unwrap()
            .new
            .unwrap();
        let patch = Value::object([
            ("_key", Value::from("a")),
            ("_rev", Value::Text(inserted.revision.to_string())),
            ("n", Value::from(2)),
        ]);
        let result = collection
            .update(&trx(), &patch, &opts().ignore_revs(false), true)
            .unwrap();
        assert_eq!(result.old, Some(inserted));
        assert_eq!(n_of(&collection, "a"), Some(2));
    }

    #[test]
    fn key_only_update_is_a_no_op() {
        let collection = collection(&MemoryMetadata::new());
        collection.insert(&trx(), &document("a", 1), &opts(), true).unwrap();
        let markers = collection.markers_written();
        let before = collection.lookup(&trx(), "a").unwrap();

        let result = collection
            .update(&trx(), &Value::object([("_key", Value::from("a"))]), &opts(), true)
            .unwrap();
        assert_eq!(result.tick, 0);
        assert_eq!(result.new, Some(before.clone()));
        assert_eq!(collection.markers_written(), markers);
        assert_eq!(collection.operation_stats().noop_updates, 1);
    }

    #[test]
    fn update_merges_and_replace_overwrites() {
        let collection = collection(&MemoryMetadata::new());
        let input = Value::object([
            ("_key", Value::from("a")),
            ("n", Value::from(1)),
            ("keep", Value::from(true)),
        ]);
        collection.insert(&trx(), &input, &opts(), true).unwrap();

        collection
            .update(&trx(), &Value::object([("_key", Value::from("a")), ("n", Value::from(2))]), &opts(), true)
            .unwrap();
        let merged = collection.document(&trx(), "a").unwrap();
        assert_eq!(merged.get("n"), Some(&Value::from(2)));
        assert_eq!(merged.get("keep"), Some(&Value::from(true)));

        collection
            .replace(&trx(), &Value::object([("_key", Value::from("a")), ("m", Value::from(3))]), &opts(), true)
            .unwrap();
        let replaced = collection.document(&trx(), "a").unwrap();
        assert_eq!(replaced.get("keep"), None);
        assert_eq!(replaced.get("m"), Some(&Value::from(3)));
        assert_eq!(replaced.get("_id"), Some(&Value::Integer(42)));

        let stats = collection.operation_stats();
        assert_eq!((stats.inserts, stats.updates, stats.replaces), (1, 1, 1));
    }

    #[test]
    fn remove_restores_count() {
        let collection = collection(&MemoryMetadata::new());
        collection.insert(&trx(), &document("a", 1), &opts(), true).unwrap();
        collection.insert(&trx(), &document("b", 1), &opts(), true).unwrap();

        let result = collection.remove(&trx(), &Value::from("a"), &opts(), true).unwrap();
        assert!(result.new.is_none());
        assert!(result.old.is_some());
        collection
            .remove(&trx(), &Value::object([("_key", Value::from("b"))]), &opts(), true)
            .unwrap();

        assert_eq!(collection.document_count(), 0);
        assert!(matches!(
            collection.lookup(&trx(), "a"),
            Err(CoreError::DocumentNotFound { .. })
        ));
        assert!(matches!(
            collection.remove(&trx(), &Value::from("a"), &opts(), true),
            Err(CoreError::DocumentNotFound { .. })
        ));
        assert!(matches!(
            collection.remove(&trx(), &Value::from(3), &opts(), true),
            Err(CoreError::DocumentHandleBad)
        ));
        assert_eq!(collection.figures().deletions, 2);
    }

    #[test]
    fn unique_secondary_violation_rolls_back_insert() {
        let collection = collection(&MemoryMetadata::new());
        let index = collection
            .ensure_hash_index(&trx(), vec!["n".to_string()], true, false)
            .unwrap();
        collection.insert(&trx(), &document("a", 1), &opts(), true).unwrap();

        let err = collection
            .insert(&trx(), &document("b", 1), &opts(), true)
            .unwrap_err();
        assert!(err.is_unique_violation());
        assert!(collection.lookup(&trx(), "b").is_err());
        assert_eq!(collection.document_count(), 1);
        assert_eq!(
            collection
                .lookup_index(&trx(), index.id, &[Value::from(1)])
                .unwrap()
                .len(),
            1
        );
        assert_eq!(collection.operation_stats().rollbacks, 1);

        collection.insert(&trx(), &document("b", 2), &opts(), true).unwrap();
        assert_eq!(collection.document_count(), 2);
    }

    #[test]
    fn failed_update_restores_old_revision() {
        let collection = collection(&MemoryMetadata::new());
        let index = collection
            .ensure_skiplist_index(&trx(), vec!["n".to_string()], true, false)
            .unwrap();
        collection.insert(&trx(), &document("a", 1), &opts(), true).unwrap();
        collection.insert(&trx(), &document("b", 2), &opts(), true).unwrap();
        let before = collection.lookup(&trx(), "b").unwrap();
        let markers = collection.markers_written();

        let err = collection
            .update(&trx(), &document("b", 1), &opts(), true)
            .unwrap_err();
        assert!(err.is_unique_violation());
        assert_eq!(collection.lookup(&trx(), "b").unwrap(), before);
        assert_eq!(collection.markers_written(), markers);

        let by_n = |n: i64| {
            collection
                .lookup_index(&trx(), index.id, &[Value::from(n)])
                .unwrap()
                .into_iter()
                .map(|h| h.key().unwrap())
                .collect::<Vec<_>>()
        };
        assert_eq!(by_n(1), vec!["a".to_string()]);
        assert_eq!(by_n(2), vec!["b".to_string()]);
    }

    #[test]
    fn log_failure_reverts_insert() {
        let switch = FaultSwitch::new();
        let metadata = MemoryMetadata::new().with_segment_faults(switch.clone());
        let collection = collection(&metadata);
        let index = collection
            .ensure_hash_index(&trx(), vec!["n".to_string()], false, false)
            .unwrap();

        switch.fail_now();
        let err = collection
            .insert(&trx(), &document("a", 1), &opts(), true)
            .unwrap_err();
        assert!(matches!(err, CoreError::LogWriteFailed { .. }));
        assert!(collection.lookup(&trx(), "a").is_err());
        assert_eq!(collection.document_count(), 0);
        assert!(collection
            .lookup_index(&trx(), index.id, &[Value::from(1)])
            .unwrap()
            .is_empty());

        switch.reset();
        collection.insert(&trx(), &document("a", 1), &opts(), true).unwrap();
        assert_eq!(collection.document_count(), 1);
    }

    #[test]
    fn log_failure_reverts_remove_and_replace() {
        let switch = FaultSwitch::new();
        let metadata = MemoryMetadata::new().with_segment_faults(switch.clone());
        let collection = collection(&metadata);
        let index = collection
            .ensure_hash_index(&trx(), vec!["n".to_string()], false, false)
            .unwrap();
        collection.insert(&trx(), &document("a", 1), &opts(), true).unwrap();
        let before = collection.lookup(&trx(), "a").unwrap();

        switch.fail_now();
        assert!(collection.remove(&trx(), &Value::from("a"), &opts(), true).is_err());
        switch.fail_now();
        assert!(collection.replace(&trx(), &document("a", 5), &opts(), true).is_err());
        switch.reset();

        assert_eq!(collection.lookup(&trx(), "a").unwrap(), before);
        assert_eq!(collection.document_count(), 1);
        assert_eq!(
            collection
                .lookup_index(&trx(), index.id, &[Value::from(1)])
                .unwrap(),
            vec![before]
        );
        assert!(collection
            .lookup_index(&trx(), index.id, &[Value::from(5)])
            .unwrap()
            .is_empty());
        assert_eq!(collection.operation_stats().rollbacks, 2);
    }

    #[test]
    fn edge_endpoints_are_required() {
        let collection = build(|_| {}, context(&MemoryMetadata::new()), CollectionType::Edge);
        let bad = Value::object([("_key", Value::from("e")), ("_from", Value::from("users/a"))]);
        assert!(matches!(
            collection.insert(&trx(), &bad, &opts(), true),
            Err(CoreError::InvalidEdgeAttribute { attribute: "_to" })
        ));
        let good = Value::object([
            ("_key", Value::from("e")),
            ("_from", Value::from("users/a")),
            ("_to", Value::from("users/b")),
        ]);
        collection.insert(&trx(), &good, &opts(), true).unwrap();
        assert_eq!(
            collection
                .lookup_index(&trx(), IndexId::EDGE, &[Value::Null, Value::from("users/b")])
                .unwrap()
                .len(),
            1
        );
        assert_eq!(collection.document_count(), 1);
    }

    #[test]
    fn shard_key_changes_are_rejected_on_db_servers() {
        let metadata = MemoryMetadata::new();
        let mut ctx = context(&metadata);
        ctx.config = ctx.config.clone().server_role(ServerRole::DbServer);
        let collection = build(
            |info| {
                info.plan_id = 99;
                info.shard_keys = vec!["region".to_string()];
            },
            ctx,
            CollectionType::Document,
        );
        let input = Value::object([("_key", Value::from("a")), ("region", Value::from("eu"))]);
        collection.insert(&trx(), &input, &opts(), true).unwrap();
        assert_eq!(
            collection.document(&trx(), "a").unwrap().get("_id"),
            Some(&Value::Integer(99))
        );

        let moved = Value::object([("_key", Value::from("a")), ("region", Value::from("us"))]);
        assert!(matches!(
            collection.update(&trx(), &moved, &opts(), true),
            Err(CoreError::ShardKeyChanged)
        ));
        let other = Value::object([("_key", Value::from("a")), ("x", Value::from(1))]);
        collection.update(&trx(), &other, &opts(), true).unwrap();
    }

    #[test]
    fn no_lock_declaration_skips_locking() {
        let collection = collection(&MemoryMetadata::new());
        let holder = Transaction::new(TransactionId::new(7));
        holder
            .lock_collection(&collection, LockMode::Write, Duration::from_secs(1))
            .unwrap();

        let other = Transaction::new(TransactionId::new(8));
        assert!(matches!(
            collection.insert(&other, &document("a", 1), &opts(), true),
            Err(CoreError::LockTimeout { .. })
        ));
        other.add_no_lock("docs");
        collection.insert(&other, &document("a", 1), &opts(), true).unwrap();
        collection.insert(&holder, &document("b", 1), &opts(), true).unwrap();
        collection.insert(&trx(), &document("c", 1), &opts(), false).unwrap();
        assert_eq!(collection.document_count(), 3);
    }

    #[test]
    fn synced_writes_succeed() {
        let collection = collection(&MemoryMetadata::new());
        let result = collection
            .insert(&trx(), &document("a", 1), &opts().wait_for_sync(true), true)
            .unwrap();
        assert!(result.tick > 0);
        assert_eq!(collection.operation_stats().markers_written, 1);
    }

    #[test]
    fn unload_purges_fulltext_garbage() {
        use crate::index::{FulltextIndex, IndexKind};

        let collection = collection(&MemoryMetadata::new());
        collection
            .ensure_fulltext_index(&trx(), "text".to_string(), 2)
            .unwrap();
        let body = Value::object([("_key", Value::from("a")), ("text", Value::from("old words"))]);
        collection.insert(&trx(), &body, &opts(), true).unwrap();
        let patch = Value::object([("_key", Value::from("a")), ("text", Value::from("new"))]);
        collection.update(&trx(), &patch, &opts(), true).unwrap();

        let garbage = |collection: &DocumentCollection| {
            let state = collection.state.read();
            state
                .indexes
                .find_kind(IndexKind::Fulltext)
                .and_then(|index| index.as_any().downcast_ref::<FulltextIndex>())
                .map(FulltextIndex::garbage_len)
                .unwrap()
        };
        assert_eq!(garbage(&collection), 1);
        collection.unload().unwrap();
        assert_eq!(garbage(&collection), 0);
    }
}
