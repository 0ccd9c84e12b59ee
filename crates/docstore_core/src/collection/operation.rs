//! One document mutation bound to its log marker.
//!
//! A [`DocumentOperation`] is created once the target handle is known,
//! applied to the indexes, then committed by writing its marker. Until the
//! commit succeeds it can undo everything it did: index layers are unwound
//! in the reverse order they were touched, and the arena handle is only
//! freed for a reverted insert or a committed remove.

use docstore_codec::Value;
use tracing::error;

use crate::collection::CollectionState;
use crate::error::{CoreError, CoreResult};
use crate::index::IndexedDocument;
use crate::revision::{DocumentHandle, HandleId};
use crate::wal::{LogWriter, Marker, MarkerLocation};

/// What an operation does to its document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// A new document.
    Insert,
    /// A merged revision.
    Update,
    /// A wholesale new revision.
    Replace,
    /// Removal of the document.
    Remove,
}

/// A stored revision together with its decoded body.
#[derive(Debug, Clone)]
pub(crate) struct Revision {
    pub document: DocumentHandle,
    pub value: Value,
}

/// A mutation in flight.
#[derive(Debug)]
pub(crate) struct DocumentOperation {
    kind: OperationKind,
    key: String,
    handle: HandleId,
    old: Option<Revision>,
    new: Option<Revision>,
    indexed: bool,
}

fn log_rollback(result: CoreResult<()>, key: &str, step: &str) {
    if let Err(e) = result {
        error!(key, step, error = %e, "rollback failed");
    }
}

impl DocumentOperation {
    /// Allocates a handle for a new document.
    pub fn insert(state: &mut CollectionState, key: String, new: Revision) -> CoreResult<Self> {
        let handle = state.arena.request()?;
        if let Err(e) = state.arena.replace(handle, new.document.clone()) {
            state.arena.release(handle);
            return Err(e);
        }
        Ok(Self {
            kind: OperationKind::Insert,
            key,
            handle,
            old: None,
            new: Some(new),
            indexed: false,
        })
    }

    /// A new revision for the document at `handle`.
    pub fn modify(kind: OperationKind, key: String, handle: HandleId, old: Revision, new: Revision) -> Self {
        Self {
            kind,
            key,
            handle,
            old: Some(old),
            new: Some(new),
            indexed: false,
        }
    }

    /// Removal of the document at `handle`.
    pub fn remove(key: String, handle: HandleId, old: Revision) -> Self {
        Self {
            kind: OperationKind::Remove,
            key,
            handle,
            old: Some(old),
            new: None,
            indexed: false,
        }
    }

    fn revision<'a>(revision: &'a Option<Revision>) -> CoreResult<&'a Revision> {
        revision
            .as_ref()
            .ok_or_else(|| CoreError::internal("operation without required revision"))
    }

    /// Applies the operation to every index.
    ///
    /// On error the indexes are back in their previous state and, for an
    /// insert, the handle has been released.
    pub fn index(&mut self, state: &mut CollectionState) -> CoreResult<()> {
        match self.kind {
            OperationKind::Insert => self.index_insert(state)?,
            OperationKind::Update | OperationKind::Replace => self.index_swap(state)?,
            OperationKind::Remove => self.index_remove(state)?,
        }
        self.indexed = true;
        Ok(())
    }

    fn index_insert(&self, state: &mut CollectionState) -> CoreResult<()> {
        let new = Self::revision(&self.new)?;
        if let Err(e) = state.indexes.primary_mut().insert_key(&self.key, self.handle) {
            state.arena.release(self.handle);
            return Err(e);
        }
        let doc = IndexedDocument::new(self.handle, &new.value);
        if let Err(e) = state.indexes.insert_secondary(&doc, false) {
            log_rollback(state.indexes.delete_secondary(&doc, true), &self.key, "secondary");
            state.indexes.primary_mut().remove_key(&self.key);
            state.arena.release(self.handle);
            return Err(e);
        }
        Ok(())
    }

    fn index_swap(&self, state: &mut CollectionState) -> CoreResult<()> {
        let old = Self::revision(&self.old)?;
        let new = Self::revision(&self.new)?;
        let old_doc = IndexedDocument::new(self.handle, &old.value);
        let new_doc = IndexedDocument::new(self.handle, &new.value);

        if let Err(e) = state.indexes.delete_secondary(&old_doc, false) {
            log_rollback(state.indexes.insert_secondary(&old_doc, true), &self.key, "secondary");
            return Err(e);
        }
        if let Err(e) = state.arena.replace(self.handle, new.document.clone()) {
            log_rollback(state.indexes.insert_secondary(&old_doc, true), &self.key, "secondary");
            return Err(e);
        }
        if let Err(e) = state.indexes.insert_secondary(&new_doc, false) {
            log_rollback(state.indexes.delete_secondary(&new_doc, true), &self.key, "secondary");
            log_rollback(
                state.arena.replace(self.handle, old.document.clone()).map(drop),
                &self.key,
                "arena",
            );
            log_rollback(state.indexes.insert_secondary(&old_doc, true), &self.key, "secondary");
            return Err(e);
        }
        Ok(())
    }

    fn index_remove(&self, state: &mut CollectionState) -> CoreResult<()> {
        let old = Self::revision(&self.old)?;
        let doc = IndexedDocument::new(self.handle, &old.value);
        if let Err(e) = state.indexes.delete_secondary(&doc, false) {
            log_rollback(state.indexes.insert_secondary(&doc, true), &self.key, "secondary");
            return Err(e);
        }
        if state.indexes.primary_mut().remove_key(&self.key) != Some(self.handle) {
            log_rollback(state.indexes.insert_secondary(&doc, true), &self.key, "secondary");
            return Err(CoreError::internal(format!(
                "primary index does not map '{}' to {}",
                self.key, self.handle
            )));
        }
        Ok(())
    }

    /// Undoes an indexed operation.
    pub fn revert(&self, state: &mut CollectionState) {
        if !self.indexed {
            return;
        }
        let key = self.key.as_str();
        match (self.kind, &self.old, &self.new) {
            (OperationKind::Insert, _, Some(new)) => {
                let doc = IndexedDocument::new(self.handle, &new.value);
                log_rollback(state.indexes.delete_secondary(&doc, true), key, "secondary");
                state.indexes.primary_mut().remove_key(key);
                state.arena.release(self.handle);
            }
            (OperationKind::Update | OperationKind::Replace, Some(old), Some(new)) => {
                let new_doc = IndexedDocument::new(self.handle, &new.value);
                log_rollback(state.indexes.delete_secondary(&new_doc, true), key, "secondary");
                log_rollback(
                    state.arena.replace(self.handle, old.document.clone()).map(drop),
                    key,
                    "arena",
                );
                let old_doc = IndexedDocument::new(self.handle, &old.value);
                log_rollback(state.indexes.insert_secondary(&old_doc, true), key, "secondary");
            }
            (OperationKind::Remove, Some(old), _) => {
                log_rollback(state.indexes.primary_mut().insert_key(key, self.handle), key, "primary");
                let doc = IndexedDocument::new(self.handle, &old.value);
                log_rollback(state.indexes.insert_secondary(&doc, true), key, "secondary");
            }
            _ => error!(key, kind = ?self.kind, "operation cannot be reverted"),
        }
    }

    /// Writes `marker` and finalizes the in-memory state.
    ///
    /// Returns the marker location and, unless this is a remove, the stored
    /// revision pointing at it. If the write fails everything is reverted.
    pub fn commit(
        self,
        state: &mut CollectionState,
        log: &dyn LogWriter,
        marker: &Marker,
    ) -> CoreResult<(MarkerLocation, Option<DocumentHandle>)> {
        if !self.indexed {
            return Err(CoreError::internal("committing an operation that was not indexed"));
        }
        let location = match log.write_marker(marker) {
            Ok(location) => location,
            Err(e) => {
                self.revert(state);
                return Err(e);
            }
        };

        state.segments.observe(location.fid, location.tick);
        state.tick_max = state.tick_max.max(location.tick);
        if let Some(old) = &self.old {
            state.segments.dead(old.document.fid, old.document.marker_size);
        }

        let stored = match self.new {
            Some(new) => {
                let stored = DocumentHandle {
                    fid: location.fid,
                    offset: location.offset,
                    tick: location.tick,
                    marker_size: location.size,
                    ..new.document
                };
                state.arena.replace(self.handle, stored.clone())?;
                state.segments.alive(location.fid, location.size);
                state.last_revision = state.last_revision.max(stored.revision);
                Some(stored)
            }
            None => {
                state.arena.release(self.handle);
                state.segments.deletion(location.fid);
                None
            }
        };
        match self.kind {
            OperationKind::Insert => state.number_documents += 1,
            OperationKind::Remove => state.number_documents = state.number_documents.saturating_sub(1),
            OperationKind::Update | OperationKind::Replace => {}
        }
        Ok((location, stored))
    }
}
