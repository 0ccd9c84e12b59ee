//! Primary index: `_key` to document handle.

use std::any::Any;
use std::collections::HashMap;

use docstore_codec::Value;

use crate::document::KEY;
use crate::error::{CoreError, CoreResult};
use crate::index::traits::{not_indexed, Index, IndexKind, IndexedDocument};
use crate::revision::HandleId;
use crate::types::IndexId;

/// Unique map from document key to handle.
///
/// Every live document has exactly one entry; secondary indexes are only
/// consulted after the primary lookup succeeded.
#[derive(Debug)]
pub struct PrimaryIndex {
    keys: HashMap<String, HandleId>,
    fields: Vec<String>,
}

impl Default for PrimaryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl PrimaryIndex {
    /// Creates an empty primary index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
            fields: vec![KEY.to_string()],
        }
    }

    /// Handle stored for `key`.
    #[must_use]
    pub fn lookup_key(&self, key: &str) -> Option<HandleId> {
        self.keys.get(key).copied()
    }

    /// Adds `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UniqueConstraintViolated`] if the key is taken.
    pub fn insert_key(&mut self, key: &str, handle: HandleId) -> CoreResult<()> {
        if self.keys.contains_key(key) {
            return Err(CoreError::UniqueConstraintViolated {
                index_id: IndexId::PRIMARY.as_u64(),
                key: key.to_string(),
            });
        }
        self.keys.insert(key.to_string(), handle);
        Ok(())
    }

    /// Removes `key`, returning the handle it pointed to.
    pub fn remove_key(&mut self, key: &str) -> Option<HandleId> {
        self.keys.remove(key)
    }

    /// Every handle, in ascending order.
    #[must_use]
    pub fn handles(&self) -> Vec<HandleId> {
        let mut handles: Vec<HandleId> = self.keys.values().copied().collect();
        handles.sort_unstable();
        handles
    }

    /// Every `(key, handle)` pair, in key order.
    #[must_use]
    pub fn entries(&self) -> Vec<(&str, HandleId)> {
        let mut entries: Vec<(&str, HandleId)> =
            self.keys.iter().map(|(k, h)| (k.as_str(), *h)).collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
        entries
    }
}

fn key_of<'a>(doc: &IndexedDocument<'a>) -> CoreResult<&'a str> {
    doc.value
        .get(KEY)
        .and_then(Value::as_text)
        .ok_or(CoreError::DocumentHandleBad)
}

impl Index for PrimaryIndex {
    fn id(&self) -> IndexId {
        IndexId::PRIMARY
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Primary
    }

    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn unique(&self) -> bool {
        true
    }

    fn is_persistent(&self) -> bool {
        true
    }

    fn can_be_dropped(&self) -> bool {
        false
    }

    fn insert(&mut self, doc: &IndexedDocument<'_>, _is_rollback: bool) -> CoreResult<()> {
        self.insert_key(key_of(doc)?, doc.handle)
    }

    fn remove(&mut self, doc: &IndexedDocument<'_>, is_rollback: bool) -> CoreResult<()> {
        let key = key_of(doc)?;
        match self.keys.get(key) {
            Some(handle) if *handle == doc.handle => {
                self.keys.remove(key);
                Ok(())
            }
            _ if is_rollback => Ok(()),
            _ => Err(not_indexed(IndexId::PRIMARY, doc.handle)),
        }
    }

    fn size_hint(&mut self, documents: usize) {
        self.keys.reserve(documents.saturating_sub(self.keys.len()));
    }

    fn memory(&self) -> usize {
        self.keys
            .keys()
            .map(|k| k.capacity() + std::mem::size_of::<(String, HandleId)>())
            .sum()
    }

    fn len(&self) -> usize {
        self.keys.len()
    }

    fn lookup(&self, values: &[Value]) -> Vec<HandleId> {
        values
            .first()
            .and_then(Value::as_text)
            .and_then(|key| self.lookup_key(key))
            .into_iter()
            .collect()
    }

    fn clear(&mut self) {
        self.keys.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
