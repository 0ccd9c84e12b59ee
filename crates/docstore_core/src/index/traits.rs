//! The index contract and shared helpers.

use std::any::Any;
use std::fmt;

use docstore_codec::Value;
use rayon::ThreadPool;

use crate::error::{CoreError, CoreResult};
use crate::revision::HandleId;
use crate::types::IndexId;

/// Kinds of index a collection can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// Unique `_key` lookup. Always present.
    Primary,
    /// `_from`/`_to` lookup. Present in edge collections.
    Edge,
    /// Equality lookup on one or more attributes.
    Hash,
    /// Ordered lookup on one or more attributes.
    Skiplist,
    /// Ordered lookup, maintained even during bulk loads.
    Persistent,
    /// Geo index over one `[lat, lon]` attribute.
    Geo1,
    /// Geo index over separate latitude and longitude attributes.
    Geo2,
    /// Word lookup over one text attribute.
    Fulltext,
}

impl IndexKind {
    /// Name used in index definitions.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Edge => "edge",
            Self::Hash => "hash",
            Self::Skiplist => "skiplist",
            Self::Persistent => "persistent",
            Self::Geo1 => "geo1",
            Self::Geo2 => "geo2",
            Self::Fulltext => "fulltext",
        }
    }

    /// Parses a definition type name. `rocksdb` is accepted for persistent.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "primary" => Self::Primary,
            "edge" => Self::Edge,
            "hash" => Self::Hash,
            "skiplist" => Self::Skiplist,
            "persistent" | "rocksdb" => Self::Persistent,
            "geo1" => Self::Geo1,
            "geo2" => Self::Geo2,
            "fulltext" => Self::Fulltext,
            _ => return None,
        })
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document as seen by an index: its handle plus decoded body.
#[derive(Debug, Clone, Copy)]
pub struct IndexedDocument<'a> {
    /// Arena handle of the document.
    pub handle: HandleId,
    /// Decoded document body.
    pub value: &'a Value,
}

impl<'a> IndexedDocument<'a> {
    /// Pairs a handle with its body.
    #[must_use]
    pub const fn new(handle: HandleId, value: &'a Value) -> Self {
        Self { handle, value }
    }
}

/// Uniform contract over every index kind.
///
/// Indexes store [`HandleId`]s, never document content. `remove` with
/// `is_rollback` set must tolerate entries that were never inserted.
pub trait Index: Send + Sync + fmt::Debug {
    /// Index id, unique within the collection.
    fn id(&self) -> IndexId;

    /// Index kind.
    fn kind(&self) -> IndexKind;

    /// Indexed attribute paths, dot-separated.
    fn fields(&self) -> &[String];

    /// True if the index rejects duplicate values.
    fn unique(&self) -> bool {
        false
    }

    /// True if documents with null or missing values are left out.
    fn sparse(&self) -> bool {
        false
    }

    /// True if the index is maintained while secondary maintenance is off.
    fn is_persistent(&self) -> bool {
        false
    }

    /// True if the index may be dropped by users.
    fn can_be_dropped(&self) -> bool {
        true
    }

    /// True if [`Index::cleanup`] does real work.
    fn has_cleanup(&self) -> bool {
        false
    }

    /// True if [`Index::batch_insert`] is faster than repeated inserts.
    fn has_batch_insert(&self) -> bool {
        false
    }

    /// Adds a document.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UniqueConstraintViolated`] for duplicates in a
    /// unique index, or an out-of-memory error.
    fn insert(&mut self, doc: &IndexedDocument<'_>, is_rollback: bool) -> CoreResult<()>;

    /// Removes a document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not indexed and `is_rollback`
    /// is false.
    fn remove(&mut self, doc: &IndexedDocument<'_>, is_rollback: bool) -> CoreResult<()>;

    /// Adds many documents, possibly using `pool`.
    ///
    /// # Errors
    ///
    /// Returns the first insert error.
    fn batch_insert(&mut self, docs: &[IndexedDocument<'_>], _pool: &ThreadPool) -> CoreResult<()> {
        docs.iter().try_for_each(|doc| self.insert(doc, false))
    }

    /// Announces the expected number of documents.
    fn size_hint(&mut self, _documents: usize) {}

    /// Purges deferred garbage.
    ///
    /// # Errors
    ///
    /// Implementation specific.
    fn cleanup(&mut self) -> CoreResult<()> {
        Ok(())
    }

    /// Approximate bytes used.
    fn memory(&self) -> usize;

    /// Number of indexed documents.
    fn len(&self) -> usize;

    /// True if nothing is indexed.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handles whose indexed values equal `values`, one per field.
    fn lookup(&self, values: &[Value]) -> Vec<HandleId>;

    /// Drops every entry.
    fn clear(&mut self);

    /// Serializable definition.
    fn definition(&self) -> Value {
        base_definition(self.id(), self.kind(), self.fields(), self.unique(), self.sparse())
    }

    /// Access to the concrete type.
    fn as_any(&self) -> &dyn Any;
}

/// The definition fields every index shares.
#[must_use]
pub fn base_definition(id: IndexId, kind: IndexKind, fields: &[String], unique: bool, sparse: bool) -> Value {
    Value::object([
        ("id", Value::Text(id.as_u64().to_string())),
        ("type", Value::from(kind.as_str())),
        (
            "fields",
            Value::Array(fields.iter().map(|f| Value::from(f.as_str())).collect()),
        ),
        ("unique", Value::from(unique)),
        ("sparse", Value::from(sparse)),
    ])
}

/// Splits dotted field names into attribute paths.
#[must_use]
pub fn split_paths(fields: &[String]) -> Vec<Vec<String>> {
    fields
        .iter()
        .map(|f| f.split('.').map(str::to_string).collect())
        .collect()
}

/// Values of `paths` in `doc`.
///
/// Missing attributes read as null. A sparse index skips the document
/// (returns `None`) if any value is null.
#[must_use]
pub fn extract_values(doc: &Value, paths: &[Vec<String>], sparse: bool) -> Option<Vec<Value>> {
    let mut out = Vec::with_capacity(paths.len());
    for path in paths {
        let value = doc.get_path(path).cloned().unwrap_or(Value::Null);
        if sparse && value.is_null() {
            return None;
        }
        out.push(value);
    }
    Some(out)
}

/// Renders values for error messages.
#[must_use]
pub fn describe(values: &[Value]) -> String {
    let parts: Vec<String> = values
        .iter()
        .map(|v| match v {
            Value::Text(t) => t.clone(),
            other => format!("{other:?}"),
        })
        .collect();
    parts.join(",")
}

/// The error for removing something the index never held.
#[must_use]
pub fn not_indexed(id: IndexId, handle: HandleId) -> CoreError {
    CoreError::internal(format!("{handle} is not present in index {id}"))
}
