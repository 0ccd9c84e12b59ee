//! Ordered index used for the skiplist and persistent kinds.

use std::any::Any;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;

use docstore_codec::Value;

use crate::error::{CoreError, CoreResult};
use crate::index::traits::{
    describe, extract_values, not_indexed, split_paths, Index, IndexKind, IndexedDocument,
};
use crate::revision::HandleId;
use crate::types::IndexId;

/// Tuple of indexed values, ordered by [`Value::compare`].
#[derive(Debug, Clone)]
struct OrderedKey(Vec<Value>);

impl PartialEq for OrderedKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderedKey {}

impl PartialOrd for OrderedKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            let ord = a.compare(b);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

/// Sorted index over one or more attributes.
///
/// A persistent index is the same structure flagged as persistent, which
/// keeps it maintained while secondary maintenance is switched off.
#[derive(Debug)]
pub struct SkiplistIndex {
    id: IndexId,
    kind: IndexKind,
    fields: Vec<String>,
    paths: Vec<Vec<String>>,
    unique: bool,
    sparse: bool,
    entries: BTreeMap<OrderedKey, Vec<HandleId>>,
    count: usize,
}

impl SkiplistIndex {
    /// Creates a skiplist index.
    #[must_use]
    pub fn skiplist(id: IndexId, fields: Vec<String>, unique: bool, sparse: bool) -> Self {
        Self::with_kind(id, IndexKind::Skiplist, fields, unique, sparse)
    }

    /// Creates a persistent index.
    #[must_use]
    pub fn persistent(id: IndexId, fields: Vec<String>, unique: bool, sparse: bool) -> Self {
        Self::with_kind(id, IndexKind::Persistent, fields, unique, sparse)
    }

    fn with_kind(id: IndexId, kind: IndexKind, fields: Vec<String>, unique: bool, sparse: bool) -> Self {
        Self {
            id,
            kind,
            paths: split_paths(&fields),
            fields,
            unique,
            sparse,
            entries: BTreeMap::new(),
            count: 0,
        }
    }

    /// Handles whose values lie between `lower` and `upper`, in value order.
    #[must_use]
    pub fn range(&self, lower: Bound<&[Value]>, upper: Bound<&[Value]>) -> Vec<HandleId> {
        let wrap = |bound: Bound<&[Value]>| match bound {
            Bound::Included(v) => Bound::Included(OrderedKey(v.to_vec())),
            Bound::Excluded(v) => Bound::Excluded(OrderedKey(v.to_vec())),
            Bound::Unbounded => Bound::Unbounded,
        };
        let (lower, upper) = (wrap(lower), wrap(upper));
        let empty = match (&lower, &upper) {
            (Bound::Included(l), Bound::Included(u)) => l > u,
            (Bound::Included(l) | Bound::Excluded(l), Bound::Included(u) | Bound::Excluded(u)) => l >= u,
            _ => false,
        };
        if empty {
            return Vec::new();
        }
        self.entries
            .range((lower, upper))
            .flat_map(|(_, handles)| handles.iter().copied())
            .collect()
    }

    /// Every handle in value order.
    #[must_use]
    pub fn ordered(&self) -> Vec<HandleId> {
        self.entries.values().flatten().copied().collect()
    }
}

impl Index for SkiplistIndex {
    fn id(&self) -> IndexId {
        self.id
    }

    fn kind(&self) -> IndexKind {
        self.kind
    }

    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn unique(&self) -> bool {
        self.unique
    }

    fn sparse(&self) -> bool {
        self.sparse
    }

    fn is_persistent(&self) -> bool {
        self.kind == IndexKind::Persistent
    }

    fn insert(&mut self, doc: &IndexedDocument<'_>, _is_rollback: bool) -> CoreResult<()> {
        let Some(values) = extract_values(doc.value, &self.paths, self.sparse) else {
            return Ok(());
        };
        let entry = self.entries.entry(OrderedKey(values)).or_default();
        if entry.contains(&doc.handle) {
            return Ok(());
        }
        if self.unique && !entry.is_empty() {
            let key = describe(&extract_values(doc.value, &self.paths, false).unwrap_or_default());
            return Err(CoreError::UniqueConstraintViolated {
                index_id: self.id.as_u64(),
                key,
            });
        }
        entry.push(doc.handle);
        self.count += 1;
        Ok(())
    }

    fn remove(&mut self, doc: &IndexedDocument<'_>, is_rollback: bool) -> CoreResult<()> {
        let Some(values) = extract_values(doc.value, &self.paths, self.sparse) else {
            return Ok(());
        };
        let key = OrderedKey(values);
        let mut removed = false;
        if let Some(handles) = self.entries.get_mut(&key) {
            let before = handles.len();
            handles.retain(|h| *h != doc.handle);
            removed = handles.len() < before;
            if handles.is_empty() {
                self.entries.remove(&key);
            }
        }
        if removed {
            self.count -= 1;
        } else if !is_rollback {
            return Err(not_indexed(self.id, doc.handle));
        }
        Ok(())
    }

    fn memory(&self) -> usize {
        self.entries
            .values()
            .map(|v| {
                std::mem::size_of::<OrderedKey>()
                    + self.paths.len() * std::mem::size_of::<Value>()
                    + v.len() * std::mem::size_of::<HandleId>()
            })
            .sum()
    }

    fn len(&self) -> usize {
        self.count
    }

    fn lookup(&self, values: &[Value]) -> Vec<HandleId> {
        self.entries
            .get(&OrderedKey(values.to_vec()))
            .cloned()
            .unwrap_or_default()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.count = 0;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn doc(age: i64) -> Value {
        Value::object([("age", Value::from(age))])
    }

    #[test]
    fn range_scan_is_ordered() {
        let mut index = SkiplistIndex::skiplist(IndexId::new(3), vec!["age".into()], false, false);
        for (i, age) in [30, 10, 20, 40].into_iter().enumerate() {
            index
                .insert(&IndexedDocument::new(HandleId::new(i), &doc(age)), false)
                .unwrap();
        }
        let found = index.range(
            Bound::Included(&[Value::from(15)][..]),
            Bound::Excluded(&[Value::from(40)][..]),
        );
        assert_eq!(found, vec![HandleId::new(2), HandleId::new(0)]);
        assert_eq!(index.ordered().first(), Some(&HandleId::new(1)));
    }

    #[test]
    fn numbers_compare_across_representations() {
        let mut index = SkiplistIndex::persistent(IndexId::new(3), vec!["age".into()], true, false);
        index
            .insert(&IndexedDocument::new(HandleId::new(0), &doc(2)), false)
            .unwrap();
        let float = Value::object([("age", Value::Float(2.0))]);
        assert!(index
            .insert(&IndexedDocument::new(HandleId::new(1), &float), false)
            .unwrap_err()
            .is_unique_violation());
        assert!(index.is_persistent());
    }

    #[test]
    fn inverted_range_is_empty() {
        let index = SkiplistIndex::skiplist(IndexId::new(3), vec!["age".into()], false, false);
        assert!(index
            .range(
                Bound::Included(&[Value::from(5)][..]),
                Bound::Included(&[Value::from(1)][..]),
            )
            .is_empty());
    }

    proptest! {
        #[test]
        fn ordered_scan_is_sorted(ages in proptest::collection::vec(-1000i64..1000, 0..64)) {
            let mut index = SkiplistIndex::skiplist(IndexId::new(1), vec!["age".into()], false, false);
            let docs: Vec<Value> = ages.iter().map(|a| doc(*a)).collect();
            for (i, d) in docs.iter().enumerate() {
                index.insert(&IndexedDocument::new(HandleId::new(i), d), false).unwrap();
            }
            let scanned: Vec<i64> = index
                .ordered()
                .into_iter()
                .map(|h| ages[h.index()])
                .collect();
            let mut sorted = ages.clone();
            sorted.sort_unstable();
            prop_assert_eq!(scanned, sorted);
        }
    }
}
