//! Hash index implementation.

use std::any::Any;
use std::collections::HashMap;

use docstore_codec::{EncodeMode, Encoder, Value};
use rayon::prelude::*;
use rayon::ThreadPool;

use crate::error::{CoreError, CoreResult};
use crate::index::traits::{
    describe, extract_values, not_indexed, split_paths, Index, IndexKind, IndexedDocument,
};
use crate::revision::HandleId;
use crate::types::IndexId;

type Bucket = HashMap<Vec<u8>, Vec<HandleId>>;

/// Bucketed hash index for equality lookups.
///
/// Values are normalized (integral floats become integers, object keys
/// are sorted) and encoded to bytes; the encoded key selects a bucket by
/// checksum. Buckets are independent, so a batch insert fills them in
/// parallel.
#[derive(Debug)]
pub struct HashIndex {
    id: IndexId,
    fields: Vec<String>,
    paths: Vec<Vec<String>>,
    unique: bool,
    sparse: bool,
    buckets: Vec<Bucket>,
    count: usize,
}

impl HashIndex {
    /// Creates an empty index with `buckets` buckets (at least one).
    #[must_use]
    pub fn new(id: IndexId, fields: Vec<String>, unique: bool, sparse: bool, buckets: u32) -> Self {
        let buckets = buckets.max(1) as usize;
        Self {
            id,
            paths: split_paths(&fields),
            fields,
            unique,
            sparse,
            buckets: (0..buckets).map(|_| Bucket::new()).collect(),
            count: 0,
        }
    }

    /// Number of buckets.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    fn bucket_of(&self, key: &[u8]) -> usize {
        crc32fast::hash(key) as usize % self.buckets.len()
    }

    fn key_for(&self, doc: &Value) -> CoreResult<Option<(Vec<u8>, Vec<Value>)>> {
        let Some(values) = extract_values(doc, &self.paths, self.sparse) else {
            return Ok(None);
        };
        Ok(Some((hash_key(&values)?, values)))
    }

    fn insert_key(
        bucket: &mut Bucket,
        id: IndexId,
        unique: bool,
        key: Vec<u8>,
        values: &[Value],
        handle: HandleId,
    ) -> CoreResult<bool> {
        let entry = bucket.entry(key).or_default();
        if entry.contains(&handle) {
            return Ok(false);
        }
        if unique && !entry.is_empty() {
            return Err(CoreError::UniqueConstraintViolated {
                index_id: id.as_u64(),
                key: describe(values),
            });
        }
        entry.push(handle);
        Ok(true)
    }
}

/// Bytes identifying a tuple of values for equality.
pub(crate) fn hash_key(values: &[Value]) -> CoreResult<Vec<u8>> {
    let normalized = Value::Array(values.iter().map(normalize).collect());
    let mut encoder = Encoder::new(EncodeMode::Document);
    encoder.encode(&normalized)?;
    Ok(encoder.into_bytes())
}

#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn normalize(value: &Value) -> Value {
    match value {
        Value::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Value::Integer(*f as i64),
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        Value::Map(pairs) => Value::sorted_map(
            pairs
                .iter()
                .map(|(k, v)| (k.clone(), normalize(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

impl Index for HashIndex {
    fn id(&self) -> IndexId {
        self.id
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Hash
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

    fn has_batch_insert(&self) -> bool {
        true
    }

    fn insert(&mut self, doc: &IndexedDocument<'_>, _is_rollback: bool) -> CoreResult<()> {
        let Some((key, values)) = self.key_for(doc.value)? else {
            return Ok(());
        };
        let bucket = self.bucket_of(&key);
        if Self::insert_key(&mut self.buckets[bucket], self.id, self.unique, key, &values, doc.handle)? {
            self.count += 1;
        }
        Ok(())
    }

    fn remove(&mut self, doc: &IndexedDocument<'_>, is_rollback: bool) -> CoreResult<()> {
        let Some((key, _)) = self.key_for(doc.value)? else {
            return Ok(());
        };
        let bucket = self.bucket_of(&key);
        let bucket = &mut self.buckets[bucket];
        let removed = match bucket.get_mut(&key) {
            Some(handles) => {
                let before = handles.len();
                handles.retain(|h| *h != doc.handle);
                let removed = handles.len() < before;
                if handles.is_empty() {
                    bucket.remove(&key);
                }
                removed
            }
            None => false,
        };
        if removed {
            self.count -= 1;
            Ok(())
        } else if is_rollback {
            Ok(())
        } else {
            Err(not_indexed(self.id, doc.handle))
        }
    }

    fn batch_insert(&mut self, docs: &[IndexedDocument<'_>], pool: &ThreadPool) -> CoreResult<()> {
        let bucket_count = self.buckets.len();
        let paths = &self.paths;
        let sparse = self.sparse;

        let keyed: Vec<(usize, Vec<u8>, Vec<Value>, HandleId)> = pool.install(|| {
            docs.par_iter()
                .filter_map(|doc| match extract_values(doc.value, paths, sparse) {
                    Some(values) => Some(hash_key(&values).map(|key| {
                        let bucket = crc32fast::hash(&key) as usize % bucket_count;
                        (bucket, key, values, doc.handle)
                    })),
                    None => None,
                })
                .collect::<CoreResult<_>>()
        })?;

        let mut groups: Vec<Vec<(Vec<u8>, Vec<Value>, HandleId)>> = vec![Vec::new(); bucket_count];
        for (bucket, key, values, handle) in keyed {
            groups[bucket].push((key, values, handle));
        }

        let (id, unique) = (self.id, self.unique);
        let inserted: Vec<CoreResult<usize>> = pool.install(|| {
            self.buckets
                .par_iter_mut()
                .zip(groups.into_par_iter())
                .map(|(bucket, group)| {
                    let mut inserted = 0;
                    for (key, values, handle) in group {
                        if Self::insert_key(bucket, id, unique, key, &values, handle)? {
                            inserted += 1;
                        }
                    }
                    Ok(inserted)
                })
                .collect()
        });

        let mut first_error = None;
        for result in inserted {
            match result {
                Ok(n) => self.count += n,
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(_) => {}
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn size_hint(&mut self, documents: usize) {
        let per_bucket = documents / self.buckets.len() + 1;
        for bucket in &mut self.buckets {
            bucket.reserve(per_bucket.saturating_sub(bucket.len()));
        }
    }

    fn memory(&self) -> usize {
        self.buckets
            .iter()
            .flat_map(|b| b.iter())
            .map(|(k, v)| k.len() + v.len() * std::mem::size_of::<HandleId>())
            .sum()
    }

    fn len(&self) -> usize {
        self.count
    }

    fn lookup(&self, values: &[Value]) -> Vec<HandleId> {
        let Ok(key) = hash_key(values) else {
            return Vec::new();
        };
        self.buckets[self.bucket_of(&key)]
            .get(&key)
            .cloned()
            .unwrap_or_default()
    }

    fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.count = 0;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(key: &str, email: Value) -> Value {
        Value::object([("_key", Value::from(key)), ("email", email)])
    }

    fn index(unique: bool, sparse: bool) -> HashIndex {
        HashIndex::new(IndexId::new(7), vec!["email".into()], unique, sparse, 4)
    }

    #[test]
    fn insert_and_lookup() {
        let mut index = index(false, false);
        let a = doc("a", Value::from("x@y"));
        let b = doc("b", Value::from("x@y"));
        index.insert(&IndexedDocument::new(HandleId::new(0), &a), false).unwrap();
        index.insert(&IndexedDocument::new(HandleId::new(1), &b), false).unwrap();

        let mut found = index.lookup(&[Value::from("x@y")]);
        found.sort();
        assert_eq!(found, vec![HandleId::new(0), HandleId::new(1)]);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn unique_rejects_second_value() {
        let mut index = index(true, false);
        let a = doc("a", Value::from(1));
        let b = doc("b", Value::Float(1.0));
        index.insert(&IndexedDocument::new(HandleId::new(0), &a), false).unwrap();
        let err = index
            .insert(&IndexedDocument::new(HandleId::new(1), &b), false)
            .unwrap_err();
        assert!(err.is_unique_violation());

        // rollback of the failed insert must not drop the first entry
        index.remove(&IndexedDocument::new(HandleId::new(1), &b), true).unwrap();
        assert_eq!(index.lookup(&[Value::from(1)]), vec![HandleId::new(0)]);
    }

    #[test]
    fn sparse_skips_null() {
        let mut index = index(true, true);
        let a = doc("a", Value::Null);
        let b = Value::object([("_key", Value::from("b"))]);
        index.insert(&IndexedDocument::new(HandleId::new(0), &a), false).unwrap();
        index.insert(&IndexedDocument::new(HandleId::new(1), &b), false).unwrap();
        assert!(index.is_empty());
        index.remove(&IndexedDocument::new(HandleId::new(0), &a), false).unwrap();
    }

    #[test]
    fn remove_missing_fails_unless_rollback() {
        let mut index = index(false, false);
        let a = doc("a", Value::from("v"));
        assert!(index.remove(&IndexedDocument::new(HandleId::new(0), &a), false).is_err());
        assert!(index.remove(&IndexedDocument::new(HandleId::new(0), &a), true).is_ok());
    }

    #[test]
    fn batch_insert_matches_sequential() {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let docs: Vec<Value> = (0..100)
            .map(|i| doc(&i.to_string(), Value::from(i64::from(i % 10))))
            .collect();
        let indexed: Vec<IndexedDocument<'_>> = docs
            .iter()
            .enumerate()
            .map(|(i, d)| IndexedDocument::new(HandleId::new(i), d))
            .collect();

        let mut index = index(false, false);
        index.batch_insert(&indexed, &pool).unwrap();
        assert_eq!(index.len(), 100);
        assert_eq!(index.lookup(&[Value::from(3)]).len(), 10);
    }

    #[test]
    fn batch_insert_reports_unique_violation() {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let docs = [doc("a", Value::from("same")), doc("b", Value::from("same"))];
        let indexed: Vec<IndexedDocument<'_>> = docs
            .iter()
            .enumerate()
            .map(|(i, d)| IndexedDocument::new(HandleId::new(i), d))
            .collect();
        let mut index = index(true, false);
        assert!(index.batch_insert(&indexed, &pool).unwrap_err().is_unique_violation());
    }
}
