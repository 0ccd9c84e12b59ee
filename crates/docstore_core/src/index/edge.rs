//! Edge index: `_from` and `_to` lookups.

use std::any::Any;
use std::collections::HashMap;

use docstore_codec::Value;
use rayon::ThreadPool;

use crate::document::{FROM, TO};
use crate::error::CoreResult;
use crate::index::traits::{not_indexed, Index, IndexKind, IndexedDocument};
use crate::revision::HandleId;
use crate::types::IndexId;

type Adjacency = HashMap<String, Vec<HandleId>>;

/// Two adjacency maps keyed by vertex id.
#[derive(Debug)]
pub struct EdgeIndex {
    id: IndexId,
    fields: Vec<String>,
    from: Adjacency,
    to: Adjacency,
    count: usize,
}

fn endpoint<'a>(doc: &'a Value, attribute: &str) -> Option<&'a str> {
    doc.get(attribute).and_then(Value::as_text)
}

fn add(map: &mut Adjacency, vertex: &str, handle: HandleId) {
    let handles = map.entry(vertex.to_string()).or_default();
    if !handles.contains(&handle) {
        handles.push(handle);
    }
}

fn take(map: &mut Adjacency, vertex: &str, handle: HandleId) -> bool {
    let Some(handles) = map.get_mut(vertex) else {
        return false;
    };
    let before = handles.len();
    handles.retain(|h| *h != handle);
    let removed = handles.len() < before;
    if handles.is_empty() {
        map.remove(vertex);
    }
    removed
}

impl EdgeIndex {
    /// Creates an empty edge index.
    #[must_use]
    pub fn new(id: IndexId) -> Self {
        Self {
            id,
            fields: vec![FROM.to_string(), TO.to_string()],
            from: Adjacency::new(),
            to: Adjacency::new(),
            count: 0,
        }
    }

    /// Edges leaving `vertex`.
    #[must_use]
    pub fn outbound(&self, vertex: &str) -> Vec<HandleId> {
        self.from.get(vertex).cloned().unwrap_or_default()
    }

    /// Edges arriving at `vertex`.
    #[must_use]
    pub fn inbound(&self, vertex: &str) -> Vec<HandleId> {
        self.to.get(vertex).cloned().unwrap_or_default()
    }
}

impl Index for EdgeIndex {
    fn id(&self) -> IndexId {
        self.id
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Edge
    }

    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn can_be_dropped(&self) -> bool {
        false
    }

    fn has_batch_insert(&self) -> bool {
        true
    }

    fn insert(&mut self, doc: &IndexedDocument<'_>, _is_rollback: bool) -> CoreResult<()> {
        let (Some(from), Some(to)) = (endpoint(doc.value, FROM), endpoint(doc.value, TO)) else {
            return Ok(());
        };
        add(&mut self.from, from, doc.handle);
        add(&mut self.to, to, doc.handle);
        self.count += 1;
        Ok(())
    }

    fn remove(&mut self, doc: &IndexedDocument<'_>, is_rollback: bool) -> CoreResult<()> {
        let (Some(from), Some(to)) = (endpoint(doc.value, FROM), endpoint(doc.value, TO)) else {
            return Ok(());
        };
        let removed_from = take(&mut self.from, from, doc.handle);
        let removed_to = take(&mut self.to, to, doc.handle);
        if removed_from || removed_to {
            self.count -= 1;
            Ok(())
        } else if is_rollback {
            Ok(())
        } else {
            Err(not_indexed(self.id, doc.handle))
        }
    }

    fn batch_insert(&mut self, docs: &[IndexedDocument<'_>], pool: &ThreadPool) -> CoreResult<()> {
        let edges: Vec<(&str, &str, HandleId)> = docs
            .iter()
            .filter_map(|doc| {
                Some((endpoint(doc.value, FROM)?, endpoint(doc.value, TO)?, doc.handle))
            })
            .collect();
        let (from, to) = (&mut self.from, &mut self.to);
        pool.install(|| {
            rayon::join(
                || edges.iter().for_each(|(f, _, h)| add(from, f, *h)),
                || edges.iter().for_each(|(_, t, h)| add(to, t, *h)),
            )
        });
        self.count += edges.len();
        Ok(())
    }

    fn size_hint(&mut self, documents: usize) {
        self.from.reserve(documents);
        self.to.reserve(documents);
    }

    fn memory(&self) -> usize {
        [&self.from, &self.to]
            .iter()
            .flat_map(|map| map.iter())
            .map(|(k, v)| k.capacity() + v.len() * std::mem::size_of::<HandleId>())
            .sum()
    }

    fn len(&self) -> usize {
        self.count
    }

    /// `values[0]` is matched against `_from`, `values[1]` (if given)
    /// against `_to`.
    fn lookup(&self, values: &[Value]) -> Vec<HandleId> {
        let from = values.first().and_then(Value::as_text);
        let to = values.get(1).and_then(Value::as_text);
        match (from, to) {
            (Some(from), None) => self.outbound(from),
            (None, Some(to)) => self.inbound(to),
            (Some(from), Some(to)) => {
                let inbound = self.inbound(to);
                self.outbound(from)
                    .into_iter()
                    .filter(|h| inbound.contains(h))
                    .collect()
            }
            (None, None) => Vec::new(),
        }
    }

    fn clear(&mut self) {
        self.from.clear();
        self.to.clear();
        self.count = 0;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(from: &str, to: &str) -> Value {
        Value::object([("_from", Value::from(from)), ("_to", Value::from(to))])
    }

    #[test]
    fn directions() {
        let mut index = EdgeIndex::new(IndexId::new(1));
        let e1 = edge("v/a", "v/b");
        let e2 = edge("v/a", "v/c");
        index.insert(&IndexedDocument::new(HandleId::new(0), &e1), false).unwrap();
        index.insert(&IndexedDocument::new(HandleId::new(1), &e2), false).unwrap();

        assert_eq!(index.outbound("v/a").len(), 2);
        assert_eq!(index.inbound("v/c"), vec![HandleId::new(1)]);
        assert_eq!(
            index.lookup(&[Value::from("v/a"), Value::from("v/b")]),
            vec![HandleId::new(0)]
        );
        assert_eq!(index.lookup(&[Value::Null, Value::from("v/b")]), vec![HandleId::new(0)]);

        index.remove(&IndexedDocument::new(HandleId::new(0), &e1), false).unwrap();
        assert!(index.inbound("v/b").is_empty());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn batch_insert_fills_both_sides() {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let edges: Vec<Value> = (0..20).map(|i| edge("v/hub", &format!("v/{i}"))).collect();
        let docs: Vec<IndexedDocument<'_>> = edges
            .iter()
            .enumerate()
            .map(|(i, e)| IndexedDocument::new(HandleId::new(i), e))
            .collect();
        let mut index = EdgeIndex::new(IndexId::new(1));
        index.batch_insert(&docs, &pool).unwrap();
        assert_eq!(index.outbound("v/hub").len(), 20);
        assert_eq!(index.inbound("v/7"), vec![HandleId::new(7)]);
        assert_eq!(index.len(), 20);
    }
}
