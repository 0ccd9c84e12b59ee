//! Populating secondary indexes from the live documents.

use std::time::Instant;

use docstore_codec::Value;
use parking_lot::Mutex;
use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{info, trace};

use crate::config::EngineConfig;
use crate::error::{CoreError, CoreResult};
use crate::index::primary::PrimaryIndex;
use crate::index::registry::IndexRegistry;
use crate::index::traits::{Index, IndexedDocument};
use crate::revision::{HandleId, RevisionArena};

/// Read access to the live documents of a collection.
#[derive(Debug, Clone, Copy)]
pub struct DocumentSource<'a> {
    primary: &'a PrimaryIndex,
    arena: &'a RevisionArena,
}

impl<'a> DocumentSource<'a> {
    /// Documents reachable from `primary`, stored in `arena`.
    #[must_use]
    pub const fn new(primary: &'a PrimaryIndex, arena: &'a RevisionArena) -> Self {
        Self { primary, arena }
    }

    /// Number of live documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.primary.len()
    }

    /// True if there are no documents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }

    /// Every live handle, in ascending order.
    #[must_use]
    pub fn handles(&self) -> Vec<HandleId> {
        self.primary.handles()
    }

    /// Decoded body of `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Internal`] for a released handle and codec
    /// errors for an undecodable body.
    pub fn load(&self, handle: HandleId) -> CoreResult<Value> {
        self.arena
            .get(handle)
            .ok_or_else(|| CoreError::internal(format!("{handle} has no document")))?
            .to_value()
    }
}

/// Fills one index from every live document.
///
/// Batches are used when a pool is available, the index has a batch
/// insert, the collection has more than one bucket and the document count
/// exceeds the configured threshold. Any error aborts the fill; the
/// partially filled index must then be discarded.
///
/// # Errors
///
/// Returns the first insert or decode error.
pub fn fill_index(
    index: &mut dyn Index,
    source: &DocumentSource<'_>,
    pool: Option<&ThreadPool>,
    buckets: u32,
    config: &EngineConfig,
) -> CoreResult<()> {
    let handles = source.handles();
    let count = handles.len();
    index.size_hint(count);
    let start = Instant::now();

    match pool {
        Some(pool) if index.has_batch_insert() && count > config.fill_batch_threshold && buckets > 1 => {
            let block_size = config.fill_block_size.min(count).max(1);
            for block in handles.chunks(block_size) {
                let values: Vec<Value> = pool.install(|| {
                    block
                        .par_iter()
                        .map(|handle| source.load(*handle))
                        .collect::<CoreResult<_>>()
                })?;
                let docs: Vec<IndexedDocument<'_>> = block
                    .iter()
                    .zip(values.iter())
                    .map(|(handle, value)| IndexedDocument::new(*handle, value))
                    .collect();
                index.batch_insert(&docs, pool)?;
                trace!(index = %index.id(), documents = block.len(), "filled block");
            }
            trace!(
                index = %index.id(),
                documents = count,
                elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                "batch fill finished"
            );
        }
        _ => {
            for handle in handles {
                let value = source.load(handle)?;
                index.insert(&IndexedDocument::new(handle, &value), false)?;
            }
            trace!(
                index = %index.id(),
                documents = count,
                elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                "sequential fill finished"
            );
        }
    }
    Ok(())
}

/// Fills every secondary index of `registry`.
///
/// With a pool, each index is filled by its own task and the last one on
/// the calling thread; the call returns once every task finished. The
/// first error is returned.
///
/// # Errors
///
/// Returns the first fill error.
pub fn fill_indexes(
    registry: &mut IndexRegistry,
    arena: &RevisionArena,
    pool: Option<&ThreadPool>,
    buckets: u32,
    config: &EngineConfig,
) -> CoreResult<()> {
    let (primary, secondary) = registry.split_mut();
    if secondary.is_empty() {
        return Ok(());
    }
    let source = DocumentSource::new(primary, arena);
    if source.len() > config.parallel_fill_log_threshold {
        info!(
            indexes = secondary.len(),
            documents = source.len(),
            "filling indexes"
        );
    }

    let Some(pool) = pool else {
        for index in secondary.iter_mut() {
            fill_index(&mut **index, &source, None, buckets, config)?;
        }
        return Ok(());
    };

    let first_error: Mutex<Option<CoreError>> = Mutex::new(None);
    let record = |result: CoreResult<()>| {
        if let Err(e) = result {
            first_error.lock().get_or_insert(e);
        }
    };
    let (source, record) = (&source, &record);

    if let Some((last, rest)) = secondary.split_last_mut() {
        pool.in_place_scope(move |scope| {
            for index in rest {
                scope.spawn(move |_| record(fill_index(&mut **index, source, Some(pool), buckets, config)));
            }
            record(fill_index(&mut **last, source, Some(pool), buckets, config));
        });
    }

    first_error.into_inner().map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::definition::IndexDefinition;
    use crate::revision::DocumentHandle;
    use crate::types::IndexId;
    use docstore_codec::to_document_bytes;
    use std::sync::Arc;

    fn populated(count: usize, dup: bool) -> (IndexRegistry, RevisionArena) {
        let mut registry = IndexRegistry::new();
        let mut arena = RevisionArena::new(usize::MAX);
        for i in 0..count {
            let key = i.to_string();
            let value = if dup { 0 } else { i as i64 };
            let doc = Value::object([("_key", Value::from(key.as_str())), ("v", Value::from(value))]);
            let handle = arena.request().unwrap();
            arena
                .replace(
                    handle,
                    DocumentHandle {
                        body: Some(Arc::from(to_document_bytes(&doc).unwrap())),
                        ..DocumentHandle::default()
                    },
                )
                .unwrap();
            registry.primary_mut().insert_key(&key, handle).unwrap();
        }
        (registry, arena)
    }

    fn add_indexes(registry: &mut IndexRegistry, unique: bool) {
        registry.add(
            IndexDefinition::hash(vec!["v".into()], unique, false)
                .instantiate(IndexId::new(1), 4)
                .unwrap(),
        );
        registry.add(
            IndexDefinition::skiplist(vec!["v".into()], false, false)
                .instantiate(IndexId::new(2), 4)
                .unwrap(),
        );
    }

    #[test]
    fn sequential_fill() {
        let (mut registry, arena) = populated(50, false);
        add_indexes(&mut registry, true);
        fill_indexes(&mut registry, &arena, None, 4, &EngineConfig::default()).unwrap();
        assert!(registry.secondary().iter().all(|i| i.len() == 50));
    }

    #[test]
    fn parallel_batch_fill() {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(3).build().unwrap();
        let config = EngineConfig::default().fill_batch_threshold(10).fill_block_size(7);
        let (mut registry, arena) = populated(100, false);
        add_indexes(&mut registry, false);
        fill_indexes(&mut registry, &arena, Some(&pool), 4, &config).unwrap();
        assert!(registry.secondary().iter().all(|i| i.len() == 100));
        assert_eq!(registry.secondary()[0].lookup(&[Value::from(42)]).len(), 1);
    }

    #[test]
    fn first_error_is_reported_after_all_tasks() {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let config = EngineConfig::default().fill_batch_threshold(10);
        let (mut registry, arena) = populated(40, true);
        add_indexes(&mut registry, true);
        let err = fill_indexes(&mut registry, &arena, Some(&pool), 4, &config).unwrap_err();
        assert!(err.is_unique_violation());
        // the non-unique index ran to completion
        assert_eq!(registry.secondary()[1].len(), 40);
    }

    #[test]
    fn no_secondary_is_noop() {
        let (mut registry, arena) = populated(3, false);
        fill_indexes(&mut registry, &arena, None, 1, &EngineConfig::default()).unwrap();
    }
}
