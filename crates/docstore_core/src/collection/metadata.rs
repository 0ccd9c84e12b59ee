//! Persistence of collection and index descriptors.
//!
//! Descriptors are stored as canonical CBOR. The store also hands out the
//! segment provider of each collection's log.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use docstore_codec::{from_cbor, to_canonical_cbor, Value};
use docstore_storage::{DirectorySegments, FaultSwitch, MemorySegments, SegmentProvider};
use parking_lot::Mutex;

use crate::dir::{read_optional, remove_file, write_atomic, DatabaseDir};
use crate::error::{CoreError, CoreResult};
use crate::types::{CollectionId, IndexId};

const PARAMETER_FILE: &str = "parameter.cbor";

/// Durable home of collection descriptors, index descriptors and logs.
pub trait MetadataStore: Send + Sync + fmt::Debug {
    /// Stores the descriptor of collection `cid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor cannot be written.
    fn save_parameters(&self, cid: CollectionId, parameters: &Value) -> CoreResult<()>;

    /// Loads the descriptor of collection `cid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored descriptor cannot be read.
    fn load_parameters(&self, cid: CollectionId) -> CoreResult<Option<Value>>;

    /// Stores one index descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor cannot be written.
    fn save_index(&self, cid: CollectionId, id: IndexId, definition: &Value) -> CoreResult<()>;

    /// Deletes one index descriptor. Unknown ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor exists but cannot be removed.
    fn remove_index(&self, cid: CollectionId, id: IndexId) -> CoreResult<()>;

    /// Every index descriptor of `cid`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if a descriptor cannot be read.
    fn load_indexes(&self, cid: CollectionId) -> CoreResult<Vec<Value>>;

    /// Ids of every stored collection, ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed.
    fn collections(&self) -> CoreResult<Vec<CollectionId>>;

    /// Deletes everything stored for `cid`, log included.
    ///
    /// # Errors
    ///
    /// Returns an error if removal fails.
    fn remove_collection(&self, cid: CollectionId) -> CoreResult<()>;

    /// The segments of the log of `cid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment location cannot be prepared.
    fn segments(&self, cid: CollectionId) -> CoreResult<Arc<dyn SegmentProvider>>;
}

#[derive(Debug, Default)]
struct StoredCollection {
    parameters: Option<Vec<u8>>,
    indexes: BTreeMap<IndexId, Vec<u8>>,
    segments: MemorySegments,
}

/// Metadata and logs held in memory.
///
/// Clones share everything, so a database can be reopened from a clone
/// kept by a test. Descriptor writes obey `faults`, and logs of
/// collections created after [`MemoryMetadata::with_segment_faults`]
/// obey the segment switch.
#[derive(Debug, Clone, Default)]
pub struct MemoryMetadata {
    collections: Arc<Mutex<BTreeMap<CollectionId, StoredCollection>>>,
    faults: FaultSwitch,
    segment_faults: Option<FaultSwitch>,
}

impl MemoryMetadata {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Descriptor writes fail when `switch` says so.
    #[must_use]
    pub fn with_faults(mut self, switch: FaultSwitch) -> Self {
        self.faults = switch;
        self
    }

    /// Log appends and syncs of new collections fail when `switch` says so.
    #[must_use]
    pub fn with_segment_faults(mut self, switch: FaultSwitch) -> Self {
        self.segment_faults = Some(switch);
        self
    }

    /// The in-memory segments of `cid`, if the collection exists.
    #[must_use]
    pub fn memory_segments(&self, cid: CollectionId) -> Option<MemorySegments> {
        self.collections.lock().get(&cid).map(|c| c.segments.clone())
    }

    fn check_write(&self) -> CoreResult<()> {
        if self.faults.should_fail() {
            return Err(CoreError::Io(std::io::Error::other(
                "injected metadata write failure",
            )));
        }
        Ok(())
    }

    fn new_segments(&self) -> MemorySegments {
        match &self.segment_faults {
            Some(switch) => MemorySegments::with_faults(switch.clone()),
            None => MemorySegments::new(),
        }
    }
}

impl MetadataStore for MemoryMetadata {
    fn save_parameters(&self, cid: CollectionId, parameters: &Value) -> CoreResult<()> {
        self.check_write()?;
        let bytes = to_canonical_cbor(parameters)?;
        let mut collections = self.collections.lock();
        let segments = self.new_segments();
        collections
            .entry(cid)
            .or_insert_with(|| StoredCollection {
                segments,
                ..StoredCollection::default()
            })
            .parameters = Some(bytes);
        Ok(())
    }

    fn load_parameters(&self, cid: CollectionId) -> CoreResult<Option<Value>> {
        let collections = self.collections.lock();
        match collections.get(&cid).and_then(|c| c.parameters.as_deref()) {
            Some(bytes) => Ok(Some(from_cbor(bytes)?)),
            None => Ok(None),
        }
    }

    fn save_index(&self, cid: CollectionId, id: IndexId, definition: &Value) -> CoreResult<()> {
        self.check_write()?;
        let bytes = to_canonical_cbor(definition)?;
        let mut collections = self.collections.lock();
        let collection = collections
            .get_mut(&cid)
            .ok_or_else(|| CoreError::internal(format!("no stored collection {cid}")))?;
        collection.indexes.insert(id, bytes);
        Ok(())
    }

    fn remove_index(&self, cid: CollectionId, id: IndexId) -> CoreResult<()> {
        self.check_write()?;
        if let Some(collection) = self.collections.lock().get_mut(&cid) {
            collection.indexes.remove(&id);
        }
        Ok(())
    }

    fn load_indexes(&self, cid: CollectionId) -> CoreResult<Vec<Value>> {
        let collections = self.collections.lock();
        let Some(collection) = collections.get(&cid) else {
            return Ok(Vec::new());
        };
        collection
            .indexes
            .values()
            .map(|bytes| Ok(from_cbor(bytes)?))
            .collect()
    }

    fn collections(&self) -> CoreResult<Vec<CollectionId>> {
        Ok(self.collections.lock().keys().copied().collect())
    }

    fn remove_collection(&self, cid: CollectionId) -> CoreResult<()> {
        self.check_write()?;
        self.collections.lock().remove(&cid);
        Ok(())
    }

    fn segments(&self, cid: CollectionId) -> CoreResult<Arc<dyn SegmentProvider>> {
        let mut collections = self.collections.lock();
        let segments = self.new_segments();
        let collection = collections.entry(cid).or_insert_with(|| StoredCollection {
            segments,
            ..StoredCollection::default()
        });
        Ok(Arc::new(collection.segments.clone()))
    }
}

/// Metadata and logs in a locked database directory.
#[derive(Debug)]
pub struct DirectoryMetadata {
    dir: DatabaseDir,
}

impl DirectoryMetadata {
    /// Opens (creating if needed) the database directory at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatabaseLocked`] if another process has it open.
    pub fn open(path: &Path) -> CoreResult<Self> {
        Ok(Self {
            dir: DatabaseDir::open(path, true)?,
        })
    }

    /// The database directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    fn index_path(&self, cid: CollectionId, id: IndexId) -> PathBuf {
        self.dir
            .collection_path(cid)
            .join(format!("index-{}.cbor", id.as_u64()))
    }
}

impl MetadataStore for DirectoryMetadata {
    fn save_parameters(&self, cid: CollectionId, parameters: &Value) -> CoreResult<()> {
        let dir = self.dir.create_collection_dir(cid)?;
        write_atomic(&dir.join(PARAMETER_FILE), &to_canonical_cbor(parameters)?)
    }

    fn load_parameters(&self, cid: CollectionId) -> CoreResult<Option<Value>> {
        let path = self.dir.collection_path(cid).join(PARAMETER_FILE);
        match read_optional(&path)? {
            Some(bytes) => Ok(Some(from_cbor(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save_index(&self, cid: CollectionId, id: IndexId, definition: &Value) -> CoreResult<()> {
        self.dir.create_collection_dir(cid)?;
        write_atomic(&self.index_path(cid, id), &to_canonical_cbor(definition)?)
    }

    fn remove_index(&self, cid: CollectionId, id: IndexId) -> CoreResult<()> {
        remove_file(&self.index_path(cid, id))
    }

    fn load_indexes(&self, cid: CollectionId) -> CoreResult<Vec<Value>> {
        let dir = self.dir.collection_path(cid);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let name = entry?.file_name();
            if let Some(id) = name
                .to_str()
                .and_then(|n| n.strip_prefix("index-"))
                .and_then(|n| n.strip_suffix(".cbor"))
                .and_then(|n| n.parse::<u64>().ok())
            {
                ids.push(IndexId::new(id));
            }
        }
        ids.sort_unstable();

        let mut definitions = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(bytes) = read_optional(&self.index_path(cid, id))? {
                definitions.push(from_cbor(&bytes)?);
            }
        }
        Ok(definitions)
    }

    fn collections(&self) -> CoreResult<Vec<CollectionId>> {
        self.dir.collection_ids()
    }

    fn remove_collection(&self, cid: CollectionId) -> CoreResult<()> {
        self.dir.remove_collection_dir(cid)
    }

    fn segments(&self, cid: CollectionId) -> CoreResult<Arc<dyn SegmentProvider>> {
        let dir = self.dir.create_collection_dir(cid)?;
        Ok(Arc::new(DirectorySegments::new(&dir)?))
    }
}
