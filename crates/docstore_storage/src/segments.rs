//! Numbered segment sets.
//!
//! A collection log lives in one or more segments identified by a `u64`
//! file id. Providers create new segments and list existing ones in
//! ascending id order so replay sees markers in write order.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::faulty::{FaultSwitch, FaultyBackend};
use crate::file::FileBackend;
use crate::memory::InMemoryBackend;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Creates and enumerates the segments of one log.
pub trait SegmentProvider: Send + Sync {
    /// Creates a fresh, empty segment with the given id.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment already exists or cannot be created.
    fn create(&self, fid: u64) -> StorageResult<Box<dyn StorageBackend>>;

    /// Opens every existing segment, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if a segment cannot be opened.
    fn open_all(&self) -> StorageResult<Vec<(u64, Box<dyn StorageBackend>)>>;

    /// Deletes a segment. Unknown ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment exists but cannot be removed.
    fn remove(&self, fid: u64) -> StorageResult<()>;
}

/// Segments held in memory.
///
/// Clones share the segment table, so a provider handed to a collection can
/// be reopened later from a retained clone. An optional [`FaultSwitch`] is
/// applied to every segment it creates or opens.
#[derive(Debug, Clone, Default)]
pub struct MemorySegments {
    segments: Arc<Mutex<BTreeMap<u64, InMemoryBackend>>>,
    faults: Option<FaultSwitch>,
}

impl MemorySegments {
    /// An empty segment set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty segment set whose appends obey `switch`.
    #[must_use]
    pub fn with_faults(switch: FaultSwitch) -> Self {
        Self {
            segments: Arc::default(),
            faults: Some(switch),
        }
    }

    /// Raw bytes of a segment, if present.
    #[must_use]
    pub fn segment_bytes(&self, fid: u64) -> Option<Vec<u8>> {
        self.segments.lock().get(&fid).map(InMemoryBackend::data)
    }

    /// Direct handle to a segment, for corruption tests.
    #[must_use]
    pub fn segment(&self, fid: u64) -> Option<InMemoryBackend> {
        self.segments.lock().get(&fid).cloned()
    }

    /// Ids of all segments.
    #[must_use]
    pub fn fids(&self) -> Vec<u64> {
        self.segments.lock().keys().copied().collect()
    }

    fn wrap(&self, backend: InMemoryBackend) -> Box<dyn StorageBackend> {
        match &self.faults {
            Some(switch) => Box::new(FaultyBackend::new(Box::new(backend), switch.clone())),
            None => Box::new(backend),
        }
    }
}

impl SegmentProvider for MemorySegments {
    fn create(&self, fid: u64) -> StorageResult<Box<dyn StorageBackend>> {
        let mut segments = self.segments.lock();
        if segments.contains_key(&fid) {
            return Err(StorageError::Corrupted(format!(
                "segment {fid} already exists"
            )));
        }
        let backend = InMemoryBackend::new();
        segments.insert(fid, backend.clone());
        drop(segments);
        Ok(self.wrap(backend))
    }

    fn open_all(&self) -> StorageResult<Vec<(u64, Box<dyn StorageBackend>)>> {
        let segments: Vec<(u64, InMemoryBackend)> = self
            .segments
            .lock()
            .iter()
            .map(|(fid, backend)| (*fid, backend.clone()))
            .collect();
        Ok(segments
            .into_iter()
            .map(|(fid, backend)| (fid, self.wrap(backend)))
            .collect())
    }

    fn remove(&self, fid: u64) -> StorageResult<()> {
        self.segments.lock().remove(&fid);
        Ok(())
    }
}

/// Segments stored as `journal-<fid>.db` files in one directory.
#[derive(Debug, Clone)]
pub struct DirectorySegments {
    root: PathBuf,
}

impl DirectorySegments {
    /// Uses `root` as the segment directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(root: &Path) -> StorageResult<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// The segment directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn segment_path(&self, fid: u64) -> PathBuf {
        self.root.join(format!("journal-{fid}.db"))
    }

    fn parse_fid(name: &str) -> Option<u64> {
        name.strip_prefix("journal-")?
            .strip_suffix(".db")?
            .parse()
            .ok()
    }
}

impl SegmentProvider for DirectorySegments {
    fn create(&self, fid: u64) -> StorageResult<Box<dyn StorageBackend>> {
        let path = self.segment_path(fid);
        if path.exists() {
            return Err(StorageError::Corrupted(format!(
                "segment file {} already exists",
                path.display()
            )));
        }
        Ok(Box::new(FileBackend::open(&path)?))
    }

    fn open_all(&self) -> StorageResult<Vec<(u64, Box<dyn StorageBackend>)>> {
        let mut fids = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(fid) = name.to_str().and_then(Self::parse_fid) {
                fids.push(fid);
            }
        }
        fids.sort_unstable();

        let mut segments = Vec::with_capacity(fids.len());
        for fid in fids {
            let backend: Box<dyn StorageBackend> =
                Box::new(FileBackend::open(&self.segment_path(fid))?);
            segments.push((fid, backend));
        }
        Ok(segments)
    }

    fn remove(&self, fid: u64) -> StorageResult<()> {
        let path = self.segment_path(fid);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memory_segments_are_listed_in_order() {
        let provider = MemorySegments::new();
        let mut b = provider.create(7).unwrap();
        b.append(b"seven").unwrap();
        provider.create(3).unwrap();
        assert!(provider.create(7).is_err());

        let all = provider.open_all().unwrap();
        let fids: Vec<u64> = all.iter().map(|(fid, _)| *fid).collect();
        assert_eq!(fids, vec![3, 7]);
        assert_eq!(all[1].1.read_at(0, 5).unwrap(), b"seven");
        assert_eq!(provider.segment_bytes(7).unwrap(), b"seven");
    }

    #[test]
    fn memory_segments_honor_fault_switch() {
        let switch = FaultSwitch::new();
        let provider = MemorySegments::with_faults(switch.clone());
        let mut seg = provider.create(1).unwrap();
        switch.fail_now();
        assert!(seg.append(b"x").is_err());
        switch.reset();
        assert!(seg.append(b"x").is_ok());
    }

    #[test]
    fn directory_segments_roundtrip() {
        let dir = tempdir().unwrap();
        let provider = DirectorySegments::new(&dir.path().join("col")).unwrap();
        provider.create(12).unwrap().append(b"twelve").unwrap();
        provider.create(2).unwrap().append(b"two").unwrap();
        std::fs::write(provider.root().join("parameter.cbor"), b"ignored").unwrap();

        let all = provider.open_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0, 2);
        assert_eq!(all[1].1.read_at(0, 6).unwrap(), b"twelve");

        provider.remove(2).unwrap();
        assert_eq!(provider.open_all().unwrap().len(), 1);
    }
}
