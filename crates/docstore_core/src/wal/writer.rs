//! Collection log writer.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use docstore_storage::{SegmentProvider, StorageBackend};
use parking_lot::Mutex;
use tracing::{debug, error, trace};

use crate::error::{CoreError, CoreResult};
use crate::hlc::HybridLogicalClock;
use crate::types::{FileId, Tick};
use crate::wal::iterator::{LogEntry, MarkerIterator};
use crate::wal::marker::Marker;

/// Where a marker ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerLocation {
    /// Tick stamped on the marker.
    pub tick: Tick,
    /// Segment holding the marker.
    pub fid: FileId,
    /// Offset within the segment.
    pub offset: u64,
    /// Encoded size.
    pub size: u64,
}

/// Durable sink for markers.
///
/// Any error means the marker is not part of the log; callers must undo
/// whatever in-memory change the marker described. A marker whose sync
/// failed is cut from the segment again before the error is returned.
pub trait LogWriter: Send + Sync + fmt::Debug {
    /// Stamps the marker with a tick and appends it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogWriteFailed`] if the marker was not written.
    fn write_marker(&self, marker: &Marker) -> CoreResult<MarkerLocation>;
}

struct ActiveSegment {
    fid: FileId,
    backend: Box<dyn StorageBackend>,
    written: u64,
}

/// Segmented append-only log of one collection.
///
/// Writes go to the active segment. When the next marker would push the
/// segment past the maximal size it is sealed with a footer and a new
/// segment, opened with a header, takes over. Segments found at open are
/// never appended to; the first write after open starts a new one.
pub struct CollectionLog {
    segments: Arc<dyn SegmentProvider>,
    clock: Arc<HybridLogicalClock>,
    active: Mutex<Option<ActiveSegment>>,
    maximal_size: AtomicU64,
    wait_for_sync: AtomicBool,
    markers_written: AtomicU64,
}

impl CollectionLog {
    /// Creates a log over `segments`.
    pub fn new(
        segments: Arc<dyn SegmentProvider>,
        clock: Arc<HybridLogicalClock>,
        maximal_size: u64,
        wait_for_sync: bool,
    ) -> Self {
        Self {
            segments,
            clock,
            active: Mutex::new(None),
            maximal_size: AtomicU64::new(maximal_size),
            wait_for_sync: AtomicBool::new(wait_for_sync),
            markers_written: AtomicU64::new(0),
        }
    }

    /// Changes the rotation threshold for future writes.
    pub fn set_maximal_size(&self, size: u64) {
        self.maximal_size.store(size, Ordering::Relaxed);
    }

    /// Changes the sync-on-write flag.
    pub fn set_wait_for_sync(&self, value: bool) {
        self.wait_for_sync.store(value, Ordering::Relaxed);
    }

    /// Markers written since this log was created, framing included.
    #[must_use]
    pub fn markers_written(&self) -> u64 {
        self.markers_written.load(Ordering::Relaxed)
    }

    /// Id of the segment currently written, if any.
    #[must_use]
    pub fn active_fid(&self) -> Option<FileId> {
        self.active.lock().as_ref().map(|segment| segment.fid)
    }

    /// Reads every marker of every segment in write order.
    ///
    /// # Errors
    ///
    /// Returns the first storage or corruption error.
    pub fn for_each_marker<F>(&self, mut callback: F) -> CoreResult<()>
    where
        F: FnMut(LogEntry) -> CoreResult<()>,
    {
        for (fid, backend) in self.segments.open_all()? {
            for entry in MarkerIterator::new(backend.as_ref(), fid)? {
                callback(entry?)?;
            }
        }
        Ok(())
    }

    /// Seals the active segment with a footer.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogWriteFailed`] if the footer cannot be written.
    pub fn seal(&self) -> CoreResult<()> {
        let mut active = self.active.lock();
        if let Some(mut segment) = active.take() {
            self.append(&mut segment, &Marker::segment_footer())?;
            segment.backend.sync().map_err(write_failed)?;
            debug!(fid = segment.fid, "sealed segment");
        }
        Ok(())
    }

    /// Deletes every segment.
    ///
    /// # Errors
    ///
    /// Returns an error if a segment cannot be removed.
    pub fn drop_all(&self) -> CoreResult<()> {
        self.active.lock().take();
        for (fid, _) in self.segments.open_all()? {
            self.segments.remove(fid)?;
        }
        Ok(())
    }

    fn start_segment(&self) -> CoreResult<ActiveSegment> {
        let fid = self.clock.next();
        let backend = self.segments.create(fid).map_err(write_failed)?;
        let mut segment = ActiveSegment {
            fid,
            backend,
            written: 0,
        };
        self.append(&mut segment, &Marker::segment_header(fid))?;
        debug!(fid, "started segment");
        Ok(segment)
    }

    fn append(&self, segment: &mut ActiveSegment, marker: &Marker) -> CoreResult<MarkerLocation> {
        let tick = self.clock.next();
        let bytes = marker.encode(tick)?;
        let offset = segment.backend.append(&bytes).map_err(write_failed)?;
        segment.written = offset + bytes.len() as u64;
        self.markers_written.fetch_add(1, Ordering::Relaxed);
        Ok(MarkerLocation {
            tick,
            fid: segment.fid,
            offset,
            size: bytes.len() as u64,
        })
    }
}

fn write_failed(err: docstore_storage::StorageError) -> CoreError {
    CoreError::log_write_failed(err.to_string())
}

impl CollectionLog {
    fn write(&self, marker: &Marker, force_sync: bool) -> CoreResult<MarkerLocation> {
        let mut active = self.active.lock();

        let needed = marker.encoded_len() as u64;
        let maximal = self.maximal_size.load(Ordering::Relaxed);
        let rotate = active.as_ref().is_some_and(|segment| {
            let header_only = segment.written <= Marker::segment_header(segment.fid).encoded_len() as u64;
            !header_only && segment.written + needed > maximal
        });
        if rotate {
            if let Some(mut segment) = active.take() {
                self.append(&mut segment, &Marker::segment_footer())?;
                trace!(fid = segment.fid, written = segment.written, "rotating segment");
            }
        }
        if active.is_none() {
            *active = Some(self.start_segment()?);
        }

        let segment = active
            .as_mut()
            .ok_or_else(|| CoreError::internal("no active segment"))?;
        let location = self.append(segment, marker)?;
        if force_sync || self.wait_for_sync.load(Ordering::Relaxed) {
            if let Err(e) = segment.backend.sync() {
                self.discard_tail(&mut active, location);
                return Err(write_failed(e));
            }
        }
        Ok(location)
    }

    /// Removes the marker at `location` from the active segment after its
    /// sync failed. If the segment cannot be cut back it is abandoned so
    /// nothing is appended behind the unsynced marker.
    fn discard_tail(&self, active: &mut Option<ActiveSegment>, location: MarkerLocation) {
        let Some(segment) = active.as_mut() else {
            return;
        };
        match segment.backend.truncate(location.offset) {
            Ok(()) => {
                segment.written = location.offset;
                self.markers_written.fetch_sub(1, Ordering::Relaxed);
                debug!(fid = segment.fid, offset = location.offset, "dropped unsynced marker");
            }
            Err(e) => {
                error!(fid = segment.fid, offset = location.offset, error = %e, "cannot drop unsynced marker");
                active.take();
            }
        }
    }
}

impl LogWriter for CollectionLog {
    fn write_marker(&self, marker: &Marker) -> CoreResult<MarkerLocation> {
        self.write(marker, false)
    }
}

/// Writes through a [`CollectionLog`] and syncs the segment after every
/// marker, whatever the log's own sync flag says.
#[derive(Debug, Clone, Copy)]
pub struct SyncedLog<'a>(pub &'a CollectionLog);

impl LogWriter for SyncedLog<'_> {
    fn write_marker(&self, marker: &Marker) -> CoreResult<MarkerLocation> {
        self.0.write(marker, true)
    }
}

impl fmt::Debug for CollectionLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionLog")
            .field("active_fid", &self.active_fid())
            .field("maximal_size", &self.maximal_size.load(Ordering::Relaxed))
            .field("markers_written", &self.markers_written())
            .finish_non_exhaustive()
    }
}
