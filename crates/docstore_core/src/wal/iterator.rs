//! Streaming marker iterator over one segment.
//!
//! Markers are read through a bounded buffer, so replaying a large segment
//! does not load it into memory at once.

use docstore_storage::StorageBackend;

use crate::error::CoreResult;
use crate::types::{FileId, Tick};
use crate::wal::marker::{verify, Marker, MarkerHeader, CRC_SIZE, HEADER_SIZE};

/// Read buffer size for streaming iteration.
const READ_BUFFER_SIZE: usize = 64 * 1024; // 64 KB

/// A marker read back from a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Segment the marker was read from.
    pub fid: FileId,
    /// Offset of the marker in the segment.
    pub offset: u64,
    /// Tick stamped at write time.
    pub tick: Tick,
    /// Encoded size of the marker.
    pub size: u64,
    /// The marker itself.
    pub marker: Marker,
}

/// Iterates the markers of one segment in write order.
///
/// - a truncated header or payload at the end is treated as the end of the
///   segment (a write interrupted by a crash)
/// - bad magic, unknown type, future version and checksum mismatches are
///   errors, after which the iterator is exhausted
pub struct MarkerIterator<'a> {
    backend: &'a dyn StorageBackend,
    fid: FileId,
    total_size: u64,
    /// Segment offset of the next unread marker.
    current_offset: u64,
    buffer: Vec<u8>,
    buffer_pos: usize,
    buffer_len: usize,
    finished: bool,
}

impl<'a> MarkerIterator<'a> {
    /// Creates an iterator over the whole segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be determined.
    pub fn new(backend: &'a dyn StorageBackend, fid: FileId) -> CoreResult<Self> {
        let total_size = backend.size()?;
        Ok(Self {
            backend,
            fid,
            total_size,
            current_offset: 0,
            buffer: vec![0u8; READ_BUFFER_SIZE],
            buffer_pos: 0,
            buffer_len: 0,
            finished: false,
        })
    }

    /// Offset up to which the segment held complete markers.
    #[must_use]
    pub fn valid_end(&self) -> u64 {
        self.current_offset
    }

    /// Makes sure `min_bytes` are buffered from the current position.
    /// Returns `false` if the segment ends first.
    fn ensure_buffered(&mut self, min_bytes: usize) -> CoreResult<bool> {
        let available = self.buffer_len - self.buffer_pos;
        if available >= min_bytes {
            return Ok(true);
        }

        let unread = usize::try_from(self.total_size - self.current_offset).unwrap_or(usize::MAX);
        if unread < min_bytes {
            return Ok(false);
        }

        if self.buffer_pos > 0 && available > 0 {
            self.buffer.copy_within(self.buffer_pos..self.buffer_len, 0);
        }
        self.buffer_len = available;
        self.buffer_pos = 0;

        if min_bytes > self.buffer.len() {
            self.buffer.resize(min_bytes.next_power_of_two(), 0);
        }

        let to_read = (self.buffer.len() - self.buffer_len).min(unread - available);
        if to_read > 0 {
            let read_offset = self.current_offset + self.buffer_len as u64;
            let data = self.backend.read_at(read_offset, to_read)?;
            self.buffer[self.buffer_len..self.buffer_len + data.len()].copy_from_slice(&data);
            self.buffer_len += data.len();
        }

        Ok(self.buffer_len - self.buffer_pos >= min_bytes)
    }

    fn read_next(&mut self) -> CoreResult<Option<LogEntry>> {
        let offset = self.current_offset;
        if !self.ensure_buffered(HEADER_SIZE)? {
            return Ok(None);
        }

        let header = MarkerHeader::parse(
            &self.buffer[self.buffer_pos..self.buffer_pos + HEADER_SIZE],
            offset,
        )?;
        let total_len = HEADER_SIZE + header.payload_len + CRC_SIZE;
        if !self.ensure_buffered(total_len)? {
            return Ok(None);
        }

        let marker = verify(&self.buffer[self.buffer_pos..self.buffer_pos + total_len], header)?;
        self.buffer_pos += total_len;
        self.current_offset += total_len as u64;

        Ok(Some(LogEntry {
            fid: self.fid,
            offset,
            tick: header.tick,
            size: total_len as u64,
            marker,
        }))
    }
}

impl Iterator for MarkerIterator<'_> {
    type Item = CoreResult<LogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_next() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
