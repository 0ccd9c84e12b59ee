//! Marker types and the on-disk envelope.

use docstore_codec::{from_cbor, to_canonical_cbor, DocumentSlice, Value};

use crate::error::{CoreError, CoreResult};
use crate::types::{FileId, IndexId, Tick};

/// Magic bytes opening every marker.
pub const MARKER_MAGIC: [u8; 4] = *b"DSWL";

/// Current envelope version.
pub const MARKER_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + tick (8) + length (4)
pub const HEADER_SIZE: usize = 19;

/// Trailing checksum size.
pub const CRC_SIZE: usize = 4;

/// Kind of a log marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MarkerType {
    /// A full document revision (insert, update, replace).
    Document = 1,
    /// A remove tombstone.
    Remove = 2,
    /// An index was created.
    CreateIndex = 3,
    /// An index was dropped.
    DropIndex = 4,
    /// First marker of a segment.
    SegmentHeader = 5,
    /// Last marker of a sealed segment.
    SegmentFooter = 6,
}

impl MarkerType {
    /// Converts a byte to a marker type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Document),
            2 => Some(Self::Remove),
            3 => Some(Self::CreateIndex),
            4 => Some(Self::DropIndex),
            5 => Some(Self::SegmentHeader),
            6 => Some(Self::SegmentFooter),
            _ => None,
        }
    }

    /// Converts the marker type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// True for segment framing markers.
    #[must_use]
    pub const fn is_framing(self) -> bool {
        matches!(self, Self::SegmentHeader | Self::SegmentFooter)
    }
}

/// A marker before it is written: type plus payload. The tick is assigned
/// by the log at write time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    kind: MarkerType,
    payload: Vec<u8>,
}

impl Marker {
    /// Maximum payload size (the length field is 32 bits).
    pub const MAX_PAYLOAD_SIZE: usize = u32::MAX as usize;

    /// Creates a marker from raw parts.
    #[must_use]
    pub fn new(kind: MarkerType, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }

    /// Document marker carrying an encoded document body.
    #[must_use]
    pub fn document(body: Vec<u8>) -> Self {
        Self::new(MarkerType::Document, body)
    }

    /// Remove marker carrying an encoded `{_key, _rev}` tombstone.
    #[must_use]
    pub fn remove(tombstone: Vec<u8>) -> Self {
        Self::new(MarkerType::Remove, tombstone)
    }

    /// Create-index marker carrying the canonical index definition.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the definition cannot be encoded canonically.
    pub fn create_index(definition: &Value) -> CoreResult<Self> {
        Ok(Self::new(MarkerType::CreateIndex, to_canonical_cbor(definition)?))
    }

    /// Drop-index marker carrying `{id}`.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the payload cannot be encoded.
    pub fn drop_index(id: IndexId) -> CoreResult<Self> {
        let id = i64::try_from(id.as_u64()).map_err(|_| CoreError::internal("index id overflow"))?;
        let payload = Value::object([("id", Value::Integer(id))]);
        Ok(Self::new(MarkerType::DropIndex, to_canonical_cbor(&payload)?))
    }

    /// Segment header carrying the segment id.
    #[must_use]
    pub fn segment_header(fid: FileId) -> Self {
        Self::new(MarkerType::SegmentHeader, fid.to_le_bytes().to_vec())
    }

    /// Segment footer.
    #[must_use]
    pub fn segment_footer() -> Self {
        Self::new(MarkerType::SegmentFooter, Vec::new())
    }

    /// Marker type.
    #[must_use]
    pub fn kind(&self) -> MarkerType {
        self.kind
    }

    /// Payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consumes the marker, returning the payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Size of the encoded envelope.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len() + CRC_SIZE
    }

    /// Encodes the envelope stamped with `tick`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload exceeds [`Self::MAX_PAYLOAD_SIZE`].
    pub fn encode(&self, tick: Tick) -> CoreResult<Vec<u8>> {
        let len = u32::try_from(self.payload.len()).map_err(|_| {
            CoreError::log_write_failed(format!(
                "marker payload of {} bytes exceeds maximum of {} bytes",
                self.payload.len(),
                Self::MAX_PAYLOAD_SIZE
            ))
        })?;

        let mut data = Vec::with_capacity(self.encoded_len());
        data.extend_from_slice(&MARKER_MAGIC);
        data.extend_from_slice(&MARKER_VERSION.to_le_bytes());
        data.push(self.kind.as_byte());
        data.extend_from_slice(&tick.to_le_bytes());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&self.payload);
        let crc = crc32fast::hash(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }

    /// Path-addressable view of a document or remove payload.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the payload is not an encoded object.
    pub fn document_slice(&self) -> CoreResult<DocumentSlice<'_>> {
        Ok(DocumentSlice::new(&self.payload)?)
    }

    /// Decoded index definition of a create-index or drop-index marker.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the payload is not canonical CBOR.
    pub fn definition(&self) -> CoreResult<Value> {
        Ok(from_cbor(&self.payload)?)
    }

    /// Segment id of a header marker.
    #[must_use]
    pub fn header_fid(&self) -> Option<FileId> {
        if self.kind != MarkerType::SegmentHeader {
            return None;
        }
        let bytes: [u8; 8] = self.payload.as_slice().try_into().ok()?;
        Some(FileId::from_le_bytes(bytes))
    }
}

/// Parsed envelope header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MarkerHeader {
    pub kind: MarkerType,
    pub tick: Tick,
    pub payload_len: usize,
}

impl MarkerHeader {
    /// Validates and parses the fixed header at `offset` (for messages).
    pub(crate) fn parse(header: &[u8], offset: u64) -> CoreResult<Self> {
        if header.len() < HEADER_SIZE || header[0..4] != MARKER_MAGIC {
            return Err(CoreError::wal_corruption(format!(
                "invalid magic at offset {offset}"
            )));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > MARKER_VERSION {
            return Err(CoreError::wal_corruption(format!(
                "unsupported version {version} at offset {offset}"
            )));
        }
        let kind = MarkerType::from_byte(header[6]).ok_or_else(|| {
            CoreError::wal_corruption(format!(
                "unknown marker type {} at offset {offset}",
                header[6]
            ))
        })?;

        let read_u64 = |at: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&header[at..at + 8]);
            u64::from_le_bytes(bytes)
        };
        let read_u32 = |at: usize| {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&header[at..at + 4]);
            u32::from_le_bytes(bytes)
        };

        Ok(Self {
            kind,
            tick: read_u64(7),
            payload_len: read_u32(15) as usize,
        })
    }
}

/// Verifies the checksum of a complete encoded marker and splits it.
pub(crate) fn verify(record: &[u8], header: MarkerHeader) -> CoreResult<Marker> {
    let payload_end = HEADER_SIZE + header.payload_len;
    let stored = u32::from_le_bytes([
        record[payload_end],
        record[payload_end + 1],
        record[payload_end + 2],
        record[payload_end + 3],
    ]);
    let computed = crc32fast::hash(&record[..payload_end]);
    if stored != computed {
        return Err(CoreError::ChecksumMismatch {
            expected: stored,
            actual: computed,
        });
    }
    Ok(Marker::new(header.kind, record[HEADER_SIZE..payload_end].to_vec()))
}

/// Decodes one complete encoded marker, returning it with its tick.
///
/// # Errors
///
/// Returns an error on bad framing, checksum mismatch or trailing bytes.
pub fn decode_marker(bytes: &[u8]) -> CoreResult<(Tick, Marker)> {
    let header = MarkerHeader::parse(bytes, 0)?;
    let total = HEADER_SIZE + header.payload_len + CRC_SIZE;
    if bytes.len() != total {
        return Err(CoreError::wal_corruption(format!(
            "marker length mismatch: expected {total} bytes, got {}",
            bytes.len()
        )));
    }
    Ok((header.tick, verify(bytes, header)?))
}
