//! Collection write-ahead log.
//!
//! Every document mutation is described by one marker appended to the
//! collection's log before the call returns. The log is a sequence of
//! segments; each segment starts with a header marker and, once sealed,
//! ends with a footer marker.
//!
//! ## Marker Format
//!
//! ```text
//! | magic (4) | version (2) | type (1) | tick (8) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! Integers are little-endian. The checksum covers everything before it.
//!
//! ## Recovery Policy
//!
//! Tolerated (treated as the end of the segment):
//!
//! - **Truncated header**: fewer than 19 bytes left
//! - **Truncated payload**: the length points past the end
//!
//! Fatal (open fails):
//!
//! - **CRC mismatch** → `ChecksumMismatch`
//! - **Bad magic, unknown type, future version** → `WalCorruption`

mod iterator;
mod marker;
mod writer;

pub use iterator::{LogEntry, MarkerIterator};
pub use marker::{decode_marker, Marker, MarkerType, CRC_SIZE, HEADER_SIZE, MARKER_MAGIC, MARKER_VERSION};
pub use writer::{CollectionLog, LogWriter, MarkerLocation, SyncedLog};
