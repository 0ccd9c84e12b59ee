//! # docstore storage
//!
//! Append-only byte stores that back the collection logs of docstore.
//!
//! Backends never interpret what they hold. Marker framing, checksums and
//! replay all live in `docstore_core`; this crate only knows how to append
//! bytes, read them back by offset, and make them durable.
//!
//! ## Backends
//!
//! - [`InMemoryBackend`] - shared in-memory buffer, survives "reopen" as long
//!   as a clone of the handle is alive
//! - [`FileBackend`] - one OS file per backend
//! - [`FaultyBackend`] - wrapper that fails appends or syncs on demand, for rollback tests
//!
//! ## Segments
//!
//! A collection log is a sequence of numbered segments. [`SegmentProvider`]
//! creates and enumerates them; [`MemorySegments`] and [`DirectorySegments`]
//! are the two stock providers.
//!
//! ```rust
//! use docstore_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"marker bytes").unwrap();
//! assert_eq!(backend.read_at(offset, 6).unwrap(), b"marker");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod faulty;
mod file;
mod memory;
mod segments;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use faulty::{FaultSwitch, FaultyBackend};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use segments::{DirectorySegments, MemorySegments, SegmentProvider};
