//! Index implementations and the per-collection index registry.
//!
//! Every collection carries a primary index (`_key` to handle) and any
//! number of secondary indexes. Indexes hold arena handles, never document
//! content, and are fully derivable from the collection log.
//!
//! # Index Types
//!
//! - [`PrimaryIndex`]: unique key lookup, always present
//! - [`EdgeIndex`]: `_from`/`_to` lookup in edge collections
//! - [`HashIndex`]: bucketed equality lookup
//! - [`SkiplistIndex`]: ordered lookup and range scans (skiplist and
//!   persistent kinds)
//! - [`GeoIndex`]: distance queries over coordinates
//! - [`FulltextIndex`]: word lookup with deferred cleanup
//!
//! [`fill_index`] and [`fill_indexes`] populate new indexes from the live
//! documents, in parallel when a worker pool is available.

mod definition;
mod edge;
mod fill;
mod fulltext;
mod geo;
mod hash;
mod primary;
mod registry;
mod skiplist;
mod traits;

pub use definition::{edge_index, IndexDefinition};
pub use edge::EdgeIndex;
pub use fill::{fill_index, fill_indexes, DocumentSource};
pub use fulltext::{FulltextIndex, TokenizerConfig, DEFAULT_MIN_LENGTH, GARBAGE_LIMIT};
pub use geo::{GeoIndex, GeoPoint};
pub use hash::HashIndex;
pub use primary::PrimaryIndex;
pub use registry::IndexRegistry;
pub use skiplist::SkiplistIndex;
pub use traits::{base_definition, Index, IndexKind, IndexedDocument};
