//! Replay comparison and test logging.
//!
//! A [`ReplaySnapshot`] captures everything recovery is expected to
//! rebuild for one collection, so a test can compare the state before a
//! restart with the state after one, or two restarts with each other.

use std::sync::{Arc, Once};

use docstore_codec::Value;
use docstore_core::{
    CollectionFigures, Database, DocumentCollection, EngineConfig, MemoryMetadata, SegmentStatistics,
};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Installs a test-friendly tracing subscriber once per process.
///
/// The filter comes from `RUST_LOG`, defaulting to `warn`.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// What recovery rebuilds for one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaySnapshot {
    /// Live keys, sorted.
    pub keys: Vec<String>,
    /// Live documents in key order.
    pub documents: Vec<Value>,
    /// Live document count.
    pub document_count: u64,
    /// Per-segment statistics.
    pub segments: SegmentStatistics,
    /// Collection figures.
    pub figures: CollectionFigures,
}

impl ReplaySnapshot {
    /// Captures the state of `collection`.
    pub fn capture(db: &Database, collection: &DocumentCollection) -> Self {
        let trx = db.begin();
        let keys = collection.keys(&trx).expect("Failed to list keys");
        let documents = keys
            .iter()
            .map(|key| collection.document(&trx, key).expect("Failed to read document"))
            .collect();
        Self {
            keys,
            documents,
            document_count: collection.document_count(),
            segments: collection.segment_statistics(),
            figures: collection.figures(),
        }
    }
}

/// Opens a fresh database over `metadata` and captures collection `name`.
///
/// Nothing is written, so repeated calls over the same metadata must agree.
pub fn reopen_and_capture(metadata: &MemoryMetadata, config: &EngineConfig, name: &str) -> ReplaySnapshot {
    let db = Database::with_metadata(Arc::new(metadata.clone()), config.clone()).expect("Failed to reopen database");
    let collection = db.collection(name).expect("Collection missing after reopen");
    ReplaySnapshot::capture(&db, &collection)
}
