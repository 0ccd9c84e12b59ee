//! Error types for the collection engine.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in engine operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] docstore_storage::StorageError),

    /// Document codec error.
    #[error("codec error: {0}")]
    Codec(#[from] docstore_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Document does not exist.
    #[error("document not found: {key}")]
    DocumentNotFound {
        /// Key that was looked up.
        key: String,
    },

    /// Expected revision does not match the stored one.
    #[error("conflict on {key}: expected revision {expected}, found {actual}")]
    Conflict {
        /// Document key.
        key: String,
        /// Revision supplied by the caller.
        expected: String,
        /// Revision currently stored.
        actual: String,
    },

    /// A unique index already holds the value.
    #[error("unique constraint violated in index {index_id}: {key}")]
    UniqueConstraintViolated {
        /// Index that rejected the document.
        index_id: u64,
        /// Conflicting key.
        key: String,
    },

    /// Key failed validation.
    #[error("invalid document key: {key}")]
    InvalidKey {
        /// The offending key.
        key: String,
    },

    /// `_from` or `_to` is missing or malformed.
    #[error("invalid edge attribute {attribute}")]
    InvalidEdgeAttribute {
        /// Attribute name.
        attribute: &'static str,
    },

    /// A bounded resource was exhausted.
    #[error("out of memory: {message}")]
    OutOfMemory {
        /// What ran out.
        message: String,
    },

    /// The key generator cannot produce more keys.
    #[error("out of keys")]
    OutOfKeys,

    /// Lock was not granted within the timeout.
    #[error("lock timeout on collection {collection} after {waited_ms} ms")]
    LockTimeout {
        /// Collection name.
        collection: String,
        /// Time spent waiting.
        waited_ms: u64,
    },

    /// Acquiring the lock would complete a wait-for cycle.
    #[error("deadlock detected on collection {collection}")]
    Deadlock {
        /// Collection name.
        collection: String,
    },

    /// An update would move the document to another shard.
    #[error("must not change the value of a shard key attribute")]
    ShardKeyChanged,

    /// The WAL append failed.
    #[error("log write failed: {message}")]
    LogWriteFailed {
        /// Description of the failure.
        message: String,
    },

    /// Update or replace body is not an object.
    #[error("invalid document type")]
    DocumentTypeInvalid,

    /// No key could be resolved from the input.
    #[error("illegal document handle")]
    DocumentHandleBad,

    /// `_rev` is present but unusable.
    #[error("invalid revision: {message}")]
    InvalidRevision {
        /// Description.
        message: String,
    },

    /// Collection name is not allowed.
    #[error("illegal name: {name}")]
    IllegalName {
        /// The rejected name.
        name: String,
    },

    /// An option has an invalid value.
    #[error("bad parameter: {message}")]
    BadParameter {
        /// Description.
        message: String,
    },

    /// Requested feature is unknown or unsupported.
    #[error("not implemented: {message}")]
    NotImplemented {
        /// Description.
        message: String,
    },

    /// Collection does not exist.
    #[error("collection not found: {name}")]
    CollectionNotFound {
        /// Name of the collection.
        name: String,
    },

    /// Collection name is taken.
    #[error("duplicate collection name: {name}")]
    DuplicateName {
        /// Name of the collection.
        name: String,
    },

    /// Another process holds the database directory lock.
    #[error("database is locked by another process")]
    DatabaseLocked,

    /// The database was closed.
    #[error("database is closed")]
    DatabaseClosed,

    /// Collection is not open for the requested operation.
    #[error("collection {name} is not open")]
    CollectionNotOpen {
        /// Name of the collection.
        name: String,
    },

    /// WAL is corrupted or invalid.
    #[error("WAL corruption: {message}")]
    WalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// Unexpected internal state.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the error.
        message: String,
    },
}

impl CoreError {
    /// Creates a document-not-found error.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::DocumentNotFound { key: key.into() }
    }

    /// Creates an invalid key error.
    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey { key: key.into() }
    }

    /// Creates an out-of-memory error.
    pub fn out_of_memory(message: impl Into<String>) -> Self {
        Self::OutOfMemory {
            message: message.into(),
        }
    }

    /// Creates a log write error.
    pub fn log_write_failed(message: impl Into<String>) -> Self {
        Self::LogWriteFailed {
            message: message.into(),
        }
    }

    /// Creates a bad parameter error.
    pub fn bad_parameter(message: impl Into<String>) -> Self {
        Self::BadParameter {
            message: message.into(),
        }
    }

    /// Creates a not-implemented error.
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::NotImplemented {
            message: message.into(),
        }
    }

    /// Creates a WAL corruption error.
    pub fn wal_corruption(message: impl Into<String>) -> Self {
        Self::WalCorruption {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True for unique constraint violations.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueConstraintViolated { .. })
    }

    /// True for resource exhaustion.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }

    /// True for errors that a caller may retry at a higher level.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. } | Self::Deadlock { .. })
    }
}
