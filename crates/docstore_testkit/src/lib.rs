//! # docstore testkit
//!
//! Test utilities for docstore.
//!
//! This crate provides:
//! - Test fixtures: in-memory and directory-backed databases that can be
//!   reopened over the same storage, and databases with log fault injection
//! - Property-based generators for documents and mutation sequences
//! - Stress and lock-ordering helpers
//! - Replay snapshots for comparing state across restarts
//!
//! ## Usage
//!
//! ```rust,ignore
//! use docstore_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_database() {
//!     let test_db = TestDatabase::memory();
//!     let users = test_db.documents("users");
//!     // ... test operations
//!     let test_db = test_db.reopen();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod replay;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::replay::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use replay::*;
pub use stress::*;
