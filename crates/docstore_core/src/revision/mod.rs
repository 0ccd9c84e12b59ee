//! Document handles and the arena that owns them.
//!
//! Indexes never hold documents. They hold [`HandleId`]s that point into the
//! collection's [`RevisionArena`], and the arena slot in turn points at the
//! encoded body and its place in the log.

mod arena;

pub use arena::{ArenaStats, DocumentHandle, HandleId, RevisionArena};
