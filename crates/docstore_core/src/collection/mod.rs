//! Document collections.
//!
//! A [`DocumentCollection`] owns a revision arena, an index registry and a
//! segmented log. Mutations go through the arena and every index before
//! their marker is written; a failure at any step is rolled back so the
//! in-memory state never diverges from the log. Opening a collection
//! replays its log and rebuilds the indexes.

mod document_collection;
mod figures;
mod info;
mod metadata;
mod mutation;
mod operation;
mod recovery;

pub use document_collection::{
    CollectionContext, DocumentCollection, EnsuredIndex, OperationOptions, OperationResult,
};
pub(crate) use document_collection::CollectionState;
pub use figures::{CollectionFigures, DatafileStatistics, SegmentStatistics};
pub use info::{CollectionInfo, MAX_INDEX_BUCKETS, MIN_JOURNAL_SIZE, PAGE_SIZE};
pub use metadata::{DirectoryMetadata, MemoryMetadata, MetadataStore};
pub use operation::OperationKind;

/// Longest collection name.
pub const MAX_NAME_LENGTH: usize = 64;

/// True if `name` may name a collection.
///
/// The first character must be a letter, or `_` when system names are
/// allowed; the rest letters, digits, `_` or `-`.
#[must_use]
pub fn is_allowed_collection_name(name: &str, allow_system: bool) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LENGTH {
        return false;
    }
    let mut chars = name.chars();
    let first_ok = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => true,
        Some('_') => allow_system,
        _ => false,
    };
    first_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_names() {
        assert!(is_allowed_collection_name("users", false));
        assert!(is_allowed_collection_name("a-b_9", false));
        assert!(is_allowed_collection_name("_system", true));
        assert!(!is_allowed_collection_name("_system", false));
        assert!(!is_allowed_collection_name("9lives", true));
        assert!(!is_allowed_collection_name("", true));
        assert!(!is_allowed_collection_name("a/b", true));
        assert!(!is_allowed_collection_name(&"x".repeat(65), true));
        assert!(is_allowed_collection_name(&"x".repeat(64), true));
    }
}
