//! Ordered set of a collection's indexes.

use docstore_codec::Value;
use tracing::error;

use crate::error::{CoreError, CoreResult};
use crate::index::primary::PrimaryIndex;
use crate::index::traits::{Index, IndexKind, IndexedDocument};
use crate::types::IndexId;

/// The primary index plus the secondary indexes, in creation order.
///
/// The primary index is held apart from the secondaries; the edge index,
/// when present, is the first secondary. While secondary maintenance is
/// switched off (bulk load) only persistent indexes are kept current. While
/// maintenance is suspended (indexes registered but not yet filled) no
/// secondary index is touched at all.
#[derive(Debug)]
pub struct IndexRegistry {
    primary: PrimaryIndex,
    secondary: Vec<Box<dyn Index>>,
    use_secondary: bool,
    suspended: bool,
    cleanup_count: usize,
    persistent_count: usize,
}

impl Default for IndexRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexRegistry {
    /// A registry holding only an empty primary index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            primary: PrimaryIndex::new(),
            secondary: Vec::new(),
            use_secondary: true,
            suspended: false,
            cleanup_count: 0,
            persistent_count: 0,
        }
    }

    /// The primary index.
    #[must_use]
    pub fn primary(&self) -> &PrimaryIndex {
        &self.primary
    }

    /// The primary index, mutably.
    pub fn primary_mut(&mut self) -> &mut PrimaryIndex {
        &mut self.primary
    }

    /// The secondary indexes.
    #[must_use]
    pub fn secondary(&self) -> &[Box<dyn Index>] {
        &self.secondary
    }

    /// Splits into the primary index and the secondaries, mutably.
    pub fn split_mut(&mut self) -> (&PrimaryIndex, &mut [Box<dyn Index>]) {
        (&self.primary, &mut self.secondary)
    }

    /// Number of indexes, primary included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.secondary.len() + 1
    }

    /// Always false: the primary index is always present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Appends a secondary index.
    pub fn add(&mut self, index: Box<dyn Index>) {
        if index.has_cleanup() {
            self.cleanup_count += 1;
        }
        if index.is_persistent() {
            self.persistent_count += 1;
        }
        self.secondary.push(index);
    }

    /// Removes a droppable secondary index by id.
    pub fn remove(&mut self, id: IndexId) -> Option<Box<dyn Index>> {
        let position = self
            .secondary
            .iter()
            .position(|index| index.id() == id && index.can_be_dropped())?;
        let index = self.secondary.remove(position);
        if index.has_cleanup() {
            self.cleanup_count -= 1;
        }
        if index.is_persistent() {
            self.persistent_count -= 1;
        }
        Some(index)
    }

    /// Looks up any index by id.
    #[must_use]
    pub fn get(&self, id: IndexId) -> Option<&dyn Index> {
        if id == IndexId::PRIMARY {
            return Some(&self.primary);
        }
        self.secondary
            .iter()
            .find(|index| index.id() == id)
            .map(|index| &**index)
    }

    /// The first secondary index of `kind`.
    #[must_use]
    pub fn find_kind(&self, kind: IndexKind) -> Option<&dyn Index> {
        self.secondary
            .iter()
            .find(|index| index.kind() == kind)
            .map(|index| &**index)
    }

    /// Whether non-persistent secondaries are maintained.
    #[must_use]
    pub fn use_secondary(&self) -> bool {
        self.use_secondary
    }

    /// Switches maintenance of non-persistent secondaries.
    pub fn set_use_secondary(&mut self, value: bool) {
        self.use_secondary = value;
    }

    /// True while secondary maintenance waits for a fill.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Stops all secondary maintenance until [`IndexRegistry::resume`].
    pub fn suspend(&mut self) {
        self.suspended = true;
    }

    /// Restarts secondary maintenance after a fill.
    pub fn resume(&mut self) {
        self.suspended = false;
    }

    /// Number of indexes with deferred cleanup.
    #[must_use]
    pub fn cleanup_count(&self) -> usize {
        self.cleanup_count
    }

    /// Number of persistent indexes.
    #[must_use]
    pub fn persistent_count(&self) -> usize {
        self.persistent_count
    }

    /// Total memory of every index.
    #[must_use]
    pub fn memory(&self) -> usize {
        self.primary.memory() + self.secondary.iter().map(|i| i.memory()).sum::<usize>()
    }

    /// Definitions of every index, primary first.
    #[must_use]
    pub fn definitions(&self) -> Vec<Value> {
        std::iter::once(self.primary.definition())
            .chain(self.secondary.iter().map(|i| i.definition()))
            .collect()
    }

    fn is_idle(&self) -> bool {
        self.suspended || (!self.use_secondary && self.persistent_count == 0)
    }

    fn maintained(&self) -> impl Iterator<Item = usize> + '_ {
        let use_secondary = self.use_secondary;
        self.secondary
            .iter()
            .enumerate()
            .filter(move |(_, index)| use_secondary || index.is_persistent())
            .map(|(position, _)| position)
    }

    /// Inserts into every maintained secondary index.
    ///
    /// All indexes are attempted. Out-of-memory stops at once; otherwise a
    /// unique-constraint violation is preferred over any other error.
    ///
    /// # Errors
    ///
    /// Returns the selected error; the caller rolls back.
    pub fn insert_secondary(&mut self, doc: &IndexedDocument<'_>, is_rollback: bool) -> CoreResult<()> {
        if self.is_idle() {
            return Ok(());
        }
        let positions: Vec<usize> = self.maintained().collect();
        let mut result: CoreResult<()> = Ok(());
        for position in positions {
            if let Err(e) = self.secondary[position].insert(doc, is_rollback) {
                if e.is_out_of_memory() {
                    return Err(e);
                }
                let replace = match &result {
                    Ok(()) => true,
                    Err(current) => e.is_unique_violation() && !current.is_unique_violation(),
                };
                if replace {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// Removes from every maintained secondary index.
    ///
    /// All indexes are attempted; the last error is returned.
    ///
    /// # Errors
    ///
    /// Returns the last index error.
    pub fn delete_secondary(&mut self, doc: &IndexedDocument<'_>, is_rollback: bool) -> CoreResult<()> {
        if self.is_idle() {
            return Ok(());
        }
        let positions: Vec<usize> = self.maintained().collect();
        let mut result = Ok(());
        for position in positions {
            if let Err(e) = self.secondary[position].remove(doc, is_rollback) {
                result = Err(e);
            }
        }
        result
    }

    /// Runs cleanup on every index that has one.
    ///
    /// # Errors
    ///
    /// Returns the first cleanup error; remaining indexes are still cleaned.
    pub fn cleanup(&mut self) -> CoreResult<()> {
        if self.cleanup_count == 0 {
            return Ok(());
        }
        let mut first: Option<CoreError> = None;
        for index in self.secondary.iter_mut().filter(|i| i.has_cleanup()) {
            if let Err(e) = index.cleanup() {
                error!(index = %index.id(), error = %e, "index cleanup failed");
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::definition::IndexDefinition;
    use crate::revision::HandleId;

    fn registry() -> IndexRegistry {
        let mut registry = IndexRegistry::new();
        registry.add(
            IndexDefinition::hash(vec!["a".into()], true, false)
                .instantiate(IndexId::new(1), 1)
                .unwrap(),
        );
        registry.add(
            IndexDefinition::persistent(vec!["b".into()], false, false)
                .instantiate(IndexId::new(2), 1)
                .unwrap(),
        );
        registry.add(
            IndexDefinition::fulltext("t".into(), 2)
                .instantiate(IndexId::new(3), 1)
                .unwrap(),
        );
        registry
    }

    #[test]
    fn bookkeeping() {
        let mut registry = registry();
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.cleanup_count(), 1);
        assert_eq!(registry.persistent_count(), 1);
        assert_eq!(registry.definitions().len(), 4);
        assert!(registry.get(IndexId::PRIMARY).is_some());

        assert!(registry.remove(IndexId::new(3)).is_some());
        assert_eq!(registry.cleanup_count(), 0);
        assert!(registry.remove(IndexId::new(3)).is_none());
    }

    #[test]
    fn unique_violation_is_preferred() {
        let mut registry = registry();
        let first = Value::object([("a", Value::from(1)), ("b", Value::from(1))]);
        registry
            .insert_secondary(&IndexedDocument::new(HandleId::new(0), &first), false)
            .unwrap();
        let err = registry
            .insert_secondary(&IndexedDocument::new(HandleId::new(1), &first), false)
            .unwrap_err();
        assert!(err.is_unique_violation());

        // the persistent index took the second document; rollback removes it
        registry
            .delete_secondary(&IndexedDocument::new(HandleId::new(1), &first), true)
            .unwrap();
        assert_eq!(registry.secondary()[1].len(), 1);
        assert_eq!(registry.secondary()[0].len(), 1);
    }

    #[test]
    fn persistent_indexes_stay_maintained() {
        let mut registry = registry();
        registry.set_use_secondary(false);
        let doc = Value::object([("a", Value::from(1)), ("b", Value::from(1))]);
        registry
            .insert_secondary(&IndexedDocument::new(HandleId::new(0), &doc), false)
            .unwrap();
        assert_eq!(registry.secondary()[0].len(), 0);
        assert_eq!(registry.secondary()[1].len(), 1);
    }

    #[test]
    fn suspended_registry_touches_nothing() {
        let mut registry = registry();
        registry.suspend();
        let doc = Value::object([("a", Value::from(1)), ("b", Value::from(1)), ("t", Value::from("word"))]);
        let indexed = IndexedDocument::new(HandleId::new(0), &doc);
        registry.insert_secondary(&indexed, false).unwrap();
        // a missing entry is not an error while suspended
        registry.delete_secondary(&indexed, false).unwrap();
        assert!(registry.secondary().iter().all(|index| index.len() == 0));

        assert!(registry.is_suspended());
        registry.resume();
        assert!(!registry.is_suspended());
        registry.insert_secondary(&indexed, false).unwrap();
        assert_eq!(registry.secondary()[0].len(), 1);
        assert_eq!(registry.secondary()[1].len(), 1);
    }
}
