//! Ordered batch of keyed changes.
//!
//! Changes in a set must be applied in sequence order; replaying them out of
//! order can produce a different final state. A `ChangeSet` is immutable once
//! built and carries its aggregate counts.

use crate::change::{Change, ChangeReason};

/// An immutable, ordered batch of changes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeSet<K, V> {
    changes: Vec<Change<K, V>>,
    adds: usize,
    updates: usize,
    removes: usize,
    refreshes: usize,
    moves: usize,
}

impl<K, V> Default for ChangeSet<K, V> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<K, V> ChangeSet<K, V> {
    /// Creates a change set from an ordered list of changes.
    pub fn new(changes: Vec<Change<K, V>>) -> Self {
        let mut set = Self {
            changes,
            adds: 0,
            updates: 0,
            removes: 0,
            refreshes: 0,
            moves: 0,
        };
        for change in &set.changes {
            match change.reason() {
                ChangeReason::Add => set.adds += 1,
                ChangeReason::Update => set.updates += 1,
                ChangeReason::Remove => set.removes += 1,
                ChangeReason::Refresh => set.refreshes += 1,
                ChangeReason::Moved => set.moves += 1,
            }
        }
        set
    }

    /// Creates an empty change set.
    #[inline]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the number of `Add` changes.
    #[inline]
    pub fn adds(&self) -> usize {
        self.adds
    }

    /// Number of updates.
    #[inline]
    pub fn updates(&self) -> usize {
        self.updates
    }

    /// Alias for [`ChangeSet::updates`].
    #[inline]
    pub fn replaced(&self) -> usize {
        self.updates
    }

    /// Returns the number of `Remove` changes.
    #[inline]
    pub fn removes(&self) -> usize {
        self.removes
    }

    /// Returns the number of `Refresh` changes.
    #[inline]
    pub fn refreshes(&self) -> usize {
        self.refreshes
    }

    /// Returns the number of `Moved` changes.
    #[inline]
    pub fn moves(&self) -> usize {
        self.moves
    }

    /// Total number of changes in the set.
    #[inline]
    pub fn total_changes(&self) -> usize {
        self.changes.len()
    }

    /// Returns the number of changes in the batch.
    #[inline]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns true if the batch holds no changes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Iterates the changes in sequence order.
    pub fn iter(&self) -> core::slice::Iter<'_, Change<K, V>> {
        self.changes.iter()
    }

    /// Returns the changes as a slice.
    #[inline]
    pub fn as_slice(&self) -> &[Change<K, V>] {
        &self.changes
    }
}

impl<K, V> FromIterator<Change<K, V>> for ChangeSet<K, V> {
    fn from_iter<I: IntoIterator<Item = Change<K, V>>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<K, V> From<Vec<Change<K, V>>> for ChangeSet<K, V> {
    fn from(changes: Vec<Change<K, V>>) -> Self {
        Self::new(changes)
    }
}

impl<K, V> IntoIterator for ChangeSet<K, V> {
    type Item = Change<K, V>;
    type IntoIter = std::vec::IntoIter<Change<K, V>>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

impl<'a, K, V> IntoIterator for &'a ChangeSet<K, V> {
    type Item = &'a Change<K, V>;
    type IntoIter = core::slice::Iter<'a, Change<K, V>>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_set_empty() {
        let cs: ChangeSet<u32, &str> = ChangeSet::empty();
        assert!(cs.is_empty());
        assert_eq!(cs.total_changes(), 0);
        assert_eq!(cs.adds(), 0);
    }

    #[test]
    fn test_change_set_counts() {
        let cs = ChangeSet::new(vec![
            Change::add(1, "a"),
            Change::add(2, "b"),
            Change::update(1, "a2", "a"),
            Change::refresh(2, "b"),
            Change::remove(2, "b"),
            Change::moved(1, "a2"),
        ]);

        assert_eq!(cs.adds(), 2);
        assert_eq!(cs.updates(), 1);
        assert_eq!(cs.replaced(), 1);
        assert_eq!(cs.refreshes(), 1);
        assert_eq!(cs.removes(), 1);
        assert_eq!(cs.moves(), 1);
        assert_eq!(cs.total_changes(), 6);
    }

    #[test]
    fn test_change_set_preserves_order() {
        let cs: ChangeSet<u32, u32> = (0..5).map(|i| Change::add(i, i * 10)).collect();
        let keys: Vec<u32> = cs.iter().map(|c| *c.key()).collect();
        assert_eq!(keys, vec![0, 1, 2, 3, 4]);

        let owned: Vec<Change<u32, u32>> = cs.into_iter().collect();
        assert_eq!(owned[4], Change::add(4, 40));
    }
}
