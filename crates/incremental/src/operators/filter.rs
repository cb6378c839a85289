//! Re-filtering a projection when the predicate changes.
//!
//! Two strategies are supported:
//!
//! - `ClearAndReplace` clears the projection and re-adds every match in
//!   source order. Always O(n) in the source, always order preserving.
//! - `CalculateDiff` removes the entries that stopped matching and appends
//!   the ones that started matching. Cheaper when little changes, but new
//!   matches land at the end instead of at their source position.

use core::hash::Hash;
use hashbrown::HashSet;
use keyflow_core::KeyedEntry;

/// Strategy used when a filter predicate changes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FilterPolicy {
    /// Clear everything, then add every match. Preserves source order.
    ClearAndReplace,
    /// Emit only the removes and adds between old and new matches.
    /// Does not preserve source order.
    #[default]
    CalculateDiff,
}

/// A change to an ordered projection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListChange<T> {
    /// `item` was inserted at `index`.
    Add { item: T, index: usize },
    /// `item` was removed from `index`.
    Remove { item: T, index: usize },
    /// Every item was removed.
    Clear { items: Vec<T> },
}

/// Computes the changes that turn `previous` (the current projection) into
/// the projection of `source` under `predicate`, using `policy`.
///
/// Entries are compared by key only.
pub fn refilter<K, V, F>(
    policy: FilterPolicy,
    source: &[(K, V)],
    previous: &[(K, V)],
    mut predicate: F,
) -> Vec<ListChange<(K, V)>>
where
    K: Eq + Hash + Clone,
    V: Clone,
    F: FnMut(&V) -> bool,
{
    let matches: Vec<&(K, V)> = source.iter().filter(|(_, v)| predicate(v)).collect();

    match policy {
        FilterPolicy::ClearAndReplace => {
            let mut output = Vec::with_capacity(matches.len() + 1);
            output.push(ListChange::Clear {
                items: previous.to_vec(),
            });
            output.extend(matches.into_iter().enumerate().map(|(index, entry)| {
                ListChange::Add {
                    item: entry.clone(),
                    index,
                }
            }));
            output
        }
        FilterPolicy::CalculateDiff => {
            let new_keys: HashSet<KeyedEntry<&K, ()>> =
                matches.iter().map(|(k, _)| KeyedEntry::new(k, ())).collect();
            let old_keys: HashSet<KeyedEntry<&K, ()>> =
                previous.iter().map(|(k, _)| KeyedEntry::new(k, ())).collect();

            let mut output = Vec::new();
            let mut removed = 0;
            for (position, entry) in previous.iter().enumerate() {
                let key = &entry.0;
                if !new_keys.contains(&key) {
                    output.push(ListChange::Remove {
                        item: entry.clone(),
                        index: position - removed,
                    });
                    removed += 1;
                }
            }

            let mut len = previous.len() - removed;
            for entry in matches {
                let key = &entry.0;
                if !old_keys.contains(&key) {
                    output.push(ListChange::Add {
                        item: entry.clone(),
                        index: len,
                    });
                    len += 1;
                }
            }
            output
        }
    }
}

/// A filtered projection that keeps itself in step with the changes it emits.
#[derive(Clone, Debug)]
pub struct FilteredList<K, V> {
    policy: FilterPolicy,
    items: Vec<(K, V)>,
}

impl<K, V> FilteredList<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates an empty projection using the given policy.
    pub fn new(policy: FilterPolicy) -> Self {
        Self {
            policy,
            items: Vec::new(),
        }
    }

    /// Returns the filter policy.
    #[inline]
    pub fn policy(&self) -> FilterPolicy {
        self.policy
    }

    /// Current projection, in projection order.
    #[inline]
    pub fn items(&self) -> &[(K, V)] {
        &self.items
    }

    /// Returns the number of items that passed the filter.
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if no item passed the filter.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Re-evaluates `source` under a new predicate, updates the projection and
    /// returns the emitted changes.
    pub fn refilter<F>(&mut self, source: &[(K, V)], predicate: F) -> Vec<ListChange<(K, V)>>
    where
        F: FnMut(&V) -> bool,
    {
        let changes = refilter(self.policy, source, &self.items, predicate);
        for change in &changes {
            match change {
                ListChange::Add { item, index } => self.items.insert(*index, item.clone()),
                ListChange::Remove { index, .. } => {
                    self.items.remove(*index);
                }
                ListChange::Clear { .. } => self.items.clear(),
            }
        }
        changes
    }
}
