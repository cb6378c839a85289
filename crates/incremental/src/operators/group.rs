//! Group partitioning with immutable group snapshots.
//!
//! Every recompute is a full re-partition of the current members. The
//! resulting partition is diffed against the last published snapshot to
//! produce a change set keyed by group key:
//!
//! - a group that appears is an `Add`
//! - a group that disappears is a `Remove` carrying its last snapshot
//! - a group whose member keys changed, or that holds a member whose value
//!   was replaced since the last snapshot, is an `Update`

use core::fmt;
use core::hash::Hash;
use hashbrown::{HashMap, HashSet};
use keyflow_core::{Change, ChangeSet};
use std::sync::Arc;

/// An immutable snapshot of one group.
///
/// Cloning is cheap; members are shared.
pub struct Group<K, V, G> {
    key: G,
    items: Arc<HashMap<K, V>>,
}

impl<K, V, G: Clone> Clone for Group<K, V, G> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            items: Arc::clone(&self.items),
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug, G: fmt::Debug> fmt::Debug for Group<K, V, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("key", &self.key)
            .field("items", &self.items)
            .finish()
    }
}

impl<K: Eq + Hash, V: PartialEq, G: PartialEq> PartialEq for Group<K, V, G> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.items == other.items
    }
}

impl<K: Eq + Hash, V: Eq, G: Eq> Eq for Group<K, V, G> {}

impl<K, V, G> Group<K, V, G> {
    /// Creates a group snapshot from its members.
    pub fn new(key: G, items: HashMap<K, V>) -> Self {
        Self {
            key,
            items: Arc::new(items),
        }
    }

    /// The group key.
    #[inline]
    pub fn key(&self) -> &G {
        &self.key
    }

    /// Returns the number of members.
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the group has no members.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns an iterator over the member keys.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.items.keys()
    }

    /// Returns an iterator over the member values.
    pub fn items(&self) -> impl Iterator<Item = &V> {
        self.items.values()
    }

    /// Returns an iterator over the members.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.items.iter()
    }
}

impl<K: Eq + Hash, V, G> Group<K, V, G> {
    /// Looks up a member by key.
    #[inline]
    pub fn lookup(&self, key: &K) -> Option<&V> {
        self.items.get(key)
    }

    /// Returns true if `key` is a member.
    #[inline]
    pub fn contains_key(&self, key: &K) -> bool {
        self.items.contains_key(key)
    }

    /// True if both groups hold exactly the same member keys.
    pub fn same_members(&self, other: &HashMap<K, V>) -> bool {
        self.items.len() == other.len() && other.keys().all(|k| self.items.contains_key(k))
    }
}

/// Partitions `(key, item)` pairs by `selector`.
pub fn partition<'a, K, V, G, I, F>(items: I, mut selector: F) -> HashMap<G, HashMap<K, V>>
where
    K: Eq + Hash + Clone + 'a,
    V: Clone + 'a,
    G: Eq + Hash,
    I: IntoIterator<Item = (&'a K, &'a V)>,
    F: FnMut(&V) -> G,
{
    let mut groups: HashMap<G, HashMap<K, V>> = HashMap::new();
    for (key, item) in items {
        groups
            .entry(selector(item))
            .or_default()
            .insert(key.clone(), item.clone());
    }
    groups
}

/// The last published set of groups.
pub struct GroupSnapshot<K, V, G> {
    groups: HashMap<G, Group<K, V, G>>,
}

impl<K, V, G> Default for GroupSnapshot<K, V, G> {
    fn default() -> Self {
        Self {
            groups: HashMap::new(),
        }
    }
}

impl<K, V, G> GroupSnapshot<K, V, G> {
    /// Creates an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of groups.
    #[inline]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Returns true if there are no groups.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Returns an iterator over the groups.
    pub fn groups(&self) -> impl Iterator<Item = &Group<K, V, G>> {
        self.groups.values()
    }

    /// Forgets every group.
    pub fn clear(&mut self) {
        self.groups.clear();
    }
}

impl<K, V, G> GroupSnapshot<K, V, G>
where
    K: Eq + Hash,
    G: Eq + Hash + Clone,
{
    /// Looks up a group by its key.
    pub fn lookup(&self, key: &G) -> Option<&Group<K, V, G>> {
        self.groups.get(key)
    }

    /// Replaces the snapshot with `partition` and returns what changed.
    ///
    /// `touched` names member keys whose value was replaced since the last
    /// call; a group holding any of them is republished even if its member
    /// keys are unchanged.
    pub fn diff(
        &mut self,
        partition: HashMap<G, HashMap<K, V>>,
        touched: &HashSet<K>,
    ) -> ChangeSet<G, Group<K, V, G>> {
        let mut previous = core::mem::take(&mut self.groups);
        let mut changes = Vec::new();

        for (group_key, members) in partition {
            match previous.remove(&group_key) {
                Some(old) => {
                    let dirty = members.keys().any(|k| touched.contains(k));
                    if dirty || !old.same_members(&members) {
                        let group = Group::new(group_key.clone(), members);
                        changes.push(Change::update(group_key.clone(), group.clone(), old));
                        self.groups.insert(group_key, group);
                    } else {
                        self.groups.insert(group_key, old);
                    }
                }
                None => {
                    let group = Group::new(group_key.clone(), members);
                    changes.push(Change::add(group_key.clone(), group.clone()));
                    self.groups.insert(group_key, group);
                }
            }
        }

        for (group_key, old) in previous {
            changes.push(Change::remove(group_key, old));
        }

        ChangeSet::new(changes)
    }
}
