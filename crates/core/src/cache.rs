//! Keyed mirror store.
//!
//! A `Cache` replays change sets to track what a downstream consumer
//! currently believes exists. Every stateful operator owns its own instance;
//! it is never shared between operators and is not internally synchronized.

use crate::change::ChangeReason;
use crate::change_set::ChangeSet;
use crate::error::{Error, Result};
use core::fmt::Debug;
use core::hash::Hash;
use hashbrown::HashMap;

/// How the store treats an `Update` or `Remove` for a key it does not hold.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MirrorPolicy {
    /// A missing-key `Update` inserts, a missing-key `Remove` is ignored.
    #[default]
    Lenient,
    /// The whole batch is rejected with `InvalidState` and the store is left
    /// untouched.
    Strict,
}

/// Key -> current item mapping built by applying change sets in order.
#[derive(Clone, Debug)]
pub struct Cache<K, V> {
    data: HashMap<K, V>,
    policy: MirrorPolicy,
}

impl<K, V> Default for Cache<K, V> {
    fn default() -> Self {
        Self {
            data: HashMap::new(),
            policy: MirrorPolicy::Lenient,
        }
    }
}

impl<K, V> Cache<K, V> {
    /// Creates an empty lenient store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store with the given missing-key policy.
    pub fn with_policy(policy: MirrorPolicy) -> Self {
        Self {
            data: HashMap::new(),
            policy,
        }
    }

    /// Returns the mirror policy.
    #[inline]
    pub fn policy(&self) -> MirrorPolicy {
        self.policy
    }

    /// Returns the number of live items.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if no items are live.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Lazily yields the current items.
    ///
    /// Reflects the mapping at call time; this is not a live view.
    pub fn items(&self) -> impl Iterator<Item = &V> {
        self.data.values()
    }

    /// Returns an iterator over the live keys.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.data.keys()
    }

    /// Iterates `(key, item)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.data.iter()
    }

    /// Drops every entry. Used on teardown.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Removes and returns every entry.
    pub fn drain(&mut self) -> impl Iterator<Item = (K, V)> + '_ {
        self.data.drain()
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash,
{
    /// Looks up the current item for a key.
    #[inline]
    pub fn lookup(&self, key: &K) -> Option<&V> {
        self.data.get(key)
    }

    /// Returns true if `key` is live.
    #[inline]
    pub fn contains_key(&self, key: &K) -> bool {
        self.data.contains_key(key)
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    /// Applies every change in order.
    ///
    /// `Add`/`Update` insert or replace, `Remove` deletes, `Refresh` and
    /// `Moved` leave the mapping untouched.
    pub fn apply(&mut self, changes: &ChangeSet<K, V>) -> Result<()> {
        if self.policy == MirrorPolicy::Strict {
            self.validate(changes)?;
        }

        for change in changes {
            match change.reason() {
                ChangeReason::Add | ChangeReason::Update => {
                    self.data.insert(change.key().clone(), change.current().clone());
                }
                ChangeReason::Remove => {
                    self.data.remove(change.key());
                }
                ChangeReason::Refresh | ChangeReason::Moved => {}
            }
        }
        Ok(())
    }

    /// Checks a batch against the current state plus the effect of the
    /// earlier changes in the same batch.
    fn validate(&self, changes: &ChangeSet<K, V>) -> Result<()> {
        let mut overlay: HashMap<&K, bool> = HashMap::new();
        for change in changes {
            let key = change.key();
            let present = overlay
                .get(key)
                .copied()
                .unwrap_or_else(|| self.data.contains_key(key));
            match change.reason() {
                ChangeReason::Add => {
                    overlay.insert(key, true);
                }
                ChangeReason::Update if !present => {
                    return Err(Error::invalid_state(format!(
                        "update for key {:?} which is not present",
                        key
                    )));
                }
                ChangeReason::Remove if !present => {
                    return Err(Error::invalid_state(format!(
                        "remove for key {:?} which is not present",
                        key
                    )));
                }
                ChangeReason::Remove => {
                    overlay.insert(key, false);
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::Change;

    fn set(changes: Vec<Change<u32, &'static str>>) -> ChangeSet<u32, &'static str> {
        ChangeSet::new(changes)
    }

    #[test]
    fn test_cache_new() {
        let cache: Cache<u32, &str> = Cache::new();
        assert!(cache.is_empty());
        assert_eq!(cache.policy(), MirrorPolicy::Lenient);
    }

    #[test]
    fn test_cache_apply_add_update_remove() {
        let mut cache = Cache::new();
        cache
            .apply(&set(vec![Change::add(1, "a"), Change::add(2, "b")]))
            .unwrap();
        assert_eq!(cache.len(), 2);

        cache.apply(&set(vec![Change::update(1, "a2", "a")])).unwrap();
        assert_eq!(cache.lookup(&1), Some(&"a2"));

        cache.apply(&set(vec![Change::remove(2, "b")])).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(!cache.contains_key(&2));
    }

    #[test]
    fn test_cache_refresh_and_moved_are_noops() {
        let mut cache = Cache::new();
        cache.apply(&set(vec![Change::add(1, "a")])).unwrap();
        cache
            .apply(&set(vec![Change::refresh(1, "ignored"), Change::moved(1, "ignored")]))
            .unwrap();
        assert_eq!(cache.lookup(&1), Some(&"a"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_order_within_set_matters() {
        let mut cache = Cache::new();
        cache
            .apply(&set(vec![
                Change::add(1, "a"),
                Change::remove(1, "a"),
                Change::add(1, "b"),
            ]))
            .unwrap();
        assert_eq!(cache.lookup(&1), Some(&"b"));
    }

    #[test]
    fn test_lenient_upserts_missing_update() {
        let mut cache = Cache::new();
        cache.apply(&set(vec![Change::update(9, "new", "old")])).unwrap();
        assert_eq!(cache.lookup(&9), Some(&"new"));
    }

    #[test]
    fn test_lenient_ignores_missing_remove() {
        let mut cache = Cache::new();
        cache.apply(&set(vec![Change::add(1, "a")])).unwrap();
        cache.apply(&set(vec![Change::remove(9, "x")])).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_strict_rejects_missing_update() {
        let mut cache = Cache::with_policy(MirrorPolicy::Strict);
        let err = cache
            .apply(&set(vec![Change::update(9, "new", "old")]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_strict_rejects_missing_remove_atomically() {
        let mut cache = Cache::with_policy(MirrorPolicy::Strict);
        cache.apply(&set(vec![Change::add(1, "a")])).unwrap();

        // The add of key 2 must not land because the batch is rejected.
        let result = cache.apply(&set(vec![Change::add(2, "b"), Change::remove(3, "c")]));
        assert!(result.is_err());
        assert_eq!(cache.len(), 1);
        assert!(!cache.contains_key(&2));
    }

    #[test]
    fn test_strict_sees_earlier_changes_in_batch() {
        let mut cache = Cache::with_policy(MirrorPolicy::Strict);
        cache
            .apply(&set(vec![
                Change::add(1, "a"),
                Change::update(1, "b", "a"),
                Change::remove(1, "b"),
            ]))
            .unwrap();
        assert!(cache.is_empty());

        let err = cache.apply(&set(vec![
            Change::add(2, "a"),
            Change::remove(2, "a"),
            Change::update(2, "b", "a"),
        ]));
        assert!(err.is_err());
    }

    #[test]
    fn test_cache_clear_and_drain() {
        let mut cache = Cache::new();
        cache
            .apply(&set(vec![Change::add(1, "a"), Change::add(2, "b")]))
            .unwrap();

        let mut drained: Vec<(u32, &str)> = cache.clone().drain().collect();
        drained.sort();
        assert_eq!(drained, vec![(1, "a"), (2, "b")]);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.items().count(), 0);
    }
}
