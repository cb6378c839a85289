//! Identity of keyed entries.
//!
//! Two `(key, value)` entries are the same entry iff their keys are equal;
//! the value is payload and never participates in equality or hashing.

use core::borrow::Borrow;
use core::hash::{BuildHasher, Hash, Hasher};
use core::marker::PhantomData;
use hashbrown::hash_map::DefaultHashBuilder;

/// Equality and hashing of `(key, value)` pairs by key only.
pub struct KeyComparer<K, V> {
    hasher: DefaultHashBuilder,
    _marker: PhantomData<fn(&K, &V)>,
}

impl<K, V> Default for KeyComparer<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for KeyComparer<K, V> {
    fn clone(&self) -> Self {
        Self {
            hasher: self.hasher.clone(),
            _marker: PhantomData,
        }
    }
}

impl<K, V> KeyComparer<K, V> {
    /// Creates a comparer with the default hasher.
    pub fn new() -> Self {
        Self {
            hasher: DefaultHashBuilder::default(),
            _marker: PhantomData,
        }
    }
}

impl<K: Eq + Hash, V> KeyComparer<K, V> {
    /// Entries are equal iff their keys are equal.
    #[inline]
    pub fn equals(&self, x: &(K, V), y: &(K, V)) -> bool {
        x.0 == y.0
    }

    /// Hashes an entry by its key.
    #[inline]
    pub fn hash(&self, entry: &(K, V)) -> u64 {
        self.hash_key(Some(&entry.0))
    }

    /// Hashes a key; an absent key hashes to `0`.
    pub fn hash_key(&self, key: Option<&K>) -> u64 {
        match key {
            Some(key) => {
                let mut state = self.hasher.build_hasher();
                key.hash(&mut state);
                state.finish()
            }
            None => 0,
        }
    }
}

/// A `(key, value)` entry whose equality and hash are those of its key.
///
/// Lets a `HashSet` dedupe entries by identity while carrying any payload.
#[derive(Clone, Debug)]
pub struct KeyedEntry<K, V> {
    pub key: K,
    pub value: V,
}

impl<K, V> KeyedEntry<K, V> {
    /// Wraps a key and value.
    #[inline]
    pub fn new(key: K, value: V) -> Self {
        Self { key, value }
    }

    /// Unwraps into the key and value.
    #[inline]
    pub fn into_pair(self) -> (K, V) {
        (self.key, self.value)
    }
}

impl<K: PartialEq, V> PartialEq for KeyedEntry<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<K: Eq, V> Eq for KeyedEntry<K, V> {}

impl<K: Hash, V> Hash for KeyedEntry<K, V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

// Allows `set.contains(&key)` lookups without building an entry.
impl<K, V> Borrow<K> for KeyedEntry<K, V> {
    fn borrow(&self) -> &K {
        &self.key
    }
}
