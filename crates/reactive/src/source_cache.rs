//! An editable keyed source.
//!
//! `SourceCache` is where change streams usually start: callers edit it in
//! batches and every connected stream receives one change set per batch.

use crate::observable::{ChangeStream, Observable, Observer, Subject};
use crate::subscription::Subscription;
use core::fmt::Debug;
use core::hash::Hash;
use hashbrown::HashMap;
use keyflow_core::{Cache, Change, ChangeSet, Error, Result};
use parking_lot::{Mutex, ReentrantMutex};
use std::sync::Arc;

struct Inner<K, V> {
    data: Mutex<Cache<K, V>>,
    /// Serializes edits with their emission and with `connect` replays.
    gate: ReentrantMutex<()>,
    subject: Subject<ChangeSet<K, V>>,
}

/// A keyed collection that publishes its edits.
pub struct SourceCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for SourceCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Default for SourceCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SourceCache<K, V> {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                data: Mutex::new(Cache::new()),
                gate: ReentrantMutex::new(()),
                subject: Subject::new(),
            }),
        }
    }

    /// Returns the number of items.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.data.lock().len()
    }

    /// Returns true if the source holds no items.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.data.lock().is_empty()
    }

    /// Completes every connected stream. Later edits fail.
    pub fn complete(&self) {
        let _gate = self.inner.gate.lock();
        self.inner.subject.complete();
    }

    /// Terminates every connected stream with `error`. Later edits fail.
    pub fn fail(&self, error: Error) {
        let _gate = self.inner.gate.lock();
        self.inner.subject.error(error);
    }
}

impl<K, V> SourceCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Applies a batch of edits and publishes them as one change set.
    ///
    /// Nothing is published when the batch turns out to be empty. `f` must
    /// not edit this cache again; it runs under the cache's lock.
    pub fn edit<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut CacheUpdater<'_, K, V>) -> R,
    {
        let _gate = self.inner.gate.lock();
        if self.inner.subject.is_stopped() {
            return Err(Error::invalid_state("source cache no longer accepts edits"));
        }

        let (result, changes) = {
            let mut data = self.inner.data.lock();
            let mut updater = CacheUpdater::new(&data);
            let result = f(&mut updater);
            let changes = updater.finish();
            data.apply(&changes)?;
            (result, changes)
        };

        if !changes.is_empty() {
            tracing::trace!(changes = changes.len(), "source cache edited");
            self.inner.subject.next(&changes);
        }
        Ok(result)
    }

    /// Adds `value`, or replaces the value already stored under `key`.
    pub fn add_or_update(&self, key: K, value: V) -> Result<()> {
        self.edit(|updater| updater.add_or_update(key, value))
    }

    /// Returns whether the key was present.
    pub fn remove(&self, key: &K) -> Result<bool> {
        self.edit(|updater| updater.remove(key))
    }

    /// Removes every item.
    pub fn clear(&self) -> Result<()> {
        self.edit(|updater| updater.clear())
    }

    /// Returns a clone of the value stored under `key`.
    pub fn lookup(&self, key: &K) -> Option<V> {
        self.inner.data.lock().lookup(key).cloned()
    }

    /// Returns clones of every item.
    pub fn items(&self) -> Vec<V> {
        self.inner.data.lock().items().cloned().collect()
    }

    /// Returns clones of every key.
    pub fn keys(&self) -> Vec<K> {
        self.inner.data.lock().keys().cloned().collect()
    }

    /// A stream that first replays the current items as `Add`s, then follows
    /// every later edit.
    pub fn connect(&self) -> ChangeStream<K, V> {
        Arc::new(Connection {
            inner: Arc::clone(&self.inner),
        })
    }
}

struct Connection<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Observable<ChangeSet<K, V>> for Connection<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn subscribe(&self, observer: Arc<dyn Observer<ChangeSet<K, V>>>) -> Subscription {
        let _gate = self.inner.gate.lock();
        if self.inner.subject.is_stopped() {
            return self.inner.subject.subscribe(observer);
        }

        let initial: ChangeSet<K, V> = self
            .inner
            .data
            .lock()
            .iter()
            .map(|(key, value)| Change::add(key.clone(), value.clone()))
            .collect();
        // Registered before the replay so edits made from inside it still arrive.
        let subscription = self.inner.subject.subscribe(Arc::clone(&observer));
        if !initial.is_empty() {
            observer.on_next(&initial);
        }
        subscription
    }
}

/// Batch editor handed to [`SourceCache::edit`].
///
/// Each operation sees the effect of earlier operations in the same batch.
pub struct CacheUpdater<'a, K, V> {
    base: &'a Cache<K, V>,
    pending: HashMap<K, Option<V>>,
    changes: Vec<Change<K, V>>,
}

impl<'a, K, V> CacheUpdater<'a, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn new(base: &'a Cache<K, V>) -> Self {
        Self {
            base,
            pending: HashMap::new(),
            changes: Vec::new(),
        }
    }

    /// Current value of `key`, including edits made so far in this batch.
    pub fn lookup(&self, key: &K) -> Option<&V> {
        match self.pending.get(key) {
            Some(state) => state.as_ref(),
            None => self.base.lookup(key),
        }
    }

    /// Emits `Add` for a new key and `Update` for an existing one.
    pub fn add_or_update(&mut self, key: K, value: V) {
        let change = match self.lookup(&key) {
            Some(previous) => Change::update(key.clone(), value.clone(), previous.clone()),
            None => Change::add(key.clone(), value.clone()),
        };
        self.changes.push(change);
        self.pending.insert(key, Some(value));
    }

    /// Removes `key` if present and returns whether it was.
    pub fn remove(&mut self, key: &K) -> bool {
        match self.lookup(key).cloned() {
            Some(previous) => {
                self.changes.push(Change::remove(key.clone(), previous));
                self.pending.insert(key.clone(), None);
                true
            }
            None => false,
        }
    }

    /// Asks downstream operators to re-evaluate `key` without changing it.
    pub fn refresh(&mut self, key: &K) -> bool {
        match self.lookup(key).cloned() {
            Some(current) => {
                self.changes.push(Change::refresh(key.clone(), current));
                true
            }
            None => false,
        }
    }

    /// Removes every item.
    pub fn clear(&mut self) {
        let mut keys: Vec<K> = self
            .base
            .keys()
            .filter(|key| !self.pending.contains_key(*key))
            .cloned()
            .collect();
        keys.extend(
            self.pending
                .iter()
                .filter(|(_, state)| state.is_some())
                .map(|(key, _)| key.clone()),
        );
        for key in keys {
            self.remove(&key);
        }
    }

    fn finish(self) -> ChangeSet<K, V> {
        ChangeSet::new(self.changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observable::{CallbackObserver, SubscribeExt};
    use keyflow_core::ChangeReason;

    fn collect(stream: &ChangeStream<u32, &'static str>) -> (Arc<Mutex<Vec<ChangeSet<u32, &'static str>>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = stream.subscribe_fn(move |changes: &ChangeSet<u32, &'static str>| sink.lock().push(changes.clone()));
        (seen, sub)
    }

    fn reasons(changes: &ChangeSet<u32, &'static str>) -> Vec<ChangeReason> {
        changes.iter().map(|c| c.reason()).collect()
    }

    #[test]
    fn test_edit_decides_add_or_update() {
        let cache = SourceCache::new();
        let (seen, _sub) = collect(&cache.connect());

        cache.add_or_update(1, "a").unwrap();
        cache
            .edit(|u| {
                u.add_or_update(1, "b");
                u.add_or_update(2, "c");
            })
            .unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(reasons(&seen[0]), vec![ChangeReason::Add]);
        assert_eq!(reasons(&seen[1]), vec![ChangeReason::Update, ChangeReason::Add]);
        assert_eq!(seen[1].as_slice()[0].previous(), Some(&"a"));
        assert_eq!(cache.lookup(&1), Some("b"));
    }

    #[test]
    fn test_batch_sees_its_own_edits() {
        let cache = SourceCache::new();
        let (seen, _sub) = collect(&cache.connect());

        let removed = cache
            .edit(|u| {
                u.add_or_update(7, "x");
                u.remove(&7)
            })
            .unwrap();

        assert!(removed);
        assert!(cache.is_empty());
        assert_eq!(reasons(&seen.lock()[0]), vec![ChangeReason::Add, ChangeReason::Remove]);
    }

    #[test]
    fn test_empty_edit_publishes_nothing() {
        let cache: SourceCache<u32, &'static str> = SourceCache::new();
        let (seen, _sub) = collect(&cache.connect());

        assert!(!cache.remove(&3).unwrap());
        cache.edit(|u| u.refresh(&3)).unwrap();
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_connect_replays_current_items() {
        let cache = SourceCache::new();
        cache
            .edit(|u| {
                u.add_or_update(1, "a");
                u.add_or_update(2, "b");
            })
            .unwrap();

        let (seen, _sub) = collect(&cache.connect());
        cache.remove(&1).unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].adds(), 2);
        assert_eq!(reasons(&seen[1]), vec![ChangeReason::Remove]);
    }

    #[test]
    fn test_edit_during_replay_reaches_subscriber() {
        let cache = SourceCache::new();
        cache.add_or_update(1, "a").unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let editor = cache.clone();
        let _sub = cache.connect().subscribe_fn(move |changes: &ChangeSet<u32, &'static str>| {
            sink.lock().push(reasons(changes));
            if changes.adds() > 0 {
                editor.remove(&1).unwrap();
            }
        });

        assert!(cache.is_empty());
        assert_eq!(*seen.lock(), vec![vec![ChangeReason::Add], vec![ChangeReason::Remove]]);
    }

    #[test]
    fn test_clear_removes_everything() {
        let cache = SourceCache::new();
        cache.add_or_update(1, "a").unwrap();
        let (seen, _sub) = collect(&cache.connect());

        cache
            .edit(|u| {
                u.add_or_update(2, "b");
                u.clear();
            })
            .unwrap();

        assert!(cache.is_empty());
        let seen = seen.lock();
        assert_eq!(seen[1].adds(), 1);
        assert_eq!(seen[1].removes(), 2);
    }

    #[test]
    fn test_complete_rejects_later_edits() {
        let cache: SourceCache<u32, &'static str> = SourceCache::new();
        let done = Arc::new(Mutex::new(false));
        let done_clone = Arc::clone(&done);
        let _sub = cache.connect().subscribe(Arc::new(
            CallbackObserver::new(|_: &ChangeSet<u32, &'static str>| {}).with_completed(move || *done_clone.lock() = true),
        ));

        cache.complete();
        assert!(*done.lock());
        assert!(matches!(cache.add_or_update(1, "a"), Err(Error::InvalidState { .. })));
    }
}
