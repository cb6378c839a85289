//! Release actions for items leaving a keyed stream.
//!
//! [`OnBeingRemoved`] passes change sets through unchanged while mirroring
//! the live items. Every item gets exactly one release call: when a `Remove`
//! for it arrives, or during the teardown sweep if it is still present and
//! the sweep is enabled.

use crate::callback::guarded;
use crate::observable::{ChangeStream, Observable, Observer};
use crate::subscription::Subscription;
use core::fmt::Debug;
use core::hash::Hash;
use keyflow_core::{Cache, ChangeReason, ChangeSet, Error, MirrorPolicy, Result};
use parking_lot::{Mutex, ReentrantMutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Action run once for every item leaving the stream.
pub type ReleaseFn<V> = Arc<dyn Fn(&V) + Send + Sync>;

/// Runs a release action for every removed item.
///
/// Each subscription owns its own mirror, so two subscribers to the same
/// guard release the same item twice, once each.
pub struct OnBeingRemoved<K, V> {
    source: ChangeStream<K, V>,
    release: ReleaseFn<V>,
    invoke_on_unsubscribe: bool,
    policy: MirrorPolicy,
}

impl<K, V> OnBeingRemoved<K, V> {
    /// Wraps `source`. When `invoke_on_unsubscribe` is set, items still live
    /// at teardown are released too.
    ///
    /// `release` runs under the guard's lock and must not cancel the guard's
    /// own subscription.
    pub fn new<F>(source: ChangeStream<K, V>, release: F, invoke_on_unsubscribe: bool) -> Self
    where
        F: Fn(&V) + Send + Sync + 'static,
    {
        Self {
            source,
            release: Arc::new(release),
            invoke_on_unsubscribe,
            policy: MirrorPolicy::default(),
        }
    }

    /// Sets how the mirror treats removes and updates for unknown keys.
    pub fn with_mirror_policy(mut self, policy: MirrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns whether live items are released on unsubscribe.
    #[inline]
    pub fn invoke_on_unsubscribe(&self) -> bool {
        self.invoke_on_unsubscribe
    }
}

impl<K, V> Observable<ChangeSet<K, V>> for OnBeingRemoved<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn subscribe(&self, observer: Arc<dyn Observer<ChangeSet<K, V>>>) -> Subscription {
        let guard = Arc::new(RemovalGuard {
            cache: Mutex::new(Cache::with_policy(self.policy)),
            gate: ReentrantMutex::new(()),
            release: Arc::clone(&self.release),
            invoke_on_unsubscribe: self.invoke_on_unsubscribe,
            downstream: observer,
            disposed: AtomicBool::new(false),
            upstream: Mutex::new(None),
        });
        tracing::debug!(
            invoke_on_unsubscribe = self.invoke_on_unsubscribe,
            policy = ?self.policy,
            "removal guard subscribed"
        );

        let upstream = self.source.subscribe(Arc::clone(&guard) as Arc<dyn Observer<ChangeSet<K, V>>>);
        guard.attach(upstream);

        Subscription::new(move || guard.teardown())
    }
}

/// Per-subscription state.
struct RemovalGuard<K, V> {
    cache: Mutex<Cache<K, V>>,
    gate: ReentrantMutex<()>,
    release: ReleaseFn<V>,
    invoke_on_unsubscribe: bool,
    downstream: Arc<dyn Observer<ChangeSet<K, V>>>,
    disposed: AtomicBool,
    upstream: Mutex<Option<Subscription>>,
}

impl<K, V> RemovalGuard<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    fn attach(&self, upstream: Subscription) {
        let mut slot = self.upstream.lock();
        if self.disposed.load(Ordering::Acquire) {
            drop(slot);
            drop(upstream);
        } else {
            *slot = Some(upstream);
        }
    }

    /// Mirrors `changes` and releases every removed item.
    ///
    /// All removals are attempted even if one fails; the first failure wins.
    fn apply(&self, cache: &mut Cache<K, V>, changes: &ChangeSet<K, V>) -> Result<()> {
        cache.apply(changes)?;

        let mut failure = None;
        for change in changes.iter().filter(|c| c.reason() == ChangeReason::Remove) {
            if let Err(error) = guarded("release action", || (self.release)(change.current())) {
                failure.get_or_insert(error);
            }
        }
        failure.map_or(Ok(()), Err)
    }

    /// Idempotent. Waits for a delivery in flight on another thread.
    fn teardown(&self) {
        let _gate = self.gate.lock();
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let upstream = self.upstream.lock().take();
        drop(upstream);

        let mut cache = self.cache.lock();
        let mut released = 0usize;
        if self.invoke_on_unsubscribe {
            for item in cache.items() {
                if let Err(error) = guarded("release action", || (self.release)(item)) {
                    tracing::error!(%error, "release action failed during teardown sweep");
                }
                released += 1;
            }
        }
        cache.clear();
        tracing::debug!(released, "removal guard disposed");
    }
}

impl<K, V> Observer<ChangeSet<K, V>> for RemovalGuard<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync,
    V: Clone + Send + Sync,
{
    fn on_next(&self, changes: &ChangeSet<K, V>) {
        let _gate = self.gate.lock();
        let outcome = {
            let mut cache = self.cache.lock();
            if self.disposed.load(Ordering::Acquire) {
                return;
            }
            self.apply(&mut cache, changes)
        };

        match outcome {
            Ok(()) => {
                tracing::trace!(
                    changes = changes.len(),
                    removes = changes.removes(),
                    "removal guard applied change set"
                );
                self.downstream.on_next(changes);
            }
            Err(error) => {
                tracing::warn!(%error, "removal guard terminated");
                self.downstream.on_error(&error);
                self.teardown();
            }
        }
    }

    fn on_error(&self, error: &Error) {
        let _gate = self.gate.lock();
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        self.downstream.on_error(error);
        self.teardown();
    }

    fn on_completed(&self) {
        let _gate = self.gate.lock();
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        self.downstream.on_completed();
        self.teardown();
    }
}
