//! Grouping that follows in-place field changes.
//!
//! [`GroupOnProperty`] partitions the live items of a keyed stream by a
//! watched field and republishes the groups whenever the source emits or the
//! field changes on any current member. Each recompute is a full
//! re-partition of the mirror, diffed against the last published snapshot.
//!
//! Field changes can optionally be coalesced: with a throttle configured, a
//! burst of changes produces one recompute once the window passes quietly.

use crate::callback::guarded;
use crate::field::{FieldCallback, FieldWatch, NotifyFieldChanged};
use crate::observable::{publish, ChangeStream, Observable, Observer};
use crate::scheduler::{Scheduler, Throttle};
use crate::subscription::Subscription;
use core::fmt::Debug;
use core::hash::Hash;
use hashbrown::{HashMap, HashSet};
use keyflow_core::{Cache, ChangeReason, ChangeSet, Error, Result};
use keyflow_incremental::{partition, Group, GroupSnapshot};
use parking_lot::{Mutex, ReentrantMutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Change sets of group snapshots keyed by group key.
pub type GroupChangeSet<K, V, G> = ChangeSet<G, Group<K, V, G>>;

/// Groups a keyed stream by a field that may change in place.
pub struct GroupOnProperty<K, V, G> {
    source: ChangeStream<K, V>,
    watch: FieldWatch<V, G>,
    throttle: Option<(Duration, Arc<dyn Scheduler>)>,
}

impl<K, V, G> GroupOnProperty<K, V, G> {
    /// Groups `source` by the value `watch` reads, without throttling.
    pub fn new(source: ChangeStream<K, V>, watch: FieldWatch<V, G>) -> Self {
        Self {
            source,
            watch,
            throttle: None,
        }
    }

    /// Coalesces field changes: a recompute runs once `window` passes with
    /// no further change. Source change sets are never delayed.
    pub fn with_throttle(mut self, window: Duration, scheduler: Arc<dyn Scheduler>) -> Result<Self> {
        if window.is_zero() {
            return Err(Error::invalid_argument("throttle window must be greater than zero"));
        }
        self.throttle = Some((window, scheduler));
        Ok(self)
    }

    /// Returns the throttle window, if any.
    #[inline]
    pub fn throttle_window(&self) -> Option<Duration> {
        self.throttle.as_ref().map(|(window, _)| *window)
    }
}

impl<K, V, G> Observable<GroupChangeSet<K, V, G>> for GroupOnProperty<K, V, G>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: NotifyFieldChanged + Clone + Send + Sync + 'static,
    G: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn subscribe(&self, observer: Arc<dyn Observer<GroupChangeSet<K, V, G>>>) -> Subscription {
        let mut build_error = None;
        let engine = Arc::new_cyclic(|this: &Weak<RegroupEngine<K, V, G>>| {
            let throttle = self.throttle.as_ref().and_then(|(window, scheduler)| {
                let target = this.clone();
                let action = move || {
                    if let Some(engine) = target.upgrade() {
                        engine.recompute(None);
                    }
                };
                match Throttle::new(*window, Arc::clone(scheduler), action) {
                    Ok(throttle) => Some(throttle),
                    Err(error) => {
                        build_error = Some(error);
                        None
                    }
                }
            });
            RegroupEngine {
                state: Mutex::new(RegroupState {
                    cache: Cache::new(),
                    snapshot: GroupSnapshot::new(),
                }),
                gate: ReentrantMutex::new(()),
                watch: self.watch.clone(),
                throttle,
                downstream: Arc::clone(&observer),
                disposed: AtomicBool::new(false),
                members: Mutex::new(HashMap::new()),
                connections: Mutex::new(Vec::new()),
                this: this.clone(),
            }
        });
        if let Some(error) = build_error {
            observer.on_error(&error);
            return Subscription::empty();
        }
        tracing::debug!(
            field = %self.watch.field(),
            throttle = ?self.throttle_window(),
            "regroup engine subscribed"
        );

        // Member watches go first so a new item is watched before it is grouped.
        let shared = publish(Arc::clone(&self.source));
        let members = shared.subscribe(Arc::new(MemberWatcher {
            engine: Arc::clone(&engine),
        }));
        let regroup = shared.subscribe(Arc::clone(&engine) as Arc<dyn Observer<ChangeSet<K, V>>>);
        let connection = shared.connect();
        engine.attach(vec![connection, members, regroup]);

        Subscription::new(move || engine.teardown())
    }
}

struct RegroupState<K, V, G> {
    cache: Cache<K, V>,
    snapshot: GroupSnapshot<K, V, G>,
}

struct RegroupEngine<K, V, G> {
    state: Mutex<RegroupState<K, V, G>>,
    gate: ReentrantMutex<()>,
    watch: FieldWatch<V, G>,
    throttle: Option<Arc<Throttle>>,
    downstream: Arc<dyn Observer<GroupChangeSet<K, V, G>>>,
    disposed: AtomicBool,
    /// Field watch per live member.
    members: Mutex<HashMap<K, Subscription>>,
    connections: Mutex<Vec<Subscription>>,
    this: Weak<RegroupEngine<K, V, G>>,
}

impl<K, V, G> RegroupEngine<K, V, G>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: NotifyFieldChanged + Clone + Send + Sync + 'static,
    G: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn attach(&self, connections: Vec<Subscription>) {
        let mut slot = self.connections.lock();
        if self.disposed.load(Ordering::Acquire) {
            drop(slot);
            drop(connections);
        } else {
            slot.extend(connections);
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// A watched field changed on some member.
    fn field_changed(&self) {
        if self.is_disposed() {
            return;
        }
        match &self.throttle {
            Some(throttle) => throttle.trigger(),
            None => self.recompute(None),
        }
    }

    fn member_callback(&self) -> FieldCallback {
        let target = self.this.clone();
        Arc::new(move || {
            if let Some(engine) = target.upgrade() {
                engine.field_changed();
            }
        })
    }

    /// Keeps one field watch per live member.
    fn track_members(&self, changes: &ChangeSet<K, V>) {
        let _gate = self.gate.lock();
        if self.is_disposed() {
            return;
        }
        let field = self.watch.field();
        let mut replaced = Vec::new();
        for change in changes {
            match change.reason() {
                ChangeReason::Add | ChangeReason::Update => {
                    let watch = change.current().watch_field(field, self.member_callback());
                    replaced.extend(self.members.lock().insert(change.key().clone(), watch));
                }
                ChangeReason::Remove => {
                    replaced.extend(self.members.lock().remove(change.key()));
                }
                ChangeReason::Refresh | ChangeReason::Moved => {}
            }
        }
        drop(replaced);
    }

    /// Re-partitions the mirror and publishes what changed.
    ///
    /// `changes` is applied to the mirror first when the recompute was caused
    /// by the source rather than by a field change.
    fn recompute(&self, changes: Option<&ChangeSet<K, V>>) {
        let _gate = self.gate.lock();
        let outcome = {
            let mut guard = self.state.lock();
            if self.is_disposed() {
                return;
            }
            let RegroupState { cache, snapshot } = &mut *guard;
            self.regroup(cache, snapshot, changes)
        };

        match outcome {
            Ok(diff) if diff.is_empty() => {
                tracing::trace!("regroup produced no changes");
            }
            Ok(diff) => {
                tracing::trace!(
                    adds = diff.adds(),
                    updates = diff.updates(),
                    removes = diff.removes(),
                    "regroup published"
                );
                self.downstream.on_next(&diff);
            }
            Err(error) => {
                tracing::warn!(%error, "regroup engine terminated");
                self.downstream.on_error(&error);
                self.teardown();
            }
        }
    }

    fn regroup(
        &self,
        cache: &mut Cache<K, V>,
        snapshot: &mut GroupSnapshot<K, V, G>,
        changes: Option<&ChangeSet<K, V>>,
    ) -> Result<GroupChangeSet<K, V, G>> {
        let mut touched = HashSet::new();
        if let Some(changes) = changes {
            cache.apply(changes)?;
            touched.extend(
                changes
                    .iter()
                    .filter(|c| c.reason() == ChangeReason::Update)
                    .map(|c| c.key().clone()),
            );
        }

        let watch = &self.watch;
        let groups = guarded("grouping function", || partition(cache.iter(), |item| watch.select(item)))?;
        Ok(snapshot.diff(groups, &touched))
    }

    /// Idempotent. Waits for a recompute in flight on another thread.
    fn teardown(&self) {
        let _gate = self.gate.lock();
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let connections = core::mem::take(&mut *self.connections.lock());
        drop(connections);
        if let Some(throttle) = &self.throttle {
            throttle.close();
        }
        let members = core::mem::take(&mut *self.members.lock());
        let watched = members.len();
        drop(members);

        let mut state = self.state.lock();
        state.cache.clear();
        state.snapshot.clear();
        tracing::debug!(watched, "regroup engine disposed");
    }
}

impl<K, V, G> Observer<ChangeSet<K, V>> for RegroupEngine<K, V, G>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: NotifyFieldChanged + Clone + Send + Sync + 'static,
    G: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn on_next(&self, changes: &ChangeSet<K, V>) {
        self.recompute(Some(changes));
    }

    fn on_error(&self, error: &Error) {
        let _gate = self.gate.lock();
        if self.is_disposed() {
            return;
        }
        self.downstream.on_error(error);
        self.teardown();
    }

    fn on_completed(&self) {
        let _gate = self.gate.lock();
        if self.is_disposed() {
            return;
        }
        self.downstream.on_completed();
        self.teardown();
    }
}

/// Second consumer of the shared source; maintains member field watches.
struct MemberWatcher<K, V, G> {
    engine: Arc<RegroupEngine<K, V, G>>,
}

impl<K, V, G> Observer<ChangeSet<K, V>> for MemberWatcher<K, V, G>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: NotifyFieldChanged + Clone + Send + Sync + 'static,
    G: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn on_next(&self, changes: &ChangeSet<K, V>) {
        self.engine.track_members(changes);
    }

    // Terminal signals reach the engine through its own subscription.
    fn on_error(&self, _error: &Error) {}

    fn on_completed(&self) {}
}
