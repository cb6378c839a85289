//! Operator methods on change streams.

use crate::field::FieldWatch;
use crate::lifecycle::OnBeingRemoved;
use crate::observable::ChangeStream;
use crate::regroup::GroupOnProperty;
use crate::scheduler::Scheduler;
use core::fmt::Debug;
use core::hash::Hash;
use keyflow_core::Result;
use std::sync::Arc;
use std::time::Duration;

/// Chains keyed operators onto a [`ChangeStream`].
///
/// ```
/// use keyflow_reactive::{ChangeSet, ChangeStreamExt, SourceCache, SubscribeExt};
/// use std::sync::{Arc, Mutex};
///
/// let people: SourceCache<u32, String> = SourceCache::new();
/// let released = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&released);
///
/// let guarded = people
///     .connect()
///     .on_item_removed(move |name: &String| sink.lock().unwrap().push(name.clone()));
/// let sub = guarded.subscribe_fn(|_: &ChangeSet<u32, String>| {});
///
/// people.add_or_update(1, "ann".to_string()).unwrap();
/// people.remove(&1).unwrap();
/// drop(sub);
///
/// assert_eq!(*released.lock().unwrap(), vec!["ann".to_string()]);
/// ```
pub trait ChangeStreamExt<K, V> {
    /// Releases every item once it leaves the stream, including items still
    /// present when the subscription ends.
    fn on_item_removed<F>(&self, release: F) -> ChangeStream<K, V>
    where
        F: Fn(&V) + Send + Sync + 'static;

    /// Like [`on_item_removed`](Self::on_item_removed), with the teardown
    /// sweep made optional.
    fn on_item_removed_with<F>(&self, release: F, invoke_on_unsubscribe: bool) -> ChangeStream<K, V>
    where
        F: Fn(&V) + Send + Sync + 'static;

    /// Groups items by a field, regrouping as soon as the field changes.
    fn group_on_property<G>(&self, watch: FieldWatch<V, G>) -> GroupOnProperty<K, V, G>;

    /// Groups items by a field, coalescing field changes within `window`.
    fn group_on_property_throttled<G>(
        &self,
        watch: FieldWatch<V, G>,
        window: Duration,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<GroupOnProperty<K, V, G>>;
}

impl<K, V> ChangeStreamExt<K, V> for ChangeStream<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn on_item_removed<F>(&self, release: F) -> ChangeStream<K, V>
    where
        F: Fn(&V) + Send + Sync + 'static,
    {
        self.on_item_removed_with(release, true)
    }

    fn on_item_removed_with<F>(&self, release: F, invoke_on_unsubscribe: bool) -> ChangeStream<K, V>
    where
        F: Fn(&V) + Send + Sync + 'static,
    {
        Arc::new(OnBeingRemoved::new(Arc::clone(self), release, invoke_on_unsubscribe))
    }

    fn group_on_property<G>(&self, watch: FieldWatch<V, G>) -> GroupOnProperty<K, V, G> {
        GroupOnProperty::new(Arc::clone(self), watch)
    }

    fn group_on_property_throttled<G>(
        &self,
        watch: FieldWatch<V, G>,
        window: Duration,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<GroupOnProperty<K, V, G>> {
        GroupOnProperty::new(Arc::clone(self), watch).with_throttle(window, scheduler)
    }
}
