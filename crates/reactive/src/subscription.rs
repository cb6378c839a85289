//! Subscription handles and subscriber bookkeeping.
//!
//! A `Subscription` is the cancellation handle returned by every `subscribe`
//! call. Cancelling is idempotent and also happens when the handle is dropped.
//! `SubscriptionManager` tracks the observers registered on a hot source.

use crate::observable::Observer;
use core::fmt;
use hashbrown::HashMap;
use keyflow_core::Error;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Unique identifier for a subscription.
pub type SubscriptionId = u64;

type Teardown = Box<dyn FnOnce() + Send>;

/// Idempotent cancellation handle.
///
/// The teardown action runs at most once: on the first `unsubscribe()` or
/// when the handle is dropped, whichever comes first.
pub struct Subscription {
    teardown: Mutex<Option<Teardown>>,
}

impl Subscription {
    /// Creates a handle that runs `teardown` when cancelled.
    pub fn new<F>(teardown: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            teardown: Mutex::new(Some(Box::new(teardown))),
        }
    }

    /// Creates a handle with nothing to tear down.
    pub fn empty() -> Self {
        Self {
            teardown: Mutex::new(None),
        }
    }

    /// Cancels the subscription. Only the first call has any effect.
    pub fn unsubscribe(&self) {
        let teardown = self.teardown.lock().take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    /// Returns true once the subscription has been cancelled.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.teardown.lock().is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(teardown) = self.teardown.get_mut().take() {
            teardown();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A registered observer.
pub(crate) struct Subscriber<T> {
    observer: Arc<dyn Observer<T>>,
    active: AtomicBool,
}

impl<T> Subscriber<T> {
    fn new(observer: Arc<dyn Observer<T>>) -> Self {
        Self {
            observer,
            active: AtomicBool::new(true),
        }
    }

    #[inline]
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    #[inline]
    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub(crate) fn notify(&self, value: &T) {
        if self.is_active() {
            self.observer.on_next(value);
        }
    }

    pub(crate) fn notify_error(&self, error: &Error) {
        if self.is_active() {
            self.deactivate();
            self.observer.on_error(error);
        }
    }

    pub(crate) fn notify_completed(&self) {
        if self.is_active() {
            self.deactivate();
            self.observer.on_completed();
        }
    }
}

/// Observers registered on a hot source.
///
/// Not synchronized; the owner guards it with a lock and takes a
/// [`snapshot`](SubscriptionManager::snapshot) to deliver outside that lock.
pub(crate) struct SubscriptionManager<T> {
    subscriptions: HashMap<SubscriptionId, Arc<Subscriber<T>>>,
    next_id: SubscriptionId,
}

impl<T> Default for SubscriptionManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SubscriptionManager<T> {
    pub(crate) fn new() -> Self {
        Self {
            subscriptions: HashMap::new(),
            next_id: 1,
        }
    }

    /// Registers an observer and returns its id.
    pub(crate) fn subscribe(&mut self, observer: Arc<dyn Observer<T>>) -> SubscriptionId {
        let id = self.next_id;
        self.next_id += 1;
        self.subscriptions.insert(id, Arc::new(Subscriber::new(observer)));
        id
    }

    /// Removes and deactivates a subscriber.
    ///
    /// Returns the removed subscriber so the caller can drop it outside its lock.
    pub(crate) fn unsubscribe(&mut self, id: SubscriptionId) -> Option<Arc<Subscriber<T>>> {
        let removed = self.subscriptions.remove(&id);
        if let Some(sub) = &removed {
            sub.deactivate();
        }
        removed
    }

    /// Currently registered subscribers, in subscription order.
    pub(crate) fn snapshot(&self) -> Vec<Arc<Subscriber<T>>> {
        let mut subs: Vec<_> = self.subscriptions.iter().collect();
        subs.sort_unstable_by_key(|(id, _)| **id);
        subs.into_iter().map(|(_, sub)| Arc::clone(sub)).collect()
    }

    /// Removes every subscriber and returns them.
    pub(crate) fn drain(&mut self) -> Vec<Arc<Subscriber<T>>> {
        self.subscriptions.drain().map(|(_, sub)| sub).collect()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.subscriptions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observable::CallbackObserver;
    use std::sync::atomic::AtomicUsize;

    fn counting_observer(count: &Arc<AtomicUsize>) -> Arc<dyn Observer<u32>> {
        let count = Arc::clone(count);
        Arc::new(CallbackObserver::new(move |_: &u32| {
            count.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn test_subscription_unsubscribe_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let sub = Subscription::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!sub.is_closed());
        sub.unsubscribe();
        sub.unsubscribe();
        drop(sub);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_drop_unsubscribes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        {
            let _sub = Subscription::new(move || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_empty() {
        let sub = Subscription::empty();
        assert!(sub.is_closed());
        sub.unsubscribe();
    }

    #[test]
    fn test_manager_subscribe_ids() {
        let mut manager: SubscriptionManager<u32> = SubscriptionManager::new();
        let count = Arc::new(AtomicUsize::new(0));

        let id1 = manager.subscribe(counting_observer(&count));
        let id2 = manager.subscribe(counting_observer(&count));

        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_manager_unsubscribe_deactivates() {
        let mut manager: SubscriptionManager<u32> = SubscriptionManager::new();
        let count = Arc::new(AtomicUsize::new(0));

        let id = manager.subscribe(counting_observer(&count));
        let snapshot = manager.snapshot();

        let removed = manager.unsubscribe(id).unwrap();
        assert!(!removed.is_active());
        assert!(manager.unsubscribe(id).is_none());

        // A snapshot taken before unsubscribing no longer delivers.
        snapshot[0].notify(&7);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_snapshot_in_subscription_order() {
        let mut manager: SubscriptionManager<u32> = SubscriptionManager::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in 0..16u32 {
            let order = Arc::clone(&order);
            manager.subscribe(Arc::new(CallbackObserver::new(move |_: &u32| order.lock().push(tag))));
        }

        for sub in manager.snapshot() {
            sub.notify(&0);
        }
        assert_eq!(*order.lock(), (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn test_subscriber_terminal_delivered_once() {
        let mut manager: SubscriptionManager<u32> = SubscriptionManager::new();
        let count = Arc::new(AtomicUsize::new(0));
        manager.subscribe(counting_observer(&count));

        let subs = manager.drain();
        assert_eq!(manager.len(), 0);
        subs[0].notify_completed();
        assert!(!subs[0].is_active());
        subs[0].notify(&1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
