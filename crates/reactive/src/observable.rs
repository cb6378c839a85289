//! Push-based transport.
//!
//! An `Observable` delivers zero or more values to each `Observer`, optionally
//! followed by exactly one terminal signal (an error or completion).
//! Delivery is synchronous on the producer's thread; nothing is queued.
//!
//! `Subject` is the hot source everything else is built from: it fans values
//! out to its current subscribers. `publish` shares a single upstream
//! subscription between several internal consumers.

use crate::subscription::{Subscription, SubscriptionManager};
use keyflow_core::{ChangeSet, Error};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Receives values and the terminal signal from an `Observable`.
pub trait Observer<T>: Send + Sync {
    fn on_next(&self, value: &T);

    fn on_error(&self, error: &Error);

    fn on_completed(&self);
}

/// A source of values that observers can subscribe to.
pub trait Observable<T>: Send + Sync {
    /// Registers `observer`. Cancelling the returned handle stops delivery
    /// and releases whatever the subscription acquired.
    fn subscribe(&self, observer: Arc<dyn Observer<T>>) -> Subscription;
}

/// A shared stream of keyed change sets.
pub type ChangeStream<K, V> = Arc<dyn Observable<ChangeSet<K, V>>>;

type NextFn<T> = Box<dyn Fn(&T) + Send + Sync>;
type ErrorFn = Box<dyn Fn(&Error) + Send + Sync>;
type CompletedFn = Box<dyn Fn() + Send + Sync>;

/// An observer assembled from closures.
pub struct CallbackObserver<T> {
    next: NextFn<T>,
    error: Option<ErrorFn>,
    completed: Option<CompletedFn>,
}

impl<T> CallbackObserver<T> {
    /// Creates an observer that only handles values.
    pub fn new<F>(next: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        Self {
            next: Box::new(next),
            error: None,
            completed: None,
        }
    }

    /// Adds an error handler.
    pub fn with_error<F>(mut self, error: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.error = Some(Box::new(error));
        self
    }

    /// Adds a completion handler.
    pub fn with_completed<F>(mut self, completed: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.completed = Some(Box::new(completed));
        self
    }
}

impl<T> Observer<T> for CallbackObserver<T> {
    fn on_next(&self, value: &T) {
        (self.next)(value);
    }

    fn on_error(&self, error: &Error) {
        match &self.error {
            Some(handler) => handler(error),
            None => tracing::debug!(%error, "unhandled terminal error"),
        }
    }

    fn on_completed(&self) {
        if let Some(handler) = &self.completed {
            handler();
        }
    }
}

/// Closure-based subscribe for any observable, including trait objects.
pub trait SubscribeExt<T> {
    /// Subscribes with a value handler only.
    fn subscribe_fn<F>(&self, next: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static;
}

impl<T, O> SubscribeExt<T> for O
where
    T: 'static,
    O: Observable<T> + ?Sized,
{
    fn subscribe_fn<F>(&self, next: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(CallbackObserver::new(next)))
    }
}

enum Terminal {
    Error(Error),
    Completed,
}

struct SubjectState<T> {
    subscriptions: SubscriptionManager<T>,
    terminal: Option<Terminal>,
}

/// A hot, multicasting source.
///
/// Values are delivered outside the subscriber registry lock, so an observer
/// may unsubscribe (or subscribe others) from inside its callback. Once a
/// terminal signal has been sent the subject is inert, and late subscribers
/// immediately receive that terminal signal.
pub struct Subject<T> {
    state: Arc<Mutex<SubjectState<T>>>,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Subject<T> {
    /// Creates a subject with no subscribers.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SubjectState {
                subscriptions: SubscriptionManager::new(),
                terminal: None,
            })),
        }
    }

    /// Delivers a value to every current subscriber.
    pub fn next(&self, value: &T) {
        let targets = {
            let state = self.state.lock();
            if state.terminal.is_some() {
                return;
            }
            state.subscriptions.snapshot()
        };
        for target in targets {
            target.notify(value);
        }
    }

    /// Terminates every subscriber with `error`.
    pub fn error(&self, error: Error) {
        let targets = {
            let mut state = self.state.lock();
            if state.terminal.is_some() {
                return;
            }
            state.terminal = Some(Terminal::Error(error.clone()));
            state.subscriptions.drain()
        };
        for target in targets {
            target.notify_error(&error);
        }
    }

    /// Completes every subscriber.
    pub fn complete(&self) {
        let targets = {
            let mut state = self.state.lock();
            if state.terminal.is_some() {
                return;
            }
            state.terminal = Some(Terminal::Completed);
            state.subscriptions.drain()
        };
        for target in targets {
            target.notify_completed();
        }
    }

    /// Number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    /// Returns true once an error or completion has been sent.
    pub fn is_stopped(&self) -> bool {
        self.state.lock().terminal.is_some()
    }
}

impl<T: 'static> Observable<T> for Subject<T>
where
    T: Send + Sync,
{
    fn subscribe(&self, observer: Arc<dyn Observer<T>>) -> Subscription {
        let mut state = self.state.lock();
        let stopped = state.terminal.as_ref().map(|terminal| match terminal {
            Terminal::Error(error) => Some(error.clone()),
            Terminal::Completed => None,
        });
        if let Some(error) = stopped {
            drop(state);
            match error {
                Some(error) => observer.on_error(&error),
                None => observer.on_completed(),
            }
            return Subscription::empty();
        }

        let id = state.subscriptions.subscribe(observer);
        drop(state);

        let weak: Weak<Mutex<SubjectState<T>>> = Arc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                let removed = state.lock().subscriptions.unsubscribe(id);
                drop(removed);
            }
        })
    }
}

impl<T> Observer<T> for Subject<T>
where
    T: Send + Sync,
{
    fn on_next(&self, value: &T) {
        self.next(value);
    }

    fn on_error(&self, error: &Error) {
        self.error(error.clone());
    }

    fn on_completed(&self) {
        self.complete();
    }
}

/// A multicast view of a source, subscribed upstream only on `connect`.
pub struct Connectable<T> {
    source: Arc<dyn Observable<T>>,
    subject: Subject<T>,
}

/// Shares one upstream subscription between several consumers.
///
/// Subscribe every consumer first, then call [`Connectable::connect`].
pub fn publish<T>(source: Arc<dyn Observable<T>>) -> Connectable<T> {
    Connectable {
        source,
        subject: Subject::new(),
    }
}

impl<T> Connectable<T>
where
    T: Send + Sync + 'static,
{
    /// Subscribes upstream once and starts forwarding to every consumer.
    pub fn connect(&self) -> Subscription {
        self.source.subscribe(Arc::new(self.subject.clone()))
    }
}

impl<T> Observable<T> for Connectable<T>
where
    T: Send + Sync + 'static,
{
    fn subscribe(&self, observer: Arc<dyn Observer<T>>) -> Subscription {
        self.subject.subscribe(observer)
    }
}
