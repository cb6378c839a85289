//! Clocks and delayed work.
//!
//! There is no process-wide default scheduler: operators that need time are
//! handed one explicitly. Tests use `VirtualScheduler`, whose clock only moves
//! when told to; production code uses `TokioScheduler`.

use crate::subscription::Subscription;
use keyflow_core::{Error, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// A unit of delayed work.
pub type Work = Box<dyn FnOnce() + Send>;

/// Schedules work after a delay.
pub trait Scheduler: Send + Sync {
    /// Time elapsed since the scheduler's epoch.
    fn now(&self) -> Duration;

    /// Runs `work` once `delay` has elapsed. Cancelling the returned handle
    /// before then prevents it from running.
    fn schedule(&self, delay: Duration, work: Work) -> Subscription;
}

struct VirtualState {
    now: Duration,
    next_seq: u64,
    queue: BTreeMap<(Duration, u64), Work>,
}

/// A deterministic clock for tests.
///
/// Due work runs on the thread that advances the clock, ordered by due time
/// and then by scheduling order.
#[derive(Clone)]
pub struct VirtualScheduler {
    state: Arc<Mutex<VirtualState>>,
}

impl Default for VirtualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualScheduler {
    /// Creates a scheduler whose clock starts at zero.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(VirtualState {
                now: Duration::ZERO,
                next_seq: 0,
                queue: BTreeMap::new(),
            })),
        }
    }

    /// Moves the clock forward by `delta`, running everything that falls due.
    pub fn advance_by(&self, delta: Duration) {
        let target = self.now() + delta;
        self.advance_to(target);
    }

    /// Moves the clock to `target`, running everything due at or before it.
    pub fn advance_to(&self, target: Duration) {
        loop {
            let work = {
                let mut state = self.state.lock();
                match state.queue.first_key_value() {
                    Some((&(due, _), _)) if due <= target => {
                        state.now = state.now.max(due);
                        state.queue.pop_first().map(|(_, work)| work)
                    }
                    _ => {
                        state.now = state.now.max(target);
                        None
                    }
                }
            };
            match work {
                Some(work) => work(),
                None => break,
            }
        }
    }

    /// Number of scheduled, not yet run, work items.
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }
}

impl Scheduler for VirtualScheduler {
    fn now(&self) -> Duration {
        self.state.lock().now
    }

    fn schedule(&self, delay: Duration, work: Work) -> Subscription {
        let slot = {
            let mut state = self.state.lock();
            let slot = (state.now + delay, state.next_seq);
            state.next_seq += 1;
            state.queue.insert(slot, work);
            slot
        };

        let weak: Weak<Mutex<VirtualState>> = Arc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                // Dropped after the lock is released.
                let cancelled = state.lock().queue.remove(&slot);
                drop(cancelled);
            }
        })
    }
}

/// A real-time scheduler backed by a tokio runtime.
#[derive(Clone)]
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
    epoch: Instant,
}

impl TokioScheduler {
    /// Creates a scheduler that spawns onto `handle`.
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self {
            handle,
            epoch: Instant::now(),
        }
    }

    /// Uses the runtime the caller is running on.
    pub fn current() -> Result<Self> {
        tokio::runtime::Handle::try_current()
            .map(Self::new)
            .map_err(|e| Error::invalid_argument(format!("no tokio runtime available: {}", e)))
    }
}

impl Scheduler for TokioScheduler {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn schedule(&self, delay: Duration, work: Work) -> Subscription {
        let task = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            work();
        });
        Subscription::new(move || task.abort())
    }
}

struct ThrottleState {
    generation: u64,
    pending: Option<Subscription>,
}

/// Trailing-edge coalescing of triggers.
///
/// Every trigger restarts the window; `action` runs once a full window passes
/// with no further trigger.
pub struct Throttle {
    window: Duration,
    scheduler: Arc<dyn Scheduler>,
    action: Arc<dyn Fn() + Send + Sync>,
    state: Mutex<ThrottleState>,
    closed: AtomicBool,
    this: Weak<Throttle>,
}

impl Throttle {
    /// Creates a throttle. A zero window is rejected.
    pub fn new<F>(window: Duration, scheduler: Arc<dyn Scheduler>, action: F) -> Result<Arc<Self>>
    where
        F: Fn() + Send + Sync + 'static,
    {
        if window.is_zero() {
            return Err(Error::invalid_argument("throttle window must be greater than zero"));
        }
        Ok(Arc::new_cyclic(|this| Self {
            window,
            scheduler,
            action: Arc::new(action),
            state: Mutex::new(ThrottleState {
                generation: 0,
                pending: None,
            }),
            closed: AtomicBool::new(false),
            this: this.clone(),
        }))
    }

    /// Returns the coalescing window.
    #[inline]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Restarts the window.
    pub fn trigger(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        let replaced = {
            let mut state = self.state.lock();
            state.generation += 1;
            let generation = state.generation;
            let this = self.this.clone();
            let work: Work = Box::new(move || {
                if let Some(throttle) = this.upgrade() {
                    throttle.fire(generation);
                }
            });
            let scheduled = self.scheduler.schedule(self.window, work);
            state.pending.replace(scheduled)
        };
        // Cancels the superseded window outside the lock.
        drop(replaced);
    }

    fn fire(&self, generation: u64) {
        let finished = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.pending.take()
        };
        drop(finished);

        if !self.closed.load(Ordering::Acquire) {
            tracing::trace!(window = ?self.window, "throttle window elapsed");
            (self.action)();
        }
    }

    /// Cancels any pending window and ignores further triggers.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let pending = self.state.lock().pending.take();
        drop(pending);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_virtual_runs_due_work_in_order() {
        let scheduler = VirtualScheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let _subs: Vec<Subscription> = [(30, 'c'), (10, 'a'), (20, 'b'), (10, 'd')]
            .into_iter()
            .map(|(delay, tag)| {
                let order = Arc::clone(&order);
                scheduler.schedule(ms(delay), Box::new(move || order.lock().push(tag)))
            })
            .collect();

        scheduler.advance_by(ms(15));
        assert_eq!(*order.lock(), vec!['a', 'd']);
        assert_eq!(scheduler.now(), ms(15));

        scheduler.advance_by(ms(100));
        assert_eq!(*order.lock(), vec!['a', 'd', 'b', 'c']);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_virtual_cancel() {
        let scheduler = VirtualScheduler::new();
        let (count, action) = counter();
        let sub = scheduler.schedule(ms(10), Box::new(action));
        assert_eq!(scheduler.pending(), 1);

        sub.unsubscribe();
        assert_eq!(scheduler.pending(), 0);
        scheduler.advance_by(ms(20));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_virtual_work_can_schedule_more() {
        let scheduler = VirtualScheduler::new();
        let (count, action) = counter();
        let inner = scheduler.clone();
        let action = Arc::new(action);
        let held: Arc<Mutex<Vec<Subscription>>> = Arc::new(Mutex::new(Vec::new()));
        let held_clone = Arc::clone(&held);
        let _outer = scheduler.schedule(
            ms(10),
            Box::new(move || {
                let action = Arc::clone(&action);
                let sub = inner.schedule(ms(5), Box::new(move || action()));
                held_clone.lock().push(sub);
            }),
        );

        scheduler.advance_by(ms(20));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_throttle_rejects_zero_window() {
        let scheduler: Arc<dyn Scheduler> = Arc::new(VirtualScheduler::new());
        let result = Throttle::new(Duration::ZERO, scheduler, || {});
        assert!(matches!(result, Err(Error::InvalidArgument { .. })));
    }

    #[test]
    fn test_throttle_coalesces_burst() {
        let scheduler = VirtualScheduler::new();
        let (count, action) = counter();
        let throttle = Throttle::new(ms(100), Arc::new(scheduler.clone()), action).unwrap();

        throttle.trigger();
        scheduler.advance_by(ms(40));
        throttle.trigger();
        scheduler.advance_by(ms(40));
        throttle.trigger();
        assert_eq!(count.load(Ordering::SeqCst), 0);

        scheduler.advance_by(ms(99));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        scheduler.advance_by(ms(1));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_throttle_spaced_triggers_fire_each() {
        let scheduler = VirtualScheduler::new();
        let (count, action) = counter();
        let throttle = Throttle::new(ms(50), Arc::new(scheduler.clone()), action).unwrap();

        for _ in 0..3 {
            throttle.trigger();
            scheduler.advance_by(ms(60));
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_throttle_close_cancels_pending() {
        let scheduler = VirtualScheduler::new();
        let (count, action) = counter();
        let throttle = Throttle::new(ms(50), Arc::new(scheduler.clone()), action).unwrap();

        throttle.trigger();
        throttle.close();
        throttle.trigger();
        scheduler.advance_by(ms(100));

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_tokio_current_requires_runtime() {
        assert!(TokioScheduler::current().is_err());
    }
}
