//! Keyflow Reactive - push-based operators over keyed change streams.
//!
//! This crate carries change sets from a source to subscribers and provides
//! the stateful operators that sit in between.
//!
//! # Core Concepts
//!
//! - `Observable` / `Observer`: synchronous push transport with a terminal
//!   error or completion signal
//! - `Subscription`: idempotent cancellation handle, also cancelled on drop
//! - `SourceCache`: an editable keyed collection that publishes its edits
//! - `OnBeingRemoved`: runs a release action exactly once per departing item
//! - `GroupOnProperty`: groups items by a field and regroups when the field
//!   changes in place, optionally coalesced through a `Scheduler`
//!
//! # Example
//!
//! ```
//! use keyflow_reactive::{ChangeSet, ChangeStreamExt, SourceCache, SubscribeExt};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let files: SourceCache<u32, String> = SourceCache::new();
//! let closed = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&closed);
//!
//! let sub = files
//!     .connect()
//!     .on_item_removed(move |_: &String| {
//!         counter.fetch_add(1, Ordering::SeqCst);
//!     })
//!     .subscribe_fn(|changes: &ChangeSet<u32, String>| {
//!         assert!(!changes.is_empty());
//!     });
//!
//! files.add_or_update(1, "a.log".into()).unwrap();
//! files.add_or_update(2, "b.log".into()).unwrap();
//! files.remove(&1).unwrap();
//! assert_eq!(closed.load(Ordering::SeqCst), 1);
//!
//! // Items still present are released when the subscription ends.
//! sub.unsubscribe();
//! assert_eq!(closed.load(Ordering::SeqCst), 2);
//! ```

mod callback;
pub mod ext;
pub mod field;
pub mod lifecycle;
pub mod observable;
pub mod regroup;
pub mod scheduler;
pub mod source_cache;
pub mod subscription;

pub use ext::ChangeStreamExt;
pub use field::{FieldCallback, FieldId, FieldNotifier, FieldWatch, NotifyFieldChanged};
pub use lifecycle::{OnBeingRemoved, ReleaseFn};
pub use observable::{publish, CallbackObserver, ChangeStream, Connectable, Observable, Observer, Subject, SubscribeExt};
pub use regroup::{GroupChangeSet, GroupOnProperty};
pub use scheduler::{Scheduler, Throttle, TokioScheduler, VirtualScheduler, Work};
pub use source_cache::{CacheUpdater, SourceCache};
pub use subscription::{Subscription, SubscriptionId};

// Re-export commonly used types from dependencies
pub use keyflow_core::{Change, ChangeReason, ChangeSet, Error, MirrorPolicy, Result};
pub use keyflow_incremental::Group;
