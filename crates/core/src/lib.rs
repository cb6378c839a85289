//! Keyflow Core - Change-set model and keyed mirror store.
//!
//! This crate provides the vocabulary every Keyflow operator speaks:
//!
//! - `Change`/`ChangeReason`: one keyed mutation (add, update, remove, refresh, moved)
//! - `ChangeSet`: an immutable, ordered batch of changes with aggregate counts
//! - `Cache`: the keyed mirror store operators use to replay change sets
//! - `KeyComparer`/`KeyedEntry`: equality and hashing of entries by key only
//! - `Error`: the error taxonomy shared by all crates
//!
//! # Example
//!
//! ```rust
//! use keyflow_core::{Cache, Change, ChangeSet};
//!
//! let mut cache = Cache::new();
//! let changes = ChangeSet::new(vec![
//!     Change::add(1, "alice"),
//!     Change::add(2, "bob"),
//!     Change::remove(1, "alice"),
//! ]);
//! assert_eq!(changes.adds(), 2);
//! assert_eq!(changes.removes(), 1);
//!
//! cache.apply(&changes).unwrap();
//! assert_eq!(cache.len(), 1);
//! assert_eq!(cache.lookup(&2), Some(&"bob"));
//! ```

pub mod cache;
mod change;
mod change_set;
mod error;
pub mod key;

pub use cache::{Cache, MirrorPolicy};
pub use change::{Change, ChangeReason};
pub use change_set::ChangeSet;
pub use error::{Error, Result};
pub use key::{KeyComparer, KeyedEntry};
