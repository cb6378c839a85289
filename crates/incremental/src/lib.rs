//! Keyflow Incremental - Pure incremental operators for Keyflow.
//!
//! The operators in this crate hold no subscriptions and take no locks; the
//! reactive layer drives them and owns their state.
//!
//! # Operators
//!
//! - `refilter` / `FilteredList`: recompute a filtered projection when the
//!   predicate changes, either by `ClearAndReplace` or by `CalculateDiff`
//! - `partition` / `GroupSnapshot`: full re-partition of members into groups
//!   and the change set of immutable `Group` snapshots since the last one
//!
//! # Example
//!
//! ```rust
//! use keyflow_incremental::{refilter, FilterPolicy, ListChange};
//!
//! let source = vec![('a', 1), ('b', 2), ('c', 3), ('d', 4)];
//! let previous = vec![('a', 1), ('b', 2)];
//!
//! let changes = refilter(FilterPolicy::CalculateDiff, &source, &previous, |v| v % 2 == 0);
//! assert_eq!(
//!     changes,
//!     vec![
//!         ListChange::Remove { item: ('a', 1), index: 0 },
//!         ListChange::Add { item: ('d', 4), index: 1 },
//!     ]
//! );
//! ```

pub mod operators;

pub use operators::{partition, refilter, FilterPolicy, FilteredList, Group, GroupSnapshot, ListChange};
