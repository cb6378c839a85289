//! Incremental operators.
//!
//! - Filter: re-evaluates a projection under a new predicate using a `FilterPolicy`
//! - Group: partitions members by a selector and diffs immutable group snapshots

mod filter;
mod group;

pub use filter::{refilter, FilterPolicy, FilteredList, ListChange};
pub use group::{partition, Group, GroupSnapshot};
