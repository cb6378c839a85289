//! A single keyed mutation record.
//!
//! `current` is always populated: for a `Remove` it carries the item that was
//! removed. `previous` is only ever set for an `Update`.

use crate::error::{Error, Result};

/// Why a change was produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeReason {
    /// An item was added.
    Add,
    /// An item was replaced by a new value under the same key.
    Update,
    /// An item was removed.
    Remove,
    /// Downstream should re-evaluate the item; the value is unchanged.
    Refresh,
    /// The item changed position. Only meaningful for ordered collections.
    Moved,
}

/// One mutation to a keyed collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Change<K, V> {
    reason: ChangeReason,
    key: K,
    current: V,
    previous: Option<V>,
}

impl<K, V> Change<K, V> {
    /// Creates a change, validating that `previous` is supplied exactly when
    /// the reason is `Update`.
    pub fn new(reason: ChangeReason, key: K, current: V, previous: Option<V>) -> Result<Self> {
        match (reason, previous.is_some()) {
            (ChangeReason::Update, false) => {
                Err(Error::invalid_argument("an update change requires a previous value"))
            }
            (ChangeReason::Update, true) => Ok(Self { reason, key, current, previous }),
            (_, true) => Err(Error::invalid_argument(
                "a previous value is only valid for an update change",
            )),
            (_, false) => Ok(Self { reason, key, current, previous }),
        }
    }

    /// Creates an add change.
    #[inline]
    pub fn add(key: K, current: V) -> Self {
        Self { reason: ChangeReason::Add, key, current, previous: None }
    }

    /// Creates an update change.
    #[inline]
    pub fn update(key: K, current: V, previous: V) -> Self {
        Self {
            reason: ChangeReason::Update,
            key,
            current,
            previous: Some(previous),
        }
    }

    /// Creates a remove change carrying the removed item.
    #[inline]
    pub fn remove(key: K, removed: V) -> Self {
        Self { reason: ChangeReason::Remove, key, current: removed, previous: None }
    }

    /// Creates a refresh change.
    #[inline]
    pub fn refresh(key: K, current: V) -> Self {
        Self { reason: ChangeReason::Refresh, key, current, previous: None }
    }

    /// Creates a moved change.
    #[inline]
    pub fn moved(key: K, current: V) -> Self {
        Self { reason: ChangeReason::Moved, key, current, previous: None }
    }

    /// Returns the change reason.
    #[inline]
    pub fn reason(&self) -> ChangeReason {
        self.reason
    }

    /// Returns the key of the changed item.
    #[inline]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// The item after the change, or the removed item for a `Remove`.
    #[inline]
    pub fn current(&self) -> &V {
        &self.current
    }

    /// The item before the change. Only `Some` for an `Update`.
    #[inline]
    pub fn previous(&self) -> Option<&V> {
        self.previous.as_ref()
    }

    /// Splits the change into its parts.
    pub fn into_parts(self) -> (ChangeReason, K, V, Option<V>) {
        (self.reason, self.key, self.current, self.previous)
    }
}
