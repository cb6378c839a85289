//! Field-change notification.
//!
//! Items whose grouping value can change in place implement
//! [`NotifyFieldChanged`]. Most do so by embedding a [`FieldNotifier`] and
//! calling [`FieldNotifier::notify`] from their setters.

use crate::subscription::{Subscription, SubscriptionId};
use core::fmt;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Identifies one observable field of an item type.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldId(&'static str);

impl FieldId {
    /// Creates a field id from its name.
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Returns the field name.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Debug for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldId({})", self.0)
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Invoked after a watched field changed.
pub type FieldCallback = Arc<dyn Fn() + Send + Sync>;

/// Items that can report changes to individual fields.
pub trait NotifyFieldChanged {
    /// Calls `callback` after every later change of `field` on this item,
    /// until the returned handle is cancelled.
    fn watch_field(&self, field: FieldId, callback: FieldCallback) -> Subscription;
}

impl<T: NotifyFieldChanged + ?Sized> NotifyFieldChanged for Arc<T> {
    fn watch_field(&self, field: FieldId, callback: FieldCallback) -> Subscription {
        (**self).watch_field(field, callback)
    }
}

/// A field together with a typed accessor reading it.
///
/// Exactly one field is watched. The accessor should read only that field;
/// changes to anything else it reads are not observed.
pub struct FieldWatch<V, G> {
    field: FieldId,
    accessor: Arc<dyn Fn(&V) -> G + Send + Sync>,
}

impl<V, G> Clone for FieldWatch<V, G> {
    fn clone(&self) -> Self {
        Self {
            field: self.field,
            accessor: Arc::clone(&self.accessor),
        }
    }
}

impl<V, G> FieldWatch<V, G> {
    /// Pairs `field` with the accessor that reads it.
    pub fn new<F>(field: FieldId, accessor: F) -> Self
    where
        F: Fn(&V) -> G + Send + Sync + 'static,
    {
        Self {
            field,
            accessor: Arc::new(accessor),
        }
    }

    /// Returns the watched field.
    #[inline]
    pub fn field(&self) -> FieldId {
        self.field
    }

    /// Reads the field's current value from `item`.
    #[inline]
    pub fn select(&self, item: &V) -> G {
        (self.accessor)(item)
    }
}

struct NotifierState {
    next_id: SubscriptionId,
    watchers: HashMap<SubscriptionId, (FieldId, FieldCallback)>,
}

/// Per-item registry of field watchers.
///
/// Callbacks run synchronously on the thread calling `notify`, outside the
/// registry lock. Call `notify` after releasing any lock that protects the
/// field itself, since a watcher usually reads the new value.
#[derive(Clone)]
pub struct FieldNotifier {
    state: Arc<Mutex<NotifierState>>,
}

impl Default for FieldNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FieldNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldNotifier")
            .field("watchers", &self.watcher_count())
            .finish()
    }
}

impl FieldNotifier {
    /// Creates a notifier with no watchers.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(NotifierState {
                next_id: 1,
                watchers: HashMap::new(),
            })),
        }
    }

    /// Registers `callback` for `field`.
    pub fn watch(&self, field: FieldId, callback: FieldCallback) -> Subscription {
        let id = {
            let mut state = self.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.watchers.insert(id, (field, callback));
            id
        };

        let weak: Weak<Mutex<NotifierState>> = Arc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                let removed = state.lock().watchers.remove(&id);
                drop(removed);
            }
        })
    }

    /// Runs every callback watching `field`.
    pub fn notify(&self, field: FieldId) {
        let callbacks: Vec<FieldCallback> = self
            .state
            .lock()
            .watchers
            .values()
            .filter(|(watched, _)| *watched == field)
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback();
        }
    }

    /// Returns the number of registered watchers.
    pub fn watcher_count(&self) -> usize {
        self.state.lock().watchers.len()
    }
}
