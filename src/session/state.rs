//! A single server-side session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

use serde_json::Value;

use super::listener::{AttributeEvent, ListenerSet};

struct Activity {
    last_accessed: Instant,
    last_accessed_at: SystemTime,
    attributes: HashMap<String, Value>,
    valid: bool,
    is_new: bool,
}

/// Session state owned by the session store.
///
/// Requests hold `Arc<Session>` handles but never own the entry; removal from
/// the store (invalidate, idle expiry, application stop) marks it invalid.
pub struct Session {
    id: Mutex<String>,
    created_at: SystemTime,
    max_inactive: Duration,
    activity: Mutex<Activity>,
    listeners: Arc<ListenerSet>,
}

impl Session {
    pub(crate) fn new(id: String, max_inactive: Duration, listeners: Arc<ListenerSet>) -> Self {
        let now = SystemTime::now();
        Self {
            id: Mutex::new(id),
            created_at: now,
            max_inactive,
            activity: Mutex::new(Activity {
                last_accessed: Instant::now(),
                last_accessed_at: now,
                attributes: HashMap::new(),
                valid: true,
                is_new: true,
            }),
            listeners,
        }
    }

    pub fn id(&self) -> String {
        lock(&self.id).clone()
    }

    /// Lock the id slot; held while the store entry is swapped or removed.
    pub(crate) fn id_slot(&self) -> MutexGuard<'_, String> {
        lock(&self.id)
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn last_accessed_at(&self) -> SystemTime {
        lock(&self.activity).last_accessed_at
    }

    pub fn max_inactive_interval(&self) -> Duration {
        self.max_inactive
    }

    pub fn is_valid(&self) -> bool {
        lock(&self.activity).valid
    }

    /// True until the first request after creation touches the session.
    pub fn is_new(&self) -> bool {
        lock(&self.activity).is_new
    }

    pub(crate) fn touch(&self) {
        let mut activity = lock(&self.activity);
        activity.last_accessed = Instant::now();
        activity.last_accessed_at = SystemTime::now();
        activity.is_new = false;
    }

    pub(crate) fn is_idle(&self, now: Instant) -> bool {
        let activity = lock(&self.activity);
        now.saturating_duration_since(activity.last_accessed) > self.max_inactive
    }

    pub(crate) fn mark_invalid(&self) {
        lock(&self.activity).valid = false;
    }

    pub fn attribute(&self, name: &str) -> Option<Value> {
        lock(&self.activity).attributes.get(name).cloned()
    }

    pub fn attribute_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.activity).attributes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Set an attribute and notify attribute listeners.
    pub fn set_attribute(&self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        let previous = lock(&self.activity)
            .attributes
            .insert(name.to_string(), value.clone());
        match previous {
            Some(old) => self
                .listeners
                .attribute(self, name, AttributeEvent::Replaced(&old)),
            None => self
                .listeners
                .attribute(self, name, AttributeEvent::Added(&value)),
        }
    }

    pub fn remove_attribute(&self, name: &str) -> Option<Value> {
        let removed = lock(&self.activity).attributes.remove(name);
        if let Some(old) = &removed {
            self.listeners
                .attribute(self, name, AttributeEvent::Removed(old));
        }
        removed
    }

    /// Atomically update an attribute under the session lock.
    ///
    /// Listeners are not notified; use for counters and similar read-modify-write.
    pub fn update_attribute<F>(&self, name: &str, f: F) -> Value
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        let mut activity = lock(&self.activity);
        let next = f(activity.attributes.get(name));
        activity.attributes.insert(name.to_string(), next.clone());
        next
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("valid", &self.is_valid())
            .finish_non_exhaustive()
    }
}

// Poisoned locks are recovered; session data stays readable after a handler panic.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
