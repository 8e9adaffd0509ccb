//! Session listener capabilities.
//!
//! Listeners are registered as a tagged [`SessionListener`] so the manager
//! dispatches each event only to the listeners that declared interest.

use std::sync::Arc;

use serde_json::Value;

use super::state::Session;

/// Notified when sessions are created or destroyed.
pub trait SessionLifecycleListener: Send + Sync {
    fn session_created(&self, _session: &Session) {}
    fn session_destroyed(&self, _session: &Session) {}
}

/// Notified when a session's id changes.
pub trait SessionIdListener: Send + Sync {
    fn session_id_changed(&self, session: &Session, old_id: &str);
}

/// Notified when session attributes change.
pub trait SessionAttributeListener: Send + Sync {
    fn attribute_added(&self, _session: &Session, _name: &str, _value: &Value) {}
    fn attribute_replaced(&self, _session: &Session, _name: &str, _old: &Value) {}
    fn attribute_removed(&self, _session: &Session, _name: &str, _old: &Value) {}
}

/// A listener registration.
#[derive(Clone)]
pub enum SessionListener {
    Lifecycle(Arc<dyn SessionLifecycleListener>),
    Id(Arc<dyn SessionIdListener>),
    Attribute(Arc<dyn SessionAttributeListener>),
}

/// Attribute change delivered to attribute listeners.
#[derive(Clone, Copy)]
pub(crate) enum AttributeEvent<'a> {
    Added(&'a Value),
    Replaced(&'a Value),
    Removed(&'a Value),
}

/// Registered listeners, shared between the manager and its sessions.
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: arc_swap::ArcSwap<Vec<SessionListener>>,
}

impl ListenerSet {
    pub(crate) fn add(&self, listener: SessionListener) {
        self.listeners.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(listener.clone());
            next
        });
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.load().len()
    }

    pub(crate) fn created(&self, session: &Session) {
        for listener in self.listeners.load().iter() {
            if let SessionListener::Lifecycle(l) = listener {
                l.session_created(session);
            }
        }
    }

    pub(crate) fn destroyed(&self, session: &Session) {
        for listener in self.listeners.load().iter() {
            if let SessionListener::Lifecycle(l) = listener {
                l.session_destroyed(session);
            }
        }
    }

    pub(crate) fn id_changed(&self, session: &Session, old_id: &str) {
        for listener in self.listeners.load().iter() {
            if let SessionListener::Id(l) = listener {
                l.session_id_changed(session, old_id);
            }
        }
    }

    pub(crate) fn attribute(&self, session: &Session, name: &str, event: AttributeEvent<'_>) {
        for listener in self.listeners.load().iter() {
            if let SessionListener::Attribute(l) = listener {
                match event {
                    AttributeEvent::Added(v) => l.attribute_added(session, name, v),
                    AttributeEvent::Replaced(v) => l.attribute_replaced(session, name, v),
                    AttributeEvent::Removed(v) => l.attribute_removed(session, name, v),
                }
            }
        }
    }
}
