//! Per-application session store.
//!
//! # Responsibilities
//! - Create, look up, invalidate and re-key sessions
//! - Issue the tracking cookie on the current response
//! - Fan out lifecycle, id and attribute events to listeners
//! - Expire idle sessions when the sweeper asks
//!
//! # Design Decisions
//! - Store is a sharded `DashMap`; operations on different ids do not contend
//! - Ids are UUID v4 (122 random bits); insertion uses the vacant entry so a
//!   collision retries instead of overwriting
//! - Re-keying and invalidation hold the session's id slot, so they are
//!   atomic with respect to each other on the same session

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::cookie::{validate_tracking_modes, SessionCookieConfig, TrackingMode};
use super::listener::{ListenerSet, SessionListener};
use super::state::Session;
use crate::observability::metrics;
use crate::webapp::error::EngineError;
use crate::webapp::request::{WebRequest, SESSION_PATH_PARAMETER};
use crate::webapp::response::WebResponse;

/// Default idle timeout in minutes.
pub const DEFAULT_SESSION_TIMEOUT_MINUTES: u64 = 10;

#[derive(Debug, Clone)]
struct ManagerSettings {
    cookie: SessionCookieConfig,
    tracking_modes: BTreeSet<TrackingMode>,
    timeout: Duration,
}

/// Session manager for one application.
pub struct SessionManager {
    context_path: String,
    sessions: DashMap<String, Arc<Session>>,
    settings: ArcSwap<ManagerSettings>,
    listeners: Arc<ListenerSet>,
}

impl SessionManager {
    pub fn new(context_path: impl Into<String>) -> Self {
        Self {
            context_path: context_path.into(),
            sessions: DashMap::new(),
            settings: ArcSwap::from_pointee(ManagerSettings {
                cookie: SessionCookieConfig::default(),
                tracking_modes: BTreeSet::from([TrackingMode::Cookie]),
                timeout: Duration::from_secs(DEFAULT_SESSION_TIMEOUT_MINUTES * 60),
            }),
            listeners: Arc::new(ListenerSet::default()),
        }
    }

    pub fn cookie_config(&self) -> SessionCookieConfig {
        self.settings.load().cookie.clone()
    }

    pub fn set_cookie_config(&self, cookie: SessionCookieConfig) {
        self.settings.rcu(|current| ManagerSettings {
            cookie: cookie.clone(),
            ..ManagerSettings::clone(current)
        });
    }

    pub fn tracking_modes(&self) -> BTreeSet<TrackingMode> {
        self.settings.load().tracking_modes.clone()
    }

    /// Replace the tracking-mode set; SSL must stand alone.
    pub fn set_tracking_modes(&self, modes: BTreeSet<TrackingMode>) -> Result<(), EngineError> {
        validate_tracking_modes(&modes)?;
        self.settings.rcu(|current| ManagerSettings {
            tracking_modes: modes.clone(),
            ..ManagerSettings::clone(current)
        });
        Ok(())
    }

    pub fn session_timeout(&self) -> Duration {
        self.settings.load().timeout
    }

    pub fn set_session_timeout_minutes(&self, minutes: u64) {
        self.settings.rcu(|current| ManagerSettings {
            timeout: Duration::from_secs(minutes * 60),
            ..ManagerSettings::clone(current)
        });
    }

    pub fn add_listener(&self, listener: SessionListener) {
        self.listeners.add(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Create a session, bind it to `request` and issue the tracking cookie.
    pub fn create(&self, request: &mut WebRequest, response: &mut WebResponse) -> Arc<Session> {
        let settings = self.settings.load();
        let session = self.insert_new(|id| {
            Arc::new(Session::new(
                id.to_string(),
                settings.timeout,
                Arc::clone(&self.listeners),
            ))
        });
        let id = session.id();

        request.session_id = Some(id.clone());
        self.issue_cookie(&settings, &id, response);

        tracing::debug!(
            request_id = %request.request_id(),
            context_path = %self.context_path,
            "Session created"
        );
        metrics::record_session_event("created");
        metrics::set_active_sessions(&self.context_path, self.sessions.len());

        self.listeners.created(&session);
        session
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove `session` from the store and fire destruction listeners.
    ///
    /// Returns false when the session was already gone.
    pub fn invalidate(&self, session: &Arc<Session>) -> bool {
        let removed = {
            let id = session.id_slot();
            self.sessions
                .remove_if(id.as_str(), |_, stored| Arc::ptr_eq(stored, session))
                .is_some()
        };
        if removed {
            self.finish_destroy(session, "invalidated");
        }
        removed
    }

    /// Move the request's session to a fresh id.
    ///
    /// # Returns
    /// The new id, or `SessionState` when the request has no active session.
    /// Nothing is mutated on failure.
    pub fn regenerate_id(
        &self,
        request: &mut WebRequest,
        response: &mut WebResponse,
    ) -> Result<String, EngineError> {
        let session = request
            .session_id()
            .and_then(|id| self.lookup(id))
            .ok_or_else(|| EngineError::SessionState("no session active".to_string()))?;

        let (old_id, new_id) = {
            let mut id_slot = session.id_slot();
            if !self.sessions.contains_key(id_slot.as_str()) {
                return Err(EngineError::SessionState("no session active".to_string()));
            }
            let old_id = id_slot.clone();
            let new_id = loop {
                let candidate = new_session_id();
                if let Entry::Vacant(vacant) = self.sessions.entry(candidate.clone()) {
                    vacant.insert(Arc::clone(&session));
                    break candidate;
                }
            };
            *id_slot = new_id.clone();
            self.sessions.remove(&old_id);
            (old_id, new_id)
        };

        request.session_id = Some(new_id.clone());
        let settings = self.settings.load();
        self.issue_cookie(&settings, &new_id, response);

        tracing::debug!(
            request_id = %request.request_id(),
            context_path = %self.context_path,
            "Session id regenerated"
        );
        metrics::record_session_event("regenerated");

        self.listeners.id_changed(&session, &old_id);
        Ok(new_id)
    }

    /// Remove every session idle longer than its timeout as of `now`.
    ///
    /// # Returns
    /// Number of sessions expired.
    pub fn expire_idle(&self, now: Instant) -> usize {
        let idle: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_idle(now))
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut expired = 0;
        for session in idle {
            let removed = {
                let id = session.id_slot();
                self.sessions
                    .remove_if(id.as_str(), |_, stored| {
                        Arc::ptr_eq(stored, &session) && stored.is_idle(now)
                    })
                    .is_some()
            };
            if removed {
                self.finish_destroy(&session, "expired");
                expired += 1;
            }
        }
        if expired > 0 {
            tracing::info!(
                context_path = %self.context_path,
                expired,
                "Expired idle sessions"
            );
        }
        expired
    }

    /// Invalidate every session; used when the application stops.
    pub fn invalidate_all(&self) -> usize {
        let all: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        all.iter().filter(|s| self.invalidate(s)).count()
    }

    /// Rewrite `url` to carry the session id when URL tracking is needed.
    ///
    /// The id is appended only when URL tracking is enabled and the request's
    /// session was not presented through a cookie.
    pub fn encode_url(&self, request: &WebRequest, url: &str) -> String {
        let settings = self.settings.load();
        if !settings.tracking_modes.contains(&TrackingMode::Url) {
            return url.to_string();
        }
        let Some(id) = request.session_id() else {
            return url.to_string();
        };
        if request.is_requested_session_id_from_cookie()
            && request.requested_session_id() == Some(id)
        {
            return url.to_string();
        }
        let (path, rest) = match url.find(['?', '#']) {
            Some(idx) => url.split_at(idx),
            None => (url, ""),
        };
        format!("{};{}={}{}", path, SESSION_PATH_PARAMETER, id, rest)
    }

    fn insert_new<F>(&self, build: F) -> Arc<Session>
    where
        F: Fn(&str) -> Arc<Session>,
    {
        loop {
            let id = new_session_id();
            if let Entry::Vacant(vacant) = self.sessions.entry(id.clone()) {
                let session = build(&id);
                vacant.insert(Arc::clone(&session));
                return session;
            }
        }
    }

    fn issue_cookie(&self, settings: &ManagerSettings, id: &str, response: &mut WebResponse) {
        if !settings.tracking_modes.contains(&TrackingMode::Cookie) {
            return;
        }
        let cookie = settings.cookie.cookie_for(id, &self.context_path);
        if let Err(e) = response.add_session_cookie(&cookie) {
            tracing::warn!(error = %e, "Failed to add session cookie");
        }
    }

    fn finish_destroy(&self, session: &Session, event: &'static str) {
        session.mark_invalid();
        metrics::record_session_event(event);
        metrics::set_active_sessions(&self.context_path, self.sessions.len());
        self.listeners.destroyed(session);
    }
}

fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::listener::{SessionIdListener, SessionLifecycleListener};
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl SessionLifecycleListener for Recorder {
        fn session_created(&self, session: &Session) {
            self.events.lock().unwrap().push(format!("created:{}", session.id()));
        }
        fn session_destroyed(&self, session: &Session) {
            self.events.lock().unwrap().push(format!("destroyed:{}", session.id()));
        }
    }

    impl SessionIdListener for Recorder {
        fn session_id_changed(&self, session: &Session, old_id: &str) {
            self.events
                .lock()
                .unwrap()
                .push(format!("changed:{}->{}", old_id, session.id()));
        }
    }

    fn request() -> WebRequest {
        WebRequest::new("GET", "/app/x")
    }

    #[test]
    fn test_ten_thousand_unique_ids() {
        let manager = SessionManager::new("/app");
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let mut req = request();
            let mut resp = WebResponse::new();
            let session = manager.create(&mut req, &mut resp);
            assert!(seen.insert(session.id()));
        }
        assert_eq!(manager.active_sessions(), 10_000);
    }

    #[test]
    fn test_create_issues_cookie_with_config() {
        let manager = SessionManager::new("/app");
        manager.set_cookie_config(SessionCookieConfig {
            max_age: Some(1800),
            http_only: true,
            ..SessionCookieConfig::default()
        });
        let mut req = request();
        let mut resp = WebResponse::new();
        let session = manager.create(&mut req, &mut resp);

        let cookie = resp.header("set-cookie").unwrap();
        assert!(cookie.starts_with(&format!("JSESSIONID={}", session.id())));
        assert!(cookie.contains("Max-Age=1800"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Path=/app"));
        assert_eq!(req.session_id(), Some(session.id().as_str()));
    }

    #[test]
    fn test_regenerate_id_moves_entry() {
        let manager = SessionManager::new("/app");
        let recorder = Arc::new(Recorder::default());
        manager.add_listener(SessionListener::Id(recorder.clone()));

        let mut req = request();
        let mut resp = WebResponse::new();
        let session = manager.create(&mut req, &mut resp);
        session.set_attribute("user", "alice");
        let old_id = session.id();

        let new_id = manager.regenerate_id(&mut req, &mut resp).unwrap();
        assert_ne!(old_id, new_id);
        assert!(manager.lookup(&old_id).is_none());

        let found = manager.lookup(&new_id).unwrap();
        assert!(Arc::ptr_eq(&found, &session));
        assert_eq!(found.attribute("user"), Some(serde_json::json!("alice")));
        assert_eq!(
            recorder.events.lock().unwrap().as_slice(),
            &[format!("changed:{}->{}", old_id, new_id)]
        );
    }

    #[test]
    fn test_regenerate_without_session_fails() {
        let manager = SessionManager::new("/app");
        let mut req = request();
        let mut resp = WebResponse::new();
        let err = manager.regenerate_id(&mut req, &mut resp).unwrap_err();
        assert!(matches!(err, EngineError::SessionState(_)));
        assert!(resp.header("set-cookie").is_none());
    }

    #[test]
    fn test_invalidate_fires_destroyed_once() {
        let manager = SessionManager::new("/app");
        let recorder = Arc::new(Recorder::default());
        manager.add_listener(SessionListener::Lifecycle(recorder.clone()));

        let mut req = request();
        let mut resp = WebResponse::new();
        let session = manager.create(&mut req, &mut resp);
        let id = session.id();

        assert!(manager.invalidate(&session));
        assert!(!manager.invalidate(&session));
        assert!(!session.is_valid());
        assert!(manager.lookup(&id).is_none());

        let events = recorder.events.lock().unwrap();
        assert_eq!(events.as_slice(), &[format!("created:{id}"), format!("destroyed:{id}")]);
    }

    #[test]
    fn test_expire_idle() {
        let manager = SessionManager::new("/app");
        manager.set_session_timeout_minutes(1);
        let mut req = request();
        let mut resp = WebResponse::new();
        manager.create(&mut req, &mut resp);

        assert_eq!(manager.expire_idle(Instant::now()), 0);
        assert_eq!(manager.expire_idle(Instant::now() + Duration::from_secs(61)), 1);
        assert_eq!(manager.active_sessions(), 0);
    }

    #[test]
    fn test_encode_url_only_with_url_tracking() {
        let manager = SessionManager::new("/app");
        let mut req = request();
        let mut resp = WebResponse::new();
        let session = manager.create(&mut req, &mut resp);

        assert_eq!(manager.encode_url(&req, "/app/next?a=1"), "/app/next?a=1");

        manager
            .set_tracking_modes(BTreeSet::from([TrackingMode::Cookie, TrackingMode::Url]))
            .unwrap();
        assert_eq!(
            manager.encode_url(&req, "/app/next?a=1"),
            format!("/app/next;jsessionid={}?a=1", session.id())
        );
    }

    #[test]
    fn test_url_only_tracking_sets_no_cookie() {
        let manager = SessionManager::new("/app");
        manager
            .set_tracking_modes(BTreeSet::from([TrackingMode::Url]))
            .unwrap();
        let mut req = request();
        let mut resp = WebResponse::new();
        manager.create(&mut req, &mut resp);
        assert!(resp.header("set-cookie").is_none());
    }

    #[test]
    fn test_concurrent_creates_do_not_collide() {
        let manager = Arc::new(SessionManager::new("/app"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                std::thread::spawn(move || {
                    (0..500)
                        .map(|_| {
                            let mut req = WebRequest::new("GET", "/app");
                            let mut resp = WebResponse::new();
                            manager.create(&mut req, &mut resp).id()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(ids.insert(id));
            }
        }
        assert_eq!(manager.active_sessions(), 4_000);
    }
}
