//! Session tracking configuration and the tracking cookie.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::webapp::error::EngineError;

pub const DEFAULT_COOKIE_NAME: &str = "JSESSIONID";

/// How a session id travels between client and server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrackingMode {
    Cookie,
    Url,
    Ssl,
}

/// Reject tracking-mode sets that combine SSL with anything else.
pub fn validate_tracking_modes(modes: &BTreeSet<TrackingMode>) -> Result<(), EngineError> {
    if modes.contains(&TrackingMode::Ssl) && modes.len() > 1 {
        return Err(EngineError::InvalidArgument(
            "SSL tracking mode cannot be combined with other modes".to_string(),
        ));
    }
    Ok(())
}

/// Attributes of the session tracking cookie.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionCookieConfig {
    pub name: String,
    pub domain: Option<String>,
    /// Cookie path; the application's context path when unset.
    pub path: Option<String>,
    pub comment: Option<String>,
    /// Max-Age in seconds; a browser-session cookie when unset.
    pub max_age: Option<i64>,
    pub http_only: bool,
    pub secure: bool,
}

impl Default for SessionCookieConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_COOKIE_NAME.to_string(),
            domain: None,
            path: None,
            comment: None,
            max_age: None,
            http_only: false,
            secure: false,
        }
    }
}

impl SessionCookieConfig {
    /// Build the cookie carrying `session_id` for an application at `context_path`.
    pub fn cookie_for(&self, session_id: &str, context_path: &str) -> SessionCookie {
        let path = match &self.path {
            Some(path) => path.clone(),
            None if context_path.is_empty() => "/".to_string(),
            None => context_path.to_string(),
        };
        SessionCookie {
            name: self.name.clone(),
            value: session_id.to_string(),
            path,
            domain: self.domain.clone(),
            max_age: self.max_age,
            http_only: self.http_only,
            secure: self.secure,
        }
    }
}

/// A concrete cookie to emit as `Set-Cookie`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub path: String,
    pub domain: Option<String>,
    pub max_age: Option<i64>,
    pub http_only: bool,
    pub secure: bool,
}

impl SessionCookie {
    pub fn to_header_value(&self) -> String {
        let mut out = format!("{}={}; Path={}", self.name, self.value, self.path);
        if let Some(domain) = &self.domain {
            let _ = write!(out, "; Domain={}", domain);
        }
        if let Some(max_age) = self.max_age {
            let _ = write!(out, "; Max-Age={}", max_age);
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssl_cannot_combine() {
        let only_ssl = BTreeSet::from([TrackingMode::Ssl]);
        assert!(validate_tracking_modes(&only_ssl).is_ok());

        let mixed = BTreeSet::from([TrackingMode::Ssl, TrackingMode::Cookie]);
        assert!(matches!(
            validate_tracking_modes(&mixed),
            Err(EngineError::InvalidArgument(_))
        ));

        let cookie_url = BTreeSet::from([TrackingMode::Cookie, TrackingMode::Url]);
        assert!(validate_tracking_modes(&cookie_url).is_ok());
    }

    #[test]
    fn test_cookie_path_defaults() {
        let config = SessionCookieConfig::default();
        assert_eq!(config.cookie_for("id", "/app").path, "/app");
        assert_eq!(config.cookie_for("id", "").path, "/");

        let config = SessionCookieConfig {
            path: Some("/custom".into()),
            ..SessionCookieConfig::default()
        };
        assert_eq!(config.cookie_for("id", "/app").path, "/custom");
    }

    #[test]
    fn test_header_value_carries_attributes() {
        let config = SessionCookieConfig {
            max_age: Some(1800),
            http_only: true,
            domain: Some("example.com".into()),
            ..SessionCookieConfig::default()
        };
        let value = config.cookie_for("abc", "/app").to_header_value();
        assert_eq!(
            value,
            "JSESSIONID=abc; Path=/app; Domain=example.com; Max-Age=1800; HttpOnly"
        );
    }
}
