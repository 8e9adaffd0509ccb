//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the engine.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::session::cookie::{SessionCookieConfig, TrackingMode};
use crate::session::manager::DEFAULT_SESSION_TIMEOUT_MINUTES;
use crate::webapp::request::DispatchType;

/// Root configuration for the engine.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request size limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Session sweeper settings.
    pub sessions: SessionsConfig,

    /// Deployed applications.
    pub applications: Vec<ApplicationConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Keep HTTP/1.1 connections open between requests.
    pub keep_alive: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
            keep_alive: true,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total request timeout in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Request size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum request body size in bytes.
    pub max_body_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_size: 10 * 1024 * 1024,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Serve the admin API.
    pub enabled: bool,

    /// Bearer token required on every admin request.
    pub api_key: String,

    /// Admin listener address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Session sweeper configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Seconds between idle-session sweeps.
    pub sweep_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
        }
    }
}

/// One deployed application.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name for logging/metrics.
    pub name: String,

    /// Context path ("/" or "" for the root application).
    pub context_path: String,

    /// Virtual hosts; empty serves every host.
    pub hosts: Vec<String>,

    /// Context init parameters.
    pub init_params: BTreeMap<String, String>,

    /// Welcome files tried for directory-style paths.
    pub welcome_files: Vec<String>,

    /// Declared security roles.
    pub roles: Vec<String>,

    /// Extra extension → MIME type entries.
    pub mime_types: BTreeMap<String, String>,

    /// Error-page table.
    pub error_pages: Vec<ErrorPageConfig>,

    /// Session settings.
    pub session: SessionConfig,

    /// Handler registrations, in registration order.
    pub handlers: Vec<HandlerConfig>,

    /// Filter registrations, in registration order.
    pub filters: Vec<FilterConfig>,
}

/// Error page keyed by status code or fault type.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorPageConfig {
    /// HTTP status that selects this page.
    #[serde(default)]
    pub status: Option<u16>,

    /// Fault type that selects this page ("status", "failed", "io", "engine", "panic").
    #[serde(default)]
    pub fault: Option<String>,

    /// Context-relative location of the error handler.
    pub location: String,
}

/// Per-application session settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle timeout in minutes.
    pub timeout_minutes: u64,

    /// Tracking modes; SSL must not be combined with others.
    pub tracking_modes: Vec<TrackingMode>,

    /// Tracking cookie attributes.
    pub cookie: SessionCookieConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: DEFAULT_SESSION_TIMEOUT_MINUTES,
            tracking_modes: vec![TrackingMode::Cookie],
            cookie: SessionCookieConfig::default(),
        }
    }
}

/// Handler registration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HandlerConfig {
    /// Unique handler name within the application.
    pub name: String,

    /// Class reference realized by the instantiator.
    pub class: String,

    /// URL patterns mapped to this handler.
    #[serde(default)]
    pub patterns: Vec<String>,

    #[serde(default)]
    pub init_params: BTreeMap<String, String>,

    /// Startup priority; negative realizes lazily.
    #[serde(default = "default_load_on_startup")]
    pub load_on_startup: i32,

    #[serde(default)]
    pub async_supported: bool,
}

fn default_load_on_startup() -> i32 {
    -1
}

/// Filter registration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilterConfig {
    /// Unique filter name within the application.
    pub name: String,

    /// Class reference realized by the instantiator.
    pub class: String,

    #[serde(default)]
    pub init_params: BTreeMap<String, String>,

    #[serde(default)]
    pub async_supported: bool,

    /// Mappings, in order.
    #[serde(default)]
    pub mappings: Vec<FilterMappingConfig>,
}

/// One filter mapping.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FilterMappingConfig {
    pub url_patterns: Vec<String>,

    /// Handler names; "*" matches every handler.
    pub handler_names: Vec<String>,

    /// Dispatch types; empty means direct requests only.
    pub dispatch_types: Vec<DispatchType>,

    /// Place after every "before" mapping of the application.
    pub match_after: bool,
}
