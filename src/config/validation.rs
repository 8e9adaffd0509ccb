//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (filter mappings name existing handlers)
//! - Validate value ranges and address syntax
//! - Detect conflicting context paths, names and patterns
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: EngineConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::SocketAddr;

use crate::config::schema::{ApplicationConfig, EngineConfig};
use crate::routing::matcher::UrlPattern;
use crate::session::cookie::validate_tracking_modes;

/// A single semantic problem, located by its field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &EngineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new(
            "listener.max_connections",
            "must be greater than zero",
        ));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new(
            "timeouts.request_secs",
            "must be greater than zero",
        ));
    }
    if config.limits.max_body_size == 0 {
        errors.push(ValidationError::new(
            "limits.max_body_size",
            "must be greater than zero",
        ));
    }
    if config.sessions.sweep_interval_secs == 0 {
        errors.push(ValidationError::new(
            "sessions.sweep_interval_secs",
            "must be greater than zero",
        ));
    }
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }
    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new(
                "admin.api_key",
                "must be set when the admin API is enabled",
            ));
        }
    }

    let mut deployments: HashSet<(String, BTreeSet<String>)> = HashSet::new();
    for (i, app) in config.applications.iter().enumerate() {
        let prefix = format!("applications[{}]", i);
        validate_application(&mut errors, &prefix, app);

        let context = app.context_path.trim_end_matches('/').to_string();
        let hosts: BTreeSet<String> = app.hosts.iter().map(|h| h.to_ascii_lowercase()).collect();
        if !deployments.insert((context, hosts)) {
            errors.push(ValidationError::new(
                format!("{}.context_path", prefix),
                format!("'{}' is already deployed for the same hosts", app.context_path),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_application(errors: &mut Vec<ValidationError>, prefix: &str, app: &ApplicationConfig) {
    if app.name.is_empty() {
        errors.push(ValidationError::new(format!("{}.name", prefix), "must not be empty"));
    }
    let ctx = &app.context_path;
    if !(ctx.is_empty() || ctx.starts_with('/')) || ctx.contains('*') || ctx.contains('?') {
        errors.push(ValidationError::new(
            format!("{}.context_path", prefix),
            format!("'{}' must be empty or an absolute path without wildcards", ctx),
        ));
    }

    let modes: BTreeSet<_> = app.session.tracking_modes.iter().copied().collect();
    if let Err(e) = validate_tracking_modes(&modes) {
        errors.push(ValidationError::new(
            format!("{}.session.tracking_modes", prefix),
            e.to_string(),
        ));
    }

    let mut handler_names = HashSet::new();
    let mut pattern_owner: HashMap<&str, &str> = HashMap::new();
    for (j, handler) in app.handlers.iter().enumerate() {
        let field = format!("{}.handlers[{}]", prefix, j);
        if handler.name.is_empty() {
            errors.push(ValidationError::new(format!("{}.name", field), "must not be empty"));
        } else if !handler_names.insert(handler.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.name", field),
                format!("duplicate handler '{}'", handler.name),
            ));
        }
        for pattern in &handler.patterns {
            if let Err(e) = UrlPattern::parse(pattern) {
                errors.push(ValidationError::new(format!("{}.patterns", field), e.to_string()));
                continue;
            }
            match pattern_owner.get(pattern.as_str()) {
                Some(owner) if *owner != handler.name => {
                    errors.push(ValidationError::new(
                        format!("{}.patterns", field),
                        format!("'{}' is already mapped to handler '{}'", pattern, owner),
                    ));
                }
                _ => {
                    pattern_owner.insert(pattern, &handler.name);
                }
            }
        }
    }

    let mut filter_names = HashSet::new();
    for (j, filter) in app.filters.iter().enumerate() {
        let field = format!("{}.filters[{}]", prefix, j);
        if filter.name.is_empty() {
            errors.push(ValidationError::new(format!("{}.name", field), "must not be empty"));
        } else if !filter_names.insert(filter.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.name", field),
                format!("duplicate filter '{}'", filter.name),
            ));
        }
        for (k, mapping) in filter.mappings.iter().enumerate() {
            let mapping_field = format!("{}.mappings[{}]", field, k);
            if mapping.url_patterns.is_empty() && mapping.handler_names.is_empty() {
                errors.push(ValidationError::new(
                    mapping_field.clone(),
                    "needs at least one url pattern or handler name",
                ));
            }
            for pattern in &mapping.url_patterns {
                if let Err(e) = UrlPattern::parse(pattern) {
                    errors.push(ValidationError::new(
                        format!("{}.url_patterns", mapping_field),
                        e.to_string(),
                    ));
                }
            }
            for name in &mapping.handler_names {
                if name != "*" && !handler_names.contains(name.as_str()) {
                    errors.push(ValidationError::new(
                        format!("{}.handler_names", mapping_field),
                        format!("unknown handler '{}'", name),
                    ));
                }
            }
        }
    }

    for (j, page) in app.error_pages.iter().enumerate() {
        let field = format!("{}.error_pages[{}]", prefix, j);
        if page.status.is_none() && page.fault.is_none() {
            errors.push(ValidationError::new(field.clone(), "needs a status or a fault"));
        }
        if !page.location.starts_with('/') {
            errors.push(ValidationError::new(
                format!("{}.location", field),
                "must start with '/'",
            ));
        }
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            field,
            format!("'{}' is not a valid socket address", value),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{FilterConfig, FilterMappingConfig, HandlerConfig};
    use crate::session::cookie::TrackingMode;

    fn handler(name: &str, patterns: &[&str]) -> HandlerConfig {
        HandlerConfig {
            name: name.to_string(),
            class: "echo".to_string(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            init_params: Default::default(),
            load_on_startup: -1,
            async_supported: false,
        }
    }

    fn app(ctx: &str) -> ApplicationConfig {
        ApplicationConfig {
            name: "app".to_string(),
            context_path: ctx.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&EngineConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = EngineConfig::default();
        config.listener.bind_address = "not-an-address".to_string();
        config.listener.max_connections = 0;
        config.admin.enabled = true;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"listener.bind_address"));
        assert!(fields.contains(&"listener.max_connections"));
        assert!(fields.contains(&"admin.api_key"));
    }

    #[test]
    fn test_application_checks() {
        let mut shop = app("shop");
        shop.session.tracking_modes = vec![TrackingMode::Ssl, TrackingMode::Cookie];
        shop.handlers = vec![
            handler("a", &["/x", "bad"]),
            handler("a", &["/y"]),
            handler("b", &["/x"]),
        ];
        shop.filters = vec![FilterConfig {
            name: "f".to_string(),
            class: "request-log".to_string(),
            init_params: Default::default(),
            async_supported: false,
            mappings: vec![FilterMappingConfig {
                handler_names: vec!["ghost".to_string(), "*".to_string()],
                ..Default::default()
            }],
        }];

        let mut config = EngineConfig::default();
        config.applications = vec![shop, app("/dup"), app("/dup/")];

        let errors = validate_config(&config).unwrap_err();
        let text: Vec<String> = errors.iter().map(ToString::to_string).collect();
        let has = |needle: &str| text.iter().any(|t| t.contains(needle));

        assert!(has("applications[0].context_path"));
        assert!(has("tracking_modes"));
        assert!(has("invalid url pattern 'bad'"));
        assert!(has("duplicate handler 'a'"));
        assert!(has("already mapped to handler 'a'"));
        assert!(has("unknown handler 'ghost'"));
        assert!(has("applications[2].context_path"));
        assert!(!has("unknown handler '*'"));
    }
}
