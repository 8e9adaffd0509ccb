//! Startup orchestration.
//!
//! # Responsibilities
//! - Build each configured application (registrations, error pages, sessions)
//! - Initialize and start applications in configuration order
//! - Deploy them into one [`ApplicationServer`]
//!
//! # Design Decisions
//! - Fail fast: any registration or initialization error is fatal
//! - Applications start before the listener binds (traffic only when ready)

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::schema::{ApplicationConfig, EngineConfig, FilterConfig, HandlerConfig};
use crate::routing::ApplicationServer;
use crate::webapp::application::WebApplication;
use crate::webapp::error::EngineError;
use crate::webapp::handler::Instantiator;

/// Build one application from its configuration, without starting it.
pub fn build_application(
    config: &ApplicationConfig,
    instantiator: Arc<dyn Instantiator>,
) -> Result<WebApplication, EngineError> {
    let app = WebApplication::new(&config.name, &config.context_path, instantiator)
        .with_hosts(&config.hosts);

    for (name, value) in &config.init_params {
        app.set_init_parameter(name, value)?;
    }
    for file in &config.welcome_files {
        app.add_welcome_file(file)?;
    }
    app.declare_roles(&config.roles)?;
    for (extension, mime_type) in &config.mime_types {
        app.add_mime_type(extension, mime_type)?;
    }
    for page in &config.error_pages {
        if let Some(status) = page.status {
            app.add_error_page_for_status(status, &page.location)?;
        }
        if let Some(fault) = &page.fault {
            app.add_error_page_for_fault(fault, &page.location)?;
        }
    }

    let sessions = app.sessions();
    sessions.set_tracking_modes(config.session.tracking_modes.iter().copied().collect::<BTreeSet<_>>())?;
    sessions.set_session_timeout_minutes(config.session.timeout_minutes);
    sessions.set_cookie_config(config.session.cookie.clone());

    for handler in &config.handlers {
        register_handler(&app, handler)?;
    }
    for filter in &config.filters {
        register_filter(&app, filter)?;
    }

    tracing::debug!(
        application = %config.name,
        handlers = config.handlers.len(),
        filters = config.filters.len(),
        "Application built"
    );
    Ok(app)
}

fn register_handler(app: &WebApplication, config: &HandlerConfig) -> Result<(), EngineError> {
    let registration = app.add_handler(&config.name, config.class.as_str())?;
    for (name, value) in &config.init_params {
        registration.set_init_parameter(name, value)?;
    }
    registration.set_load_on_startup(config.load_on_startup)?;
    registration.set_async_supported(config.async_supported)?;
    if !config.patterns.is_empty() {
        let patterns: Vec<&str> = config.patterns.iter().map(String::as_str).collect();
        registration.add_mapping(&patterns)?;
    }
    Ok(())
}

fn register_filter(app: &WebApplication, config: &FilterConfig) -> Result<(), EngineError> {
    let registration = app.add_filter(&config.name, config.class.as_str())?;
    for (name, value) in &config.init_params {
        registration.set_init_parameter(name, value)?;
    }
    registration.set_async_supported(config.async_supported)?;
    for mapping in &config.mappings {
        if !mapping.url_patterns.is_empty() {
            let patterns: Vec<&str> = mapping.url_patterns.iter().map(String::as_str).collect();
            registration.add_mapping_for_url_patterns(&mapping.dispatch_types, mapping.match_after, &patterns)?;
        }
        if !mapping.handler_names.is_empty() {
            let names: Vec<&str> = mapping.handler_names.iter().map(String::as_str).collect();
            registration.add_mapping_for_handler_names(&mapping.dispatch_types, mapping.match_after, &names)?;
        }
    }
    Ok(())
}

/// Build, start and deploy every configured application.
pub fn build_server(
    config: &EngineConfig,
    instantiator: Arc<dyn Instantiator>,
) -> Result<Arc<ApplicationServer>, EngineError> {
    let server = Arc::new(ApplicationServer::new());
    for app_config in &config.applications {
        let app = Arc::new(build_application(app_config, Arc::clone(&instantiator))?);
        app.start()?;
        server.deploy(app)?;
    }
    tracing::info!(applications = config.applications.len(), "Applications deployed");
    Ok(server)
}
