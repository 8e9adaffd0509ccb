//! Application lookup and the dispatch front door.
//!
//! # Responsibilities
//! - Hold deployed applications
//! - Pick the application for a host and request URI (longest context path)
//! - Run the direct-request chain and turn failures into error responses
//!
//! # Design Decisions
//! - The deployment list is an `ArcSwap` snapshot; resolution never locks
//! - Resolution failures are values; only `service` turns them into 404s
//! - Handler panics are contained per request and become 500 responses

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use arc_swap::ArcSwap;
use axum::http::StatusCode;
use serde_json::Value;

use crate::dispatch::current::{self, DispatchContext};
use crate::observability::metrics;
use crate::routing::matcher::MatchKind;
use crate::webapp::application::{LifecycleState, WebApplication};
use crate::webapp::error::{EngineError, ServiceError};
use crate::webapp::request::{
    path_within_context, DispatchType, WebRequest, ERROR_MESSAGE, ERROR_REQUEST_URI,
    ERROR_SERVLET_NAME, ERROR_STATUS_CODE,
};
use crate::webapp::response::WebResponse;

/// Outcome of a successful resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub application: Arc<WebApplication>,
    pub handler_name: String,
    pub servlet_path: String,
    pub path_info: Option<String>,
    pub path_within_context: String,
    pub kind: MatchKind,
}

/// Failure to be rendered by the front door.
struct Failure {
    status: u16,
    message: Option<String>,
    fault: Option<&'static str>,
}

/// The set of deployed applications.
pub struct ApplicationServer {
    apps: ArcSwap<Vec<Arc<WebApplication>>>,
    write_lock: Mutex<()>,
}

impl Default for ApplicationServer {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplicationServer {
    pub fn new() -> Self {
        Self {
            apps: ArcSwap::from_pointee(Vec::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Add an application.
    ///
    /// Two applications may share a context path only when they serve
    /// different host sets.
    pub fn deploy(&self, app: Arc<WebApplication>) -> Result<(), EngineError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let current = self.apps.load_full();
        if current
            .iter()
            .any(|a| a.context_path() == app.context_path() && a.hosts() == app.hosts())
        {
            return Err(EngineError::DuplicateRegistration {
                kind: "application",
                name: display_context(app.context_path()).to_string(),
            });
        }

        let mut next = Vec::clone(&current);
        tracing::info!(
            application = %app.name(),
            context_path = %display_context(app.context_path()),
            hosts = ?app.hosts(),
            "Application deployed"
        );
        next.push(app);
        self.apps.store(Arc::new(next));
        Ok(())
    }

    /// Remove every application at `context_path`, returning them.
    pub fn undeploy(&self, context_path: &str) -> Vec<Arc<WebApplication>> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let wanted = context_path.trim_end_matches('/');
        let (removed, kept): (Vec<_>, Vec<_>) = self
            .apps
            .load()
            .iter()
            .cloned()
            .partition(|a| a.context_path() == wanted);
        self.apps.store(Arc::new(kept));
        removed
    }

    pub fn applications(&self) -> Vec<Arc<WebApplication>> {
        Vec::clone(&self.apps.load())
    }

    /// Application owning `request_uri` for `host`.
    pub fn application_for(
        &self,
        host: Option<&str>,
        request_uri: &str,
    ) -> Result<Arc<WebApplication>, EngineError> {
        let host = host.map(normalize_host);
        self.apps
            .load()
            .iter()
            .filter(|a| a.serves_host(host.as_deref()))
            .filter(|a| context_matches(a.context_path(), request_uri))
            // Longest context wins; among equals, an app naming the host beats a catch-all.
            .max_by_key(|a| (a.context_path().len(), !a.hosts().is_empty()))
            .cloned()
            .ok_or_else(|| EngineError::NoSuchApplication {
                path: request_uri.to_string(),
            })
    }

    /// Resolve a request to an application and handler.
    pub fn resolve(&self, host: Option<&str>, request_uri: &str) -> Result<Resolution, EngineError> {
        let application = self.application_for(host, request_uri)?;
        let path = path_within_context(application.context_path(), request_uri);
        let matched = application.resolve(&path)?;
        Ok(Resolution {
            application,
            handler_name: matched.handler_name,
            servlet_path: matched.servlet_path,
            path_info: matched.path_info,
            path_within_context: path,
            kind: matched.kind,
        })
    }

    /// Serve one direct request to completion.
    pub fn service(&self, mut request: WebRequest) -> WebResponse {
        let started = Instant::now();
        let mut response = WebResponse::new();
        let host = request.header("host").map(str::to_string);

        let resolution = match self.resolve_with_welcome(host.as_deref(), &mut request) {
            Ok(resolution) => resolution,
            Err(e) => {
                tracing::debug!(
                    request_id = %request.request_id(),
                    uri = %request.request_uri(),
                    error = %e,
                    "Resolution failed"
                );
                if let EngineError::NoSuchResource { .. } = e {
                    if let Ok(app) = self.application_for(host.as_deref(), request.request_uri()) {
                        request.paths.context_path = app.context_path().to_string();
                        request.application = Some(Arc::clone(&app));
                        let failure = Failure {
                            status: 404,
                            message: None,
                            fault: None,
                        };
                        render_error(&app, &request, &mut response, failure);
                        finish(&app, &request, &response, started);
                        return response;
                    }
                }
                render_plain(&mut response, 404, None);
                metrics::record_request("-", request.method(), response.status(), started.elapsed());
                return response;
            }
        };

        let app = Arc::clone(&resolution.application);
        if app.state() != LifecycleState::Running {
            tracing::warn!(
                application = %app.name(),
                state = app.state().as_str(),
                "Request for application that is not running"
            );
            render_plain(&mut response, 503, Some("application is not running"));
            finish(&app, &request, &response, started);
            return response;
        }

        request.bind(
            Arc::clone(&app),
            &resolution.handler_name,
            resolution.servlet_path,
            resolution.path_info,
        );

        let failure = match app.build_chain(
            &resolution.handler_name,
            Some(&resolution.path_within_context),
            DispatchType::Request,
        ) {
            Ok(mut chain) => {
                request.async_supported = chain.is_async_supported();
                tracing::debug!(
                    request_id = %request.request_id(),
                    application = %app.name(),
                    handler = %resolution.handler_name,
                    servlet_path = %request.servlet_path(),
                    path_info = ?request.path_info(),
                    "Dispatching request"
                );
                metrics::record_dispatch(DispatchType::Request);
                let outcome = {
                    let _current = current::enter(DispatchContext::capture(&request));
                    catch_unwind(AssertUnwindSafe(|| chain.do_filter(&mut request, &mut response)))
                };
                match outcome {
                    Ok(Ok(())) => response.take_error().map(|e| Failure {
                        status: e.status,
                        message: e.message,
                        fault: None,
                    }),
                    Ok(Err(e)) => Some(failure_from_service_error(&request, e)),
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        tracing::error!(
                            request_id = %request.request_id(),
                            handler = %resolution.handler_name,
                            panic = %message,
                            "Handler panicked"
                        );
                        Some(Failure {
                            status: 500,
                            message: None,
                            fault: Some("panic"),
                        })
                    }
                }
            }
            Err(e) => {
                tracing::error!(
                    request_id = %request.request_id(),
                    handler = %resolution.handler_name,
                    error = %e,
                    "Unable to build filter chain"
                );
                Some(Failure {
                    status: 500,
                    message: None,
                    fault: Some("engine"),
                })
            }
        };

        if let Some(failure) = failure {
            render_error(&app, &request, &mut response, failure);
        }
        finish(&app, &request, &response, started);
        response
    }

    /// Resolve, trying welcome files for directory-style paths.
    fn resolve_with_welcome(
        &self,
        host: Option<&str>,
        request: &mut WebRequest,
    ) -> Result<Resolution, EngineError> {
        let resolved = self.resolve(host, request.request_uri());
        let directory = request.request_uri().ends_with('/');
        let needs_welcome = match &resolved {
            Ok(r) => directory && r.kind == MatchKind::Default,
            Err(e) => directory && matches!(e, EngineError::NoSuchResource { .. }),
        };
        if !needs_welcome {
            return resolved;
        }

        let app = self.application_for(host, request.request_uri())?;
        let base = path_within_context(app.context_path(), request.request_uri());
        for file in app.welcome_files() {
            let candidate = format!("{}{}", base, file.trim_start_matches('/'));
            let Ok(matched) = app.resolve(&candidate) else {
                continue;
            };
            if matched.kind == MatchKind::Default {
                continue;
            }
            tracing::debug!(
                request_id = %request.request_id(),
                welcome = %candidate,
                handler = %matched.handler_name,
                "Welcome file selected"
            );
            request.paths.request_uri = format!("{}{}", app.context_path(), candidate);
            return Ok(Resolution {
                application: Arc::clone(&app),
                handler_name: matched.handler_name,
                servlet_path: matched.servlet_path,
                path_info: matched.path_info,
                path_within_context: candidate,
                kind: matched.kind,
            });
        }
        resolved
    }
}

fn failure_from_service_error(request: &WebRequest, error: ServiceError) -> Failure {
    let status = error.status_code();
    let fault = error.fault_type();
    if status >= 500 {
        tracing::error!(
            request_id = %request.request_id(),
            handler = ?request.handler_name(),
            fault = fault,
            error = %error,
            "Request failed"
        );
    } else {
        tracing::debug!(
            request_id = %request.request_id(),
            status = status,
            error = %error,
            "Request ended with error status"
        );
    }
    let message = match &error {
        ServiceError::Status { message, .. } => Some(message.clone()),
        _ => None,
    };
    Failure {
        status,
        message,
        fault: Some(fault),
    }
}

/// Route a failure to the application's error page, or a plain body.
fn render_error(app: &Arc<WebApplication>, request: &WebRequest, response: &mut WebResponse, failure: Failure) {
    response.reset_for_error(failure.status);
    let Some(location) = app.error_page_for(failure.status, failure.fault) else {
        render_plain(response, failure.status, failure.message.as_deref());
        return;
    };

    let matched = match app.resolve(&location) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(location = %location, error = %e, "Error page does not resolve");
            render_plain(response, failure.status, failure.message.as_deref());
            return;
        }
    };
    let mut chain = match app.build_chain(&matched.handler_name, Some(&location), DispatchType::Error) {
        Ok(chain) => chain,
        Err(e) => {
            tracing::warn!(location = %location, error = %e, "Error page chain failed");
            render_plain(response, failure.status, failure.message.as_deref());
            return;
        }
    };

    let mut view = request.derive(DispatchType::Error);
    view.set_attribute(ERROR_STATUS_CODE, Value::from(failure.status));
    view.set_attribute(ERROR_REQUEST_URI, request.request_uri());
    if let Some(message) = &failure.message {
        view.set_attribute(ERROR_MESSAGE, message.as_str());
    }
    if let Some(handler) = request.handler_name() {
        view.set_attribute(ERROR_SERVLET_NAME, handler);
    }
    view.paths.request_uri = format!("{}{}", app.context_path(), location);
    view.paths.servlet_path = matched.servlet_path;
    view.paths.path_info = matched.path_info;
    view.handler_name = Some(matched.handler_name.clone());

    tracing::debug!(
        request_id = %request.request_id(),
        status = failure.status,
        location = %location,
        "Error dispatch"
    );
    metrics::record_dispatch(DispatchType::Error);

    let outcome = {
        let _current = current::enter(DispatchContext::capture(&view));
        catch_unwind(AssertUnwindSafe(|| chain.do_filter(&mut view, response)))
    };
    match outcome {
        Ok(Ok(())) => {
            response.take_error();
        }
        Ok(Err(e)) => {
            tracing::warn!(location = %location, error = %e, "Error page failed");
            response.reset_for_error(failure.status);
            render_plain(response, failure.status, failure.message.as_deref());
        }
        Err(_) => {
            tracing::error!(location = %location, "Error page panicked");
            response.reset_for_error(failure.status);
            render_plain(response, failure.status, failure.message.as_deref());
        }
    }
}

fn render_plain(response: &mut WebResponse, status: u16, message: Option<&str>) {
    response.reset_for_error(status);
    let reason = StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Error");
    let body = match message {
        Some(message) => format!("{} {}: {}", status, reason, message),
        None => format!("{} {}", status, reason),
    };
    // Header values here are static and always valid.
    let _ = response.set_content_type("text/plain; charset=utf-8");
    response.write_str(&body);
}

fn finish(app: &WebApplication, request: &WebRequest, response: &WebResponse, started: Instant) {
    let elapsed = started.elapsed();
    tracing::info!(
        request_id = %request.request_id(),
        application = %app.name(),
        method = %request.method(),
        uri = %request.request_uri(),
        status = response.status(),
        duration_ms = elapsed.as_millis() as u64,
        "Request completed"
    );
    metrics::record_request(app.name(), request.method(), response.status(), elapsed);
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// True when `request_uri` lies inside `context_path`.
fn context_matches(context_path: &str, request_uri: &str) -> bool {
    if context_path.is_empty() {
        return true;
    }
    match request_uri.strip_prefix(context_path) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Lowercase host without port; handles bracketed IPv6 literals.
fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let bare = if let Some(rest) = host.strip_prefix('[') {
        rest.split(']').next().unwrap_or(rest)
    } else {
        host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host)
    };
    bare.to_ascii_lowercase()
}

fn display_context(context_path: &str) -> &str {
    if context_path.is_empty() {
        "/"
    } else {
        context_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webapp::builtin::InstantiatorRegistry;
    use crate::webapp::error::ServiceResult;
    use crate::webapp::handler::Handler;

    struct Text(&'static str);

    impl Handler for Text {
        fn service(&self, _req: &mut WebRequest, resp: &mut WebResponse) -> ServiceResult {
            resp.write_str(self.0);
            Ok(())
        }
    }

    struct Panics;

    impl Handler for Panics {
        fn service(&self, _req: &mut WebRequest, _resp: &mut WebResponse) -> ServiceResult {
            panic!("handler bug");
        }
    }

    struct Fails;

    impl Handler for Fails {
        fn service(&self, _req: &mut WebRequest, _resp: &mut WebResponse) -> ServiceResult {
            Err(ServiceError::status(403, "denied"))
        }
    }

    struct ErrorPage;

    impl Handler for ErrorPage {
        fn service(&self, req: &mut WebRequest, resp: &mut WebResponse) -> ServiceResult {
            let status = req.attribute(ERROR_STATUS_CODE).cloned().unwrap_or_default();
            let uri = req.attribute(ERROR_REQUEST_URI).cloned().unwrap_or_default();
            resp.write_str(&format!("error {} at {}", status, uri.as_str().unwrap_or("")));
            Ok(())
        }
    }

    fn handler<H: Handler + 'static>(h: H) -> Arc<dyn Handler> {
        Arc::new(h)
    }

    fn app(name: &str, ctx: &str) -> WebApplication {
        WebApplication::new(name, ctx, Arc::new(InstantiatorRegistry::with_builtins()))
    }

    fn server() -> ApplicationServer {
        let server = ApplicationServer::new();

        let root = app("root", "/");
        root.add_handler("root", handler(Text("root"))).unwrap().add_mapping(&["/"]).unwrap();
        root.start().unwrap();
        server.deploy(Arc::new(root)).unwrap();

        let shop = app("shop", "/app");
        shop.add_handler("echo", handler(Text("echo"))).unwrap().add_mapping(&["/echo/*"]).unwrap();
        shop.add_handler("index", handler(Text("index"))).unwrap().add_mapping(&["/index.html"]).unwrap();
        shop.add_handler("panic", handler(Panics)).unwrap().add_mapping(&["/panic"]).unwrap();
        shop.add_handler("deny", handler(Fails)).unwrap().add_mapping(&["/deny"]).unwrap();
        shop.add_handler("error", handler(ErrorPage)).unwrap().add_mapping(&["/error"]).unwrap();
        shop.add_welcome_file("index.html").unwrap();
        shop.add_error_page_for_status(403, "/error").unwrap();
        shop.start().unwrap();
        server.deploy(Arc::new(shop)).unwrap();

        server
    }

    #[test]
    fn test_resolve_longest_context() {
        let server = server();
        let r = server.resolve(None, "/app/echo/x").unwrap();
        assert_eq!(r.application.name(), "shop");
        assert_eq!(r.handler_name, "echo");
        assert_eq!(r.servlet_path, "/echo");
        assert_eq!(r.path_info.as_deref(), Some("/x"));

        let r = server.resolve(None, "/application").unwrap();
        assert_eq!(r.application.name(), "root");
    }

    #[test]
    fn test_resolve_no_resource() {
        let server = ApplicationServer::new();
        let shop = app("shop", "/app");
        shop.add_handler("echo", handler(Text("echo"))).unwrap().add_mapping(&["/echo/*"]).unwrap();
        server.deploy(Arc::new(shop)).unwrap();

        assert!(matches!(
            server.resolve(None, "/app/missing"),
            Err(EngineError::NoSuchResource { .. })
        ));
        assert!(matches!(
            server.resolve(None, "/other"),
            Err(EngineError::NoSuchApplication { .. })
        ));
    }

    #[test]
    fn test_virtual_hosts() {
        let server = ApplicationServer::new();
        let a = app("a", "/").with_hosts(["a.example"]);
        a.add_handler("a", handler(Text("a"))).unwrap().add_mapping(&["/"]).unwrap();
        let b = app("b", "/").with_hosts(["b.example"]);
        b.add_handler("b", handler(Text("b"))).unwrap().add_mapping(&["/"]).unwrap();
        server.deploy(Arc::new(a)).unwrap();
        server.deploy(Arc::new(b)).unwrap();

        assert_eq!(server.resolve(Some("B.Example:8080"), "/x").unwrap().application.name(), "b");
        assert!(server.resolve(Some("c.example"), "/x").is_err());
    }

    #[test]
    fn test_host_bound_app_beats_catch_all() {
        let server = ApplicationServer::new();
        let specific = app("specific", "/").with_hosts(["a.example"]);
        specific.add_handler("s", handler(Text("s"))).unwrap().add_mapping(&["/"]).unwrap();
        let any = app("any", "/");
        any.add_handler("a", handler(Text("a"))).unwrap().add_mapping(&["/"]).unwrap();
        server.deploy(Arc::new(specific)).unwrap();
        server.deploy(Arc::new(any)).unwrap();

        assert_eq!(server.application_for(Some("a.example"), "/x").unwrap().name(), "specific");
        assert_eq!(server.application_for(Some("b.example"), "/x").unwrap().name(), "any");
        assert_eq!(server.application_for(None, "/x").unwrap().name(), "any");
    }

    #[test]
    fn test_duplicate_deploy_rejected() {
        let server = ApplicationServer::new();
        server.deploy(Arc::new(app("one", "/app"))).unwrap();
        assert!(server.deploy(Arc::new(app("two", "/app/"))).is_err());
        assert_eq!(server.undeploy("/app").len(), 1);
        assert!(server.applications().is_empty());
    }

    #[test]
    fn test_service_welcome_file() {
        let server = server();
        let resp = server.service(WebRequest::new("GET", "/app/"));
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.body_text(), "index");
    }

    #[test]
    fn test_service_panic_becomes_500() {
        let server = server();
        let resp = server.service(WebRequest::new("GET", "/app/panic"));
        assert_eq!(resp.status(), 500);
        assert!(resp.body_text().starts_with("500"));
        assert!(current::current().is_none());
    }

    #[test]
    fn test_service_error_page() {
        let server = server();
        let resp = server.service(WebRequest::new("GET", "/app/deny"));
        assert_eq!(resp.status(), 403);
        assert_eq!(resp.body_text(), "error 403 at /app/deny");
    }

    #[test]
    fn test_service_not_found() {
        let server = ApplicationServer::new();
        let resp = server.service(WebRequest::new("GET", "/nothing"));
        assert_eq!(resp.status(), 404);
    }

    #[test]
    fn test_not_running_is_503() {
        let server = ApplicationServer::new();
        let idle = app("idle", "/idle");
        idle.add_handler("h", handler(Text("h"))).unwrap().add_mapping(&["/*"]).unwrap();
        server.deploy(Arc::new(idle)).unwrap();
        let resp = server.service(WebRequest::new("GET", "/idle/x"));
        assert_eq!(resp.status(), 503);
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("Example.com:80"), "example.com");
        assert_eq!(normalize_host("[::1]:8080"), "::1");
        assert_eq!(normalize_host("localhost"), "localhost");
    }
}
