//! Default Instantiator and the built-in handlers and filters.
//!
//! Configuration files refer to components by class name; the
//! [`InstantiatorRegistry`] maps those names to factories.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use serde_json::json;

use crate::dispatch::chain::FilterChain;
use crate::webapp::error::{InstantiationError, ServiceError, ServiceResult};
use crate::webapp::handler::{ComponentConfig, Filter, Handler, Instantiator};
use crate::webapp::request::WebRequest;
use crate::webapp::response::WebResponse;

type HandlerFactory = Arc<dyn Fn() -> Arc<dyn Handler> + Send + Sync>;
type FilterFactory = Arc<dyn Fn() -> Arc<dyn Filter> + Send + Sync>;

/// Class-name → factory registry.
#[derive(Clone, Default)]
pub struct InstantiatorRegistry {
    handlers: HashMap<String, HandlerFactory>,
    filters: HashMap<String, FilterFactory>,
}

impl InstantiatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in component.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_handler("echo", || Arc::new(EchoHandler));
        registry.register_handler("text", || Arc::new(TextHandler::default()));
        registry.register_handler("forward", || Arc::new(DispatchHandler::forward()));
        registry.register_handler("include", || Arc::new(DispatchHandler::include()));
        registry.register_handler("session-counter", || Arc::new(SessionCounterHandler));
        registry.register_filter("request-log", || Arc::new(RequestLogFilter));
        registry.register_filter("response-header", || Arc::new(ResponseHeaderFilter::default()));
        registry
    }

    pub fn register_handler<F>(&mut self, class: &str, factory: F)
    where
        F: Fn() -> Arc<dyn Handler> + Send + Sync + 'static,
    {
        self.handlers.insert(class.to_string(), Arc::new(factory));
    }

    pub fn register_filter<F>(&mut self, class: &str, factory: F)
    where
        F: Fn() -> Arc<dyn Filter> + Send + Sync + 'static,
    {
        self.filters.insert(class.to_string(), Arc::new(factory));
    }

    pub fn handler_classes(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn filter_classes(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.filters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Instantiator for InstantiatorRegistry {
    fn instantiate_handler(&self, class: &str) -> Result<Arc<dyn Handler>, InstantiationError> {
        self.handlers
            .get(class)
            .map(|factory| factory())
            .ok_or_else(|| InstantiationError::UnknownClass(class.to_string()))
    }

    fn instantiate_filter(&self, class: &str) -> Result<Arc<dyn Filter>, InstantiationError> {
        self.filters
            .get(class)
            .map(|factory| factory())
            .ok_or_else(|| InstantiationError::UnknownClass(class.to_string()))
    }
}

/// Writes the request's dispatch metadata as JSON.
pub struct EchoHandler;

impl Handler for EchoHandler {
    fn service(&self, request: &mut WebRequest, response: &mut WebResponse) -> ServiceResult {
        let body = json!({
            "request_id": request.request_id(),
            "method": request.method(),
            "request_uri": request.request_uri(),
            "context_path": request.context_path(),
            "servlet_path": request.servlet_path(),
            "path_info": request.path_info(),
            "query_string": request.query_string(),
            "dispatch_type": request.dispatch_type(),
            "handler": request.handler_name(),
            "attributes": request.attributes(),
        });
        response.set_content_type("application/json")?;
        let bytes = serde_json::to_vec(&body).map_err(|e| ServiceError::Failed(e.to_string()))?;
        response.write(&bytes);
        Ok(())
    }
}

/// Writes its `message` init parameter.
#[derive(Default)]
pub struct TextHandler {
    message: OnceLock<String>,
    content_type: OnceLock<String>,
}

impl Handler for TextHandler {
    fn init(&self, config: &ComponentConfig) -> ServiceResult {
        let _ = self
            .message
            .set(config.init_param("message").unwrap_or_default().to_string());
        let _ = self.content_type.set(
            config
                .init_param("content_type")
                .unwrap_or("text/plain; charset=utf-8")
                .to_string(),
        );
        Ok(())
    }

    fn service(&self, _request: &mut WebRequest, response: &mut WebResponse) -> ServiceResult {
        if let Some(content_type) = self.content_type.get() {
            response.set_content_type(content_type)?;
        }
        response.write_str(self.message.get().map(String::as_str).unwrap_or_default());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum DispatchMode {
    Forward,
    Include,
}

/// Forwards to, or includes, the path in its `target` init parameter.
pub struct DispatchHandler {
    mode: DispatchMode,
    target: OnceLock<String>,
}

impl DispatchHandler {
    pub fn forward() -> Self {
        Self {
            mode: DispatchMode::Forward,
            target: OnceLock::new(),
        }
    }

    pub fn include() -> Self {
        Self {
            mode: DispatchMode::Include,
            target: OnceLock::new(),
        }
    }
}

impl Handler for DispatchHandler {
    fn init(&self, config: &ComponentConfig) -> ServiceResult {
        let target = config.init_param("target").ok_or_else(|| {
            ServiceError::Failed(format!("'{}' requires a 'target' init parameter", config.name))
        })?;
        let _ = self.target.set(target.to_string());
        Ok(())
    }

    fn service(&self, request: &mut WebRequest, response: &mut WebResponse) -> ServiceResult {
        let target = self
            .target
            .get()
            .ok_or_else(|| ServiceError::Failed("dispatch target not initialized".to_string()))?;
        let app = request
            .application()
            .cloned()
            .ok_or_else(|| ServiceError::Failed("request is not bound to an application".to_string()))?;
        let dispatcher = app.request_dispatcher(target)?;
        match self.mode {
            DispatchMode::Forward => dispatcher.forward(request, response),
            DispatchMode::Include => dispatcher.include(request, response),
        }
    }
}

/// Counts visits in the caller's session.
pub struct SessionCounterHandler;

impl Handler for SessionCounterHandler {
    fn service(&self, request: &mut WebRequest, response: &mut WebResponse) -> ServiceResult {
        let session = request
            .session(response, true)?
            .ok_or_else(|| ServiceError::Failed("session could not be created".to_string()))?;
        let count = session.update_attribute("count", |current| {
            json!(current.and_then(|v| v.as_u64()).unwrap_or(0) + 1)
        });
        response.set_content_type("application/json")?;
        response.write_str(&json!({ "session": session.id(), "count": count }).to_string());
        Ok(())
    }
}

/// Logs each pass through the chain.
pub struct RequestLogFilter;

impl Filter for RequestLogFilter {
    fn do_filter(
        &self,
        request: &mut WebRequest,
        response: &mut WebResponse,
        chain: &mut FilterChain,
    ) -> ServiceResult {
        tracing::info!(
            request_id = %request.request_id(),
            method = %request.method(),
            uri = %request.request_uri(),
            dispatch = %request.dispatch_type(),
            "Filter pass"
        );
        let result = chain.do_filter(request, response);
        tracing::info!(
            request_id = %request.request_id(),
            status = response.status(),
            ok = result.is_ok(),
            "Filter exit"
        );
        result
    }
}

/// Sets the header named by its `name` and `value` init parameters.
#[derive(Default)]
pub struct ResponseHeaderFilter {
    header: OnceLock<(String, String)>,
}

impl Filter for ResponseHeaderFilter {
    fn init(&self, config: &ComponentConfig) -> ServiceResult {
        let (Some(name), Some(value)) = (config.init_param("name"), config.init_param("value")) else {
            return Err(ServiceError::Failed(format!(
                "'{}' requires 'name' and 'value' init parameters",
                config.name
            )));
        };
        let _ = self.header.set((name.to_string(), value.to_string()));
        Ok(())
    }

    fn do_filter(
        &self,
        request: &mut WebRequest,
        response: &mut WebResponse,
        chain: &mut FilterChain,
    ) -> ServiceResult {
        if let Some((name, value)) = self.header.get() {
            response.set_header(name, value)?;
        }
        chain.do_filter(request, response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webapp::application::WebApplication;
    use crate::webapp::error::EngineError;
    use crate::webapp::request::path_within_context;

    fn app() -> Arc<WebApplication> {
        Arc::new(WebApplication::new(
            "builtin",
            "/b",
            Arc::new(InstantiatorRegistry::with_builtins()),
        ))
    }

    fn run(app: &Arc<WebApplication>, uri: &str) -> WebResponse {
        let mut req = WebRequest::new("GET", uri);
        let path = path_within_context(app.context_path(), req.request_uri());
        let matched = app.resolve(&path).unwrap();
        req.bind(Arc::clone(app), &matched.handler_name, matched.servlet_path, matched.path_info);
        let mut chain = app
            .build_chain(&matched.handler_name, Some(&path), crate::webapp::request::DispatchType::Request)
            .unwrap();
        let mut resp = WebResponse::new();
        chain.do_filter(&mut req, &mut resp).unwrap();
        resp
    }

    #[test]
    fn test_unknown_class() {
        let registry = InstantiatorRegistry::with_builtins();
        assert!(matches!(
            registry.instantiate_handler("nope"),
            Err(InstantiationError::UnknownClass(_))
        ));
        assert!(registry.handler_classes().contains(&"echo"));
        assert!(registry.filter_classes().contains(&"request-log"));
    }

    #[test]
    fn test_echo_reports_paths() {
        let app = app();
        app.add_handler("echo", "echo").unwrap().add_mapping(&["/echo/*"]).unwrap();
        let resp = run(&app, "/b/echo/x?y=1");
        let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["servlet_path"], "/echo");
        assert_eq!(body["path_info"], "/x");
        assert_eq!(body["dispatch_type"], "request");
    }

    #[test]
    fn test_text_and_response_header() {
        let app = app();
        app.add_handler("hello", "text")
            .unwrap()
            .set_init_parameter("message", "hello")
            .unwrap();
        app.add_mapping("hello", &["/hello"]).unwrap();
        let filter = app.add_filter("hdr", "response-header").unwrap();
        filter.set_init_parameter("name", "x-engine").unwrap();
        filter.set_init_parameter("value", "on").unwrap();
        filter.add_mapping_for_url_patterns(&[], false, &["/*"]).unwrap();

        let resp = run(&app, "/b/hello");
        assert_eq!(resp.body_text(), "hello");
        assert_eq!(resp.header("x-engine"), Some("on"));
    }

    #[test]
    fn test_forward_handler() {
        let app = app();
        app.add_handler("text", "text")
            .unwrap()
            .set_init_parameter("message", "target")
            .unwrap();
        app.add_mapping("text", &["/target"]).unwrap();
        app.add_handler("fwd", "forward")
            .unwrap()
            .set_init_parameter("target", "/target")
            .unwrap();
        app.add_mapping("fwd", &["/go"]).unwrap();

        assert_eq!(run(&app, "/b/go").body_text(), "target");
    }

    #[test]
    fn test_dispatch_handler_requires_target() {
        let app = app();
        app.add_handler("fwd", "forward").unwrap().set_load_on_startup(1).unwrap();
        assert!(matches!(
            app.initialize(),
            Err(EngineError::Initialization { .. })
        ));
    }
}
