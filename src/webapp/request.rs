//! Request view handed to filters and handlers.
//!
//! # Responsibilities
//! - Carry path elements (context path, servlet path, path info, query)
//! - Hold the per-dispatch attribute map
//! - Bridge to the owning application's session manager
//!
//! # Design Decisions
//! - Every dispatch works on its own `WebRequest` value; forward and include
//!   derive a fresh view instead of mutating the caller's request
//! - Attributes are JSON values so they can be logged and snapshotted cheaply
//! - The request only stores session ids; the session lives in the manager

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use axum::body::Bytes;
use axum::http::HeaderMap;
use serde::Serialize;
use serde_json::Value;

use crate::session::Session;
use crate::webapp::application::WebApplication;
use crate::webapp::error::EngineError;
use crate::webapp::response::WebResponse;

/// Forward-chain attribute names, set on the target of a forward.
pub const FORWARD_REQUEST_URI: &str = "javax.servlet.forward.request_uri";
pub const FORWARD_CONTEXT_PATH: &str = "javax.servlet.forward.context_path";
pub const FORWARD_SERVLET_PATH: &str = "javax.servlet.forward.servlet_path";
pub const FORWARD_PATH_INFO: &str = "javax.servlet.forward.path_info";
pub const FORWARD_QUERY_STRING: &str = "javax.servlet.forward.query_string";

/// Include-chain attribute names, set on the included view.
pub const INCLUDE_REQUEST_URI: &str = "javax.servlet.include.request_uri";
pub const INCLUDE_CONTEXT_PATH: &str = "javax.servlet.include.context_path";
pub const INCLUDE_SERVLET_PATH: &str = "javax.servlet.include.servlet_path";
pub const INCLUDE_PATH_INFO: &str = "javax.servlet.include.path_info";
pub const INCLUDE_QUERY_STRING: &str = "javax.servlet.include.query_string";

/// Async-chain attribute names, set by an asynchronous re-dispatch.
pub const ASYNC_REQUEST_URI: &str = "javax.servlet.async.request_uri";
pub const ASYNC_CONTEXT_PATH: &str = "javax.servlet.async.context_path";
pub const ASYNC_SERVLET_PATH: &str = "javax.servlet.async.servlet_path";
pub const ASYNC_PATH_INFO: &str = "javax.servlet.async.path_info";
pub const ASYNC_QUERY_STRING: &str = "javax.servlet.async.query_string";
/// Path elements of the request that started asynchronous processing.
pub const ASYNC_PREVIOUS_REQUEST: &str = "webapp.async.previous_request";

/// Error-dispatch attribute names.
pub const ERROR_STATUS_CODE: &str = "javax.servlet.error.status_code";
pub const ERROR_MESSAGE: &str = "javax.servlet.error.message";
pub const ERROR_REQUEST_URI: &str = "javax.servlet.error.request_uri";
pub const ERROR_SERVLET_NAME: &str = "javax.servlet.error.servlet_name";

/// URL path parameter carrying a session id when URL tracking is enabled.
pub const SESSION_PATH_PARAMETER: &str = "jsessionid";

/// Why a chain is being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchType {
    /// Direct client request.
    Request,
    Forward,
    Include,
    Async,
    Error,
}

impl DispatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchType::Request => "request",
            DispatchType::Forward => "forward",
            DispatchType::Include => "include",
            DispatchType::Async => "async",
            DispatchType::Error => "error",
        }
    }
}

impl fmt::Display for DispatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Addressing metadata of a request view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PathElements {
    pub request_uri: String,
    pub context_path: String,
    pub servlet_path: String,
    pub path_info: Option<String>,
    pub query_string: Option<String>,
}

/// State kept for a request that entered asynchronous mode.
///
/// `start` is frozen at `start_async` time; `owned_attributes` lists the
/// attribute keys written by async re-dispatch so they can be cleared later.
#[derive(Debug, Clone, Default)]
pub struct AsyncDispatchState {
    pub start: PathElements,
    pub owned_attributes: BTreeSet<String>,
}

/// A request as seen by one dispatch.
#[derive(Clone)]
pub struct WebRequest {
    request_id: String,
    method: String,
    pub(crate) paths: PathElements,
    headers: HeaderMap,
    body: Bytes,
    attributes: HashMap<String, Value>,
    pub(crate) dispatch_type: DispatchType,
    pub(crate) async_supported: bool,
    pub(crate) requested_session_id: Option<String>,
    pub(crate) requested_session_id_from_cookie: bool,
    pub(crate) session_id: Option<String>,
    pub(crate) async_state: Option<AsyncDispatchState>,
    pub(crate) handler_name: Option<String>,
    pub(crate) application: Option<Arc<WebApplication>>,
}

impl WebRequest {
    /// Create a direct request for `method` and `uri` (path plus optional query).
    ///
    /// A `;jsessionid=` path parameter is stripped from the path and kept as
    /// the requested session id.
    pub fn new(method: impl Into<String>, uri: &str) -> Self {
        let (path, query) = match uri.split_once('?') {
            Some((p, q)) => (p, Some(q.to_string())),
            None => (uri, None),
        };
        let (path, url_session) = strip_session_parameter(path);
        let path = if path.is_empty() { "/".to_string() } else { path };

        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            method: method.into(),
            paths: PathElements {
                request_uri: path,
                query_string: query.filter(|q| !q.is_empty()),
                ..PathElements::default()
            },
            headers: HeaderMap::new(),
            body: Bytes::new(),
            attributes: HashMap::new(),
            dispatch_type: DispatchType::Request,
            async_supported: false,
            requested_session_id: url_session,
            requested_session_id_from_cookie: false,
            session_id: None,
            async_state: None,
            handler_name: None,
            application: None,
        }
    }

    /// Set the request id (normally the `x-request-id` header value).
    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = id.into();
        self
    }

    /// Attach headers; the session cookie, if present, becomes the requested id.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Bind this request to its application and routing outcome.
    pub(crate) fn bind(
        &mut self,
        application: Arc<WebApplication>,
        handler_name: &str,
        servlet_path: String,
        path_info: Option<String>,
    ) {
        self.paths.context_path = application.context_path().to_string();
        self.paths.servlet_path = servlet_path;
        self.paths.path_info = path_info;
        self.handler_name = Some(handler_name.to_string());

        // A cookie wins over a URL path parameter.
        let cookie_name = application.sessions().cookie_config().name;
        if let Some(id) = self.cookie(&cookie_name) {
            self.requested_session_id = Some(id);
            self.requested_session_id_from_cookie = true;
        }
        self.application = Some(application);
    }

    /// Derive a fresh view of this request for a re-dispatch.
    ///
    /// Identity, headers, body, session binding and an attribute snapshot are
    /// carried over; async wrapper state is not.
    pub(crate) fn derive(&self, dispatch_type: DispatchType) -> Self {
        let mut view = self.clone();
        view.dispatch_type = dispatch_type;
        view.async_state = None;
        view
    }

    /// Copy session binding changes made by a re-dispatch back onto this request.
    pub(crate) fn adopt_session_state(&mut self, view: &WebRequest) {
        self.session_id = view.session_id.clone();
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Path part of the request URI, including the context path.
    pub fn request_uri(&self) -> &str {
        &self.paths.request_uri
    }

    pub fn context_path(&self) -> &str {
        &self.paths.context_path
    }

    pub fn servlet_path(&self) -> &str {
        &self.paths.servlet_path
    }

    pub fn path_info(&self) -> Option<&str> {
        self.paths.path_info.as_deref()
    }

    pub fn query_string(&self) -> Option<&str> {
        self.paths.query_string.as_deref()
    }

    pub fn path_elements(&self) -> &PathElements {
        &self.paths
    }

    /// The request URI with the context path removed; `/` for the context root.
    pub fn path_within_context(&self) -> String {
        path_within_context(&self.paths.context_path, &self.paths.request_uri)
    }

    pub fn dispatch_type(&self) -> DispatchType {
        self.dispatch_type
    }

    /// Name of the handler this view was dispatched to.
    pub fn handler_name(&self) -> Option<&str> {
        self.handler_name.as_deref()
    }

    pub fn is_async_supported(&self) -> bool {
        self.async_supported
    }

    pub fn is_async_started(&self) -> bool {
        self.async_state.is_some()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a header, if it is valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Value of a request cookie.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(axum::http::header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.trim_matches('"').to_string())
    }

    /// First value of a query parameter.
    pub fn parameter(&self, name: &str) -> Option<String> {
        let query = self.paths.query_string.as_deref()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<Value> {
        self.attributes.remove(name)
    }

    /// The application this request was routed to.
    pub fn application(&self) -> Option<&Arc<WebApplication>> {
        self.application.as_ref()
    }

    /// Put this request into asynchronous mode.
    ///
    /// The current path elements are frozen as the async start point and the
    /// dispatch type becomes [`DispatchType::Async`]; a later forward takes the
    /// asynchronous re-dispatch path.
    pub fn start_async(&mut self) -> Result<(), EngineError> {
        if !self.async_supported {
            return Err(EngineError::DispatchState(format!(
                "asynchronous processing is not supported for '{}'",
                self.paths.request_uri
            )));
        }
        if self.async_state.is_some() {
            return Err(EngineError::DispatchState(
                "asynchronous processing already started".to_string(),
            ));
        }
        self.async_state = Some(AsyncDispatchState {
            start: self.paths.clone(),
            owned_attributes: BTreeSet::new(),
        });
        self.dispatch_type = DispatchType::Async;
        Ok(())
    }

    /// Attribute keys written by asynchronous re-dispatch.
    pub fn wrapper_attributes(&self) -> Vec<String> {
        self.async_state
            .as_ref()
            .map(|s| s.owned_attributes.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove every attribute written by asynchronous re-dispatch.
    pub fn clear_wrapper_attributes(&mut self) {
        if let Some(state) = self.async_state.as_mut() {
            for key in std::mem::take(&mut state.owned_attributes) {
                self.attributes.remove(&key);
            }
        }
    }

    pub fn requested_session_id(&self) -> Option<&str> {
        self.requested_session_id.as_deref()
    }

    pub fn is_requested_session_id_from_cookie(&self) -> bool {
        self.requested_session_id_from_cookie
    }

    /// Id of the session bound to this request, if any.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Look up (and optionally create) the session for this request.
    ///
    /// # Arguments
    /// * `response` - receives the tracking cookie when a session is created
    /// * `create` - create a session when none is bound or requested
    ///
    /// # Returns
    /// The session, or `None` when there is none and `create` is false.
    pub fn session(
        &mut self,
        response: &mut WebResponse,
        create: bool,
    ) -> Result<Option<Arc<Session>>, EngineError> {
        let app = self.application.clone().ok_or_else(|| {
            EngineError::SessionState("request is not bound to an application".to_string())
        })?;
        let manager = app.sessions();

        let bound = self
            .session_id
            .as_deref()
            .or(self.requested_session_id.as_deref())
            .and_then(|id| manager.lookup(id));

        if let Some(session) = bound {
            session.touch();
            self.session_id = Some(session.id());
            return Ok(Some(session));
        }

        self.session_id = None;
        if create {
            return Ok(Some(manager.create(self, response)));
        }
        Ok(None)
    }

    /// Give the current session a new id.
    pub fn change_session_id(&mut self, response: &mut WebResponse) -> Result<String, EngineError> {
        let app = self.application.clone().ok_or_else(|| {
            EngineError::SessionState("no session active".to_string())
        })?;
        app.sessions().regenerate_id(self, response)
    }
}

impl fmt::Debug for WebRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebRequest")
            .field("request_id", &self.request_id)
            .field("method", &self.method)
            .field("paths", &self.paths)
            .field("dispatch_type", &self.dispatch_type)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

/// Strip the context path from a request URI.
pub fn path_within_context(context_path: &str, request_uri: &str) -> String {
    let rest = request_uri.strip_prefix(context_path).unwrap_or(request_uri);
    if rest.is_empty() {
        "/".to_string()
    } else {
        rest.to_string()
    }
}

fn strip_session_parameter(path: &str) -> (String, Option<String>) {
    let marker = format!(";{}=", SESSION_PATH_PARAMETER);
    match path.find(&marker) {
        Some(start) => {
            let value_start = start + marker.len();
            let rest = &path[value_start..];
            let end = rest.find(['/', ';']).unwrap_or(rest.len());
            let id = rest[..end].to_string();
            let stripped = format!("{}{}", &path[..start], &rest[end..]);
            (stripped, Some(id).filter(|id| !id.is_empty()))
        }
        None => (path.to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_uri_split() {
        let req = WebRequest::new("GET", "/app/echo/x?a=1&b=two%20words");
        assert_eq!(req.request_uri(), "/app/echo/x");
        assert_eq!(req.query_string(), Some("a=1&b=two%20words"));
        assert_eq!(req.parameter("b").as_deref(), Some("two words"));
        assert_eq!(req.parameter("missing"), None);
    }

    #[test]
    fn test_url_session_parameter_is_stripped() {
        let req = WebRequest::new("GET", "/app/page;jsessionid=abc123?x=1");
        assert_eq!(req.request_uri(), "/app/page");
        assert_eq!(req.requested_session_id(), Some("abc123"));
        assert!(!req.is_requested_session_id_from_cookie());
    }

    #[test]
    fn test_cookie_lookup() {
        let mut headers = HeaderMap::new();
        headers.insert("cookie", HeaderValue::from_static("a=1; JSESSIONID=xyz; b=2"));
        let req = WebRequest::new("GET", "/").with_headers(headers);
        assert_eq!(req.cookie("JSESSIONID").as_deref(), Some("xyz"));
        assert_eq!(req.cookie("c"), None);
    }

    #[test]
    fn test_start_async_requires_support() {
        let mut req = WebRequest::new("GET", "/app/a");
        assert!(matches!(req.start_async(), Err(EngineError::DispatchState(_))));

        req.async_supported = true;
        req.start_async().unwrap();
        assert_eq!(req.dispatch_type(), DispatchType::Async);
        assert!(req.is_async_started());
        assert!(req.start_async().is_err());
    }

    #[test]
    fn test_clear_wrapper_attributes() {
        let mut req = WebRequest::new("GET", "/a");
        req.async_supported = true;
        req.start_async().unwrap();
        req.set_attribute("keep", 1);
        req.set_attribute(ASYNC_REQUEST_URI, "/a");
        req.async_state
            .as_mut()
            .unwrap()
            .owned_attributes
            .insert(ASYNC_REQUEST_URI.to_string());

        assert_eq!(req.wrapper_attributes(), vec![ASYNC_REQUEST_URI.to_string()]);
        req.clear_wrapper_attributes();
        assert!(req.attribute(ASYNC_REQUEST_URI).is_none());
        assert!(req.attribute("keep").is_some());
    }

    #[test]
    fn test_path_within_context() {
        assert_eq!(path_within_context("/app", "/app"), "/");
        assert_eq!(path_within_context("/app", "/app/x"), "/x");
        assert_eq!(path_within_context("", "/x"), "/x");
    }
}
