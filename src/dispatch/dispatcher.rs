//! Forward, include and asynchronous re-dispatch.
//!
//! # Responsibilities
//! - Build a request view for the dispatch target with rewritten paths
//! - Record the forward/include/async metadata attributes
//! - Run the target and fold session changes back into the caller's request
//!
//! # Design Decisions
//! - The target is resolved when the dispatcher is created, and its chain is
//!   built before the response buffer is touched
//! - Forward re-enters the filter chain builder; include calls the handler
//!   directly and leaves the ambient current request alone
//! - Async forward mutates the live request in place and invokes the handler
//!   directly; it does not share the synchronous forward path

use std::sync::Arc;

use serde_json::Value;

use crate::dispatch::current::{self, DispatchContext};
use crate::observability::metrics;
use crate::routing::mapping::MappingMatch;
use crate::webapp::application::WebApplication;
use crate::webapp::error::{EngineError, ServiceError, ServiceResult};
use crate::webapp::request::{
    DispatchType, PathElements, WebRequest, ASYNC_CONTEXT_PATH, ASYNC_PATH_INFO,
    ASYNC_PREVIOUS_REQUEST, ASYNC_QUERY_STRING, ASYNC_REQUEST_URI, ASYNC_SERVLET_PATH, FORWARD_CONTEXT_PATH,
    FORWARD_PATH_INFO, FORWARD_QUERY_STRING, FORWARD_REQUEST_URI, FORWARD_SERVLET_PATH,
    INCLUDE_CONTEXT_PATH, INCLUDE_PATH_INFO, INCLUDE_QUERY_STRING, INCLUDE_REQUEST_URI,
    INCLUDE_SERVLET_PATH,
};
use crate::webapp::response::WebResponse;

#[derive(Debug, Clone)]
enum DispatchTarget {
    Path {
        path: String,
        query: Option<String>,
        matched: MappingMatch,
    },
    Named {
        handler_name: String,
    },
}

/// A resolved dispatch target inside one application.
#[derive(Debug, Clone)]
pub struct RequestDispatcher {
    app: Arc<WebApplication>,
    target: DispatchTarget,
}

impl RequestDispatcher {
    pub(crate) fn for_path(
        app: Arc<WebApplication>,
        path: String,
        query: Option<String>,
        matched: MappingMatch,
    ) -> Self {
        Self {
            app,
            target: DispatchTarget::Path {
                path,
                query,
                matched,
            },
        }
    }

    pub(crate) fn named(app: Arc<WebApplication>, handler_name: String) -> Self {
        Self {
            app,
            target: DispatchTarget::Named { handler_name },
        }
    }

    /// Name of the handler this dispatcher reaches.
    pub fn handler_name(&self) -> &str {
        match &self.target {
            DispatchTarget::Path { matched, .. } => &matched.handler_name,
            DispatchTarget::Named { handler_name } => handler_name,
        }
    }

    fn target_path(&self) -> Option<&str> {
        match &self.target {
            DispatchTarget::Path { path, .. } => Some(path),
            DispatchTarget::Named { .. } => None,
        }
    }

    /// Path elements the target sees, given the caller's context path.
    fn target_paths(&self, context_path: &str) -> PathElements {
        match &self.target {
            DispatchTarget::Path {
                path,
                query,
                matched,
            } => PathElements {
                request_uri: format!("{}{}", context_path, path),
                context_path: context_path.to_string(),
                servlet_path: matched.servlet_path.clone(),
                path_info: matched.path_info.clone(),
                query_string: query.clone(),
            },
            DispatchTarget::Named { handler_name } => PathElements {
                request_uri: format!("{}/{}", context_path, handler_name),
                context_path: context_path.to_string(),
                servlet_path: format!("/{}", handler_name),
                path_info: None,
                query_string: None,
            },
        }
    }

    /// Replace the response content with the target's output.
    ///
    /// A request in asynchronous mode takes the asynchronous re-dispatch path.
    /// After a synchronous forward the response is closed; later writes by
    /// the caller are dropped.
    pub fn forward(&self, request: &mut WebRequest, response: &mut WebResponse) -> ServiceResult {
        if request.dispatch_type() == DispatchType::Async {
            return self.forward_async(request, response);
        }

        let handler_name = self.handler_name();
        let mut chain = self
            .app
            .build_chain(handler_name, self.target_path(), DispatchType::Forward)?;
        response.reset_buffer();

        let mut view = request.derive(DispatchType::Forward);
        let original = request.path_elements();
        let carried = [
            (FORWARD_REQUEST_URI, Some(original.request_uri.clone())),
            (FORWARD_CONTEXT_PATH, Some(original.context_path.clone())),
            (FORWARD_SERVLET_PATH, Some(original.servlet_path.clone())),
            (FORWARD_PATH_INFO, original.path_info.clone()),
            (FORWARD_QUERY_STRING, original.query_string.clone()),
        ];
        for (key, computed) in carried {
            // Nested forwards keep the values of the first forward.
            if let Some(existing) = request.attribute(key) {
                view.set_attribute(key, existing.clone());
            } else if let Some(value) = computed {
                view.set_attribute(key, value);
            }
        }

        view.paths = self.target_paths(&original.context_path);
        view.handler_name = Some(handler_name.to_string());
        view.async_supported = chain.is_async_supported();

        tracing::debug!(
            request_id = %request.request_id(),
            from = %original.request_uri,
            to = %view.paths.request_uri,
            handler = %handler_name,
            "Forward dispatch"
        );
        metrics::record_dispatch(DispatchType::Forward);

        let result = {
            let _current = current::enter(DispatchContext::capture(&view));
            chain.do_filter(&mut view, response)
        };
        request.adopt_session_state(&view);
        result?;

        response.close();
        Ok(())
    }

    /// Append the target handler's output to the response.
    ///
    /// Only the body is affected; status and header changes made by the
    /// included handler are ignored.
    pub fn include(&self, request: &mut WebRequest, response: &mut WebResponse) -> ServiceResult {
        let handler_name = self.handler_name();
        let handler = self.app.realize_handler(handler_name)?;

        let mut view = request.derive(DispatchType::Include);
        let original = request.path_elements();
        let carried = [
            (INCLUDE_REQUEST_URI, Some(original.request_uri.clone())),
            (INCLUDE_CONTEXT_PATH, Some(original.context_path.clone())),
            (INCLUDE_SERVLET_PATH, Some(original.servlet_path.clone())),
            (INCLUDE_PATH_INFO, original.path_info.clone()),
            (INCLUDE_QUERY_STRING, original.query_string.clone()),
        ];
        for (key, value) in carried {
            match value {
                Some(value) => view.set_attribute(key, value),
                None => {
                    view.remove_attribute(key);
                }
            }
        }

        let target = self.target_paths(&original.context_path);
        view.paths.servlet_path = self
            .target_path()
            .map(str::to_string)
            .unwrap_or(target.servlet_path);
        view.paths.path_info = None;
        view.paths.query_string = None;
        view.handler_name = Some(handler_name.to_string());

        tracing::debug!(
            request_id = %request.request_id(),
            handler = %handler_name,
            depth = response.include_depth() + 1,
            "Include dispatch"
        );
        metrics::record_dispatch(DispatchType::Include);

        response.enter_include();
        let result = handler.service(&mut view, response);
        response.exit_include();
        request.adopt_session_state(&view);
        result
    }

    /// Re-dispatch a request that is in asynchronous mode.
    fn forward_async(&self, request: &mut WebRequest, response: &mut WebResponse) -> ServiceResult {
        let handler_name = self.handler_name();
        let handler = self.app.realize_handler(handler_name)?;

        let start = match request.async_state.as_ref() {
            Some(state) => state.start.clone(),
            None => {
                return Err(ServiceError::from(EngineError::DispatchState(
                    "asynchronous forward requires a request in asynchronous mode".to_string(),
                )))
            }
        };

        let recorded = [
            (ASYNC_REQUEST_URI, Some(start.request_uri.clone())),
            (ASYNC_CONTEXT_PATH, Some(start.context_path.clone())),
            (ASYNC_SERVLET_PATH, Some(start.servlet_path.clone())),
            (ASYNC_PATH_INFO, start.path_info.clone()),
            (ASYNC_QUERY_STRING, start.query_string.clone()),
        ];
        let mut owned = Vec::new();
        for (key, value) in recorded {
            if let Some(value) = value {
                request.set_attribute(key, Value::String(value));
                owned.push(key.to_string());
            }
        }
        let previous = serde_json::to_value(&start)
            .map_err(|e| ServiceError::Failed(format!("cannot record start request: {}", e)))?;
        request.set_attribute(ASYNC_PREVIOUS_REQUEST, previous);
        owned.push(ASYNC_PREVIOUS_REQUEST.to_string());
        if let Some(state) = request.async_state.as_mut() {
            state.owned_attributes.extend(owned);
        }

        let mut target = self.target_paths(&start.context_path);
        if target.query_string.is_none() {
            target.query_string = start.query_string.clone();
        }
        request.paths = target;
        request.handler_name = Some(handler_name.to_string());

        tracing::debug!(
            request_id = %request.request_id(),
            to = %request.paths.request_uri,
            handler = %handler_name,
            "Async dispatch"
        );
        metrics::record_dispatch(DispatchType::Async);

        response.reset_buffer();
        handler.service(request, response)?;
        response.flush_buffer();
        Ok(())
    }
}
