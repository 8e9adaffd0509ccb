//! Filter chain selection and the chain cursor.
//!
//! # Responsibilities
//! - Pick the filters that apply to a handler, path and dispatch type
//! - Run them in order, ending at the handler
//!
//! # Design Decisions
//! - Selection walks the application-wide mapping list in order; a filter
//!   joins the chain at its first matching mapping and never twice
//! - "Before" mappings precede "after" mappings in that list, so the chain
//!   order is registration order within each group
//! - A filter that does not call `do_filter` ends the chain; the handler is
//!   not reached and that is not an error

use std::sync::Arc;

use crate::webapp::environment::FilterMapping;
use crate::webapp::error::ServiceResult;
use crate::webapp::handler::{Filter, Handler};
use crate::webapp::request::{DispatchType, WebRequest};
use crate::webapp::response::WebResponse;

/// Names of the filters that apply, in chain order.
///
/// `path` is the path within the context, or `None` for a named dispatch.
pub fn select_filters<'a>(
    mappings: &'a [FilterMapping],
    handler_name: &str,
    path: Option<&str>,
    dispatch: DispatchType,
) -> Vec<&'a str> {
    let mut selected: Vec<&str> = Vec::new();
    for mapping in mappings {
        if selected.contains(&mapping.filter_name.as_str()) {
            continue;
        }
        if mapping.applies(handler_name, path, dispatch) {
            selected.push(&mapping.filter_name);
        }
    }
    selected
}

/// An ordered, immutable filter sequence with a cursor.
pub struct FilterChain {
    filters: Vec<(String, Arc<dyn Filter>)>,
    handler: Option<(String, Arc<dyn Handler>)>,
    cursor: usize,
    async_supported: bool,
}

impl FilterChain {
    pub fn new(filters: Vec<(String, Arc<dyn Filter>)>, handler: Option<(String, Arc<dyn Handler>)>) -> Self {
        Self {
            filters,
            handler,
            cursor: 0,
            async_supported: false,
        }
    }

    /// Record whether the handler and every filter support async processing.
    pub fn with_async_supported(mut self, supported: bool) -> Self {
        self.async_supported = supported;
        self
    }

    pub fn is_async_supported(&self) -> bool {
        self.async_supported
    }

    pub fn filter_names(&self) -> Vec<&str> {
        self.filters.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn handler_name(&self) -> Option<&str> {
        self.handler.as_ref().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Invoke the next filter, or the handler once the filters are exhausted.
    pub fn do_filter(&mut self, request: &mut WebRequest, response: &mut WebResponse) -> ServiceResult {
        if let Some((name, filter)) = self.filters.get(self.cursor) {
            let filter = Arc::clone(filter);
            tracing::trace!(
                request_id = %request.request_id(),
                filter = %name,
                position = self.cursor,
                "Invoking filter"
            );
            self.cursor += 1;
            return filter.do_filter(request, response, self);
        }

        let Some((name, handler)) = self.handler.as_ref() else {
            return Ok(());
        };
        let handler = Arc::clone(handler);
        tracing::trace!(
            request_id = %request.request_id(),
            handler = %name,
            "Invoking handler"
        );
        handler.service(request, response)
    }
}
