//! Worker-scoped "current request" pointer.
//!
//! Each blocking worker runs one request at a time, so the pointer lives in a
//! thread-local. It is only changed through [`CurrentRequestGuard`], which
//! restores the previous value on drop, including during a panic unwind.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::webapp::request::{DispatchType, PathElements, WebRequest};

/// Snapshot of a request view taken at dispatch entry.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub request_id: String,
    pub handler_name: Option<String>,
    pub dispatch_type: DispatchType,
    pub paths: PathElements,
    pub attributes: HashMap<String, Value>,
}

impl DispatchContext {
    pub fn capture(request: &WebRequest) -> Self {
        Self {
            request_id: request.request_id().to_string(),
            handler_name: request.handler_name().map(str::to_string),
            dispatch_type: request.dispatch_type(),
            paths: request.path_elements().clone(),
            attributes: request.attributes().clone(),
        }
    }
}

thread_local! {
    static CURRENT_REQUEST: RefCell<Option<Arc<DispatchContext>>> = const { RefCell::new(None) };
}

/// Guard that restores the previous current request on drop.
#[must_use]
pub struct CurrentRequestGuard {
    prev: Option<Arc<DispatchContext>>,
}

impl Drop for CurrentRequestGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        CURRENT_REQUEST.with(|slot| {
            *slot.borrow_mut() = prev;
        });
    }
}

/// Make `context` the current request until the guard drops.
pub fn enter(context: DispatchContext) -> CurrentRequestGuard {
    let prev = CURRENT_REQUEST.with(|slot| slot.borrow_mut().replace(Arc::new(context)));
    CurrentRequestGuard { prev }
}

/// The current request on this worker, if a dispatch is in progress.
#[must_use]
pub fn current() -> Option<Arc<DispatchContext>> {
    CURRENT_REQUEST.with(|slot| slot.borrow().clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(uri: &str, dispatch: DispatchType) -> DispatchContext {
        let mut ctx = DispatchContext::capture(&WebRequest::new("GET", uri));
        ctx.dispatch_type = dispatch;
        ctx
    }

    #[test]
    fn test_nested_guards_restore() {
        assert!(current().is_none());
        {
            let _outer = enter(context("/a", DispatchType::Request));
            assert_eq!(current().unwrap().paths.request_uri, "/a");
            {
                let _inner = enter(context("/b", DispatchType::Forward));
                assert_eq!(current().unwrap().dispatch_type, DispatchType::Forward);
            }
            assert_eq!(current().unwrap().paths.request_uri, "/a");
        }
        assert!(current().is_none());
    }

    #[test]
    fn test_restored_after_panic() {
        let _outer = enter(context("/outer", DispatchType::Request));
        let result = std::panic::catch_unwind(|| {
            let _inner = enter(context("/inner", DispatchType::Forward));
            panic!("handler failure");
        });
        assert!(result.is_err());
        assert_eq!(current().unwrap().paths.request_uri, "/outer");
    }

    #[test]
    fn test_workers_do_not_share() {
        let _guard = enter(context("/main", DispatchType::Request));
        let seen = std::thread::spawn(|| current().is_none()).join().unwrap();
        assert!(seen);
    }
}
