//! Handler and filter capabilities, and the Instantiator seam.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwapOption;

use crate::dispatch::chain::FilterChain;
use crate::webapp::error::{EngineError, InstantiationError, ServiceResult};
use crate::webapp::request::WebRequest;
use crate::webapp::response::WebResponse;

/// Configuration passed to `init`.
#[derive(Debug, Clone, Default)]
pub struct ComponentConfig {
    pub name: String,
    pub init_params: HashMap<String, String>,
    pub context_path: String,
}

impl ComponentConfig {
    pub fn init_param(&self, name: &str) -> Option<&str> {
        self.init_params.get(name).map(String::as_str)
    }
}

/// A unit of request processing addressed by name and URL pattern.
///
/// Handlers run on a blocking worker; they may block on I/O.
pub trait Handler: Send + Sync {
    fn init(&self, _config: &ComponentConfig) -> ServiceResult {
        Ok(())
    }

    fn service(&self, request: &mut WebRequest, response: &mut WebResponse) -> ServiceResult;

    fn destroy(&self) {}
}

/// An interceptor run before the handler.
///
/// Calling `chain.do_filter` continues to the next filter or the handler;
/// returning without calling it short-circuits the chain.
pub trait Filter: Send + Sync {
    fn init(&self, _config: &ComponentConfig) -> ServiceResult {
        Ok(())
    }

    fn do_filter(
        &self,
        request: &mut WebRequest,
        response: &mut WebResponse,
        chain: &mut FilterChain,
    ) -> ServiceResult;

    fn destroy(&self) {}
}

/// Realizes handlers and filters from class references.
pub trait Instantiator: Send + Sync {
    fn instantiate_handler(&self, class: &str) -> Result<Arc<dyn Handler>, InstantiationError>;

    fn instantiate_filter(&self, class: &str) -> Result<Arc<dyn Filter>, InstantiationError>;
}

/// Where a component comes from.
pub enum ComponentSource<T: ?Sized> {
    /// Pre-built instance.
    Instance(Arc<T>),
    /// Class reference realized by the Instantiator on first use.
    Class(String),
}

impl<T: ?Sized> Clone for ComponentSource<T> {
    fn clone(&self) -> Self {
        match self {
            ComponentSource::Instance(i) => ComponentSource::Instance(Arc::clone(i)),
            ComponentSource::Class(c) => ComponentSource::Class(c.clone()),
        }
    }
}

impl<T: ?Sized> ComponentSource<T> {
    /// Class reference, or `None` for pre-built instances.
    pub fn class_name(&self) -> Option<&str> {
        match self {
            ComponentSource::Instance(_) => None,
            ComponentSource::Class(c) => Some(c),
        }
    }
}

impl From<Arc<dyn Handler>> for ComponentSource<dyn Handler> {
    fn from(handler: Arc<dyn Handler>) -> Self {
        ComponentSource::Instance(handler)
    }
}

impl From<Arc<dyn Filter>> for ComponentSource<dyn Filter> {
    fn from(filter: Arc<dyn Filter>) -> Self {
        ComponentSource::Instance(filter)
    }
}

impl<T: ?Sized> From<&str> for ComponentSource<T> {
    fn from(class: &str) -> Self {
        ComponentSource::Class(class.to_string())
    }
}

impl<T: ?Sized> From<String> for ComponentSource<T> {
    fn from(class: String) -> Self {
        ComponentSource::Class(class)
    }
}

/// Lazily realized component instance.
///
/// Reads are lock-free; realization is serialized so `init` runs once.
/// Once closed the slot never realizes again.
pub struct ComponentSlot<T: ?Sized> {
    source: ComponentSource<T>,
    instance: ArcSwapOption<Arc<T>>,
    realize_lock: Mutex<()>,
    closed: AtomicBool,
}

impl<T: ?Sized> ComponentSlot<T> {
    pub fn new(source: ComponentSource<T>) -> Self {
        Self {
            source,
            instance: ArcSwapOption::empty(),
            realize_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn source(&self) -> &ComponentSource<T> {
        &self.source
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.instance.load_full().map(|outer| Arc::clone(&*outer))
    }

    pub fn is_realized(&self) -> bool {
        self.instance.load().is_some()
    }

    /// Return the instance, building and initializing it on first use.
    ///
    /// Failures are tagged with `name` and leave the slot empty.
    pub fn realize<B, I>(&self, name: &str, build: B, init: I) -> Result<Arc<T>, EngineError>
    where
        B: FnOnce(&str) -> Result<Arc<T>, InstantiationError>,
        I: FnOnce(&T) -> ServiceResult,
    {
        if let Some(instance) = self.get() {
            return Ok(instance);
        }

        let _guard = self
            .realize_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(instance) = self.get() {
            return Ok(instance);
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Unavailable {
                name: name.to_string(),
            });
        }

        let initialization = |source| EngineError::Initialization {
            name: name.to_string(),
            source,
        };
        let instance = match &self.source {
            ComponentSource::Instance(i) => Arc::clone(i),
            ComponentSource::Class(class) => build(class).map_err(initialization)?,
        };
        init(&*instance).map_err(|e| initialization(InstantiationError::Init(Box::new(e))))?;

        self.instance.store(Some(Arc::new(Arc::clone(&instance))));
        Ok(instance)
    }

    /// Close the slot and remove the instance; the caller runs `destroy`.
    ///
    /// Waits for an in-progress realization, so no instance is stored after
    /// this returns.
    pub fn close(&self) -> Option<Arc<T>> {
        let _guard = self
            .realize_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.closed.store(true, Ordering::Release);
        self.instance.swap(None).map(|outer| Arc::clone(&*outer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webapp::error::ServiceError;
    use std::sync::atomic::AtomicUsize;

    struct Counting {
        inits: AtomicUsize,
        fail: bool,
    }

    impl Handler for Counting {
        fn init(&self, _config: &ComponentConfig) -> ServiceResult {
            self.inits.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ServiceError::Failed("boom".into()));
            }
            Ok(())
        }

        fn service(&self, _req: &mut WebRequest, _resp: &mut WebResponse) -> ServiceResult {
            Ok(())
        }
    }

    #[test]
    fn test_realize_runs_init_once() {
        let handler = Arc::new(Counting {
            inits: AtomicUsize::new(0),
            fail: false,
        });
        let slot: ComponentSlot<dyn Handler> =
            ComponentSlot::new(ComponentSource::Instance(handler.clone()));
        let config = ComponentConfig::default();

        for _ in 0..3 {
            slot.realize("h", |_| unreachable!(), |h| h.init(&config)).unwrap();
        }
        assert_eq!(handler.inits.load(Ordering::SeqCst), 1);
        assert!(slot.is_realized());
        assert!(slot.close().is_some());
        assert!(!slot.is_realized());
    }

    #[test]
    fn test_closed_slot_does_not_realize_again() {
        let handler = Arc::new(Counting {
            inits: AtomicUsize::new(0),
            fail: false,
        });
        let slot: ComponentSlot<dyn Handler> =
            ComponentSlot::new(ComponentSource::Instance(handler.clone()));
        let config = ComponentConfig::default();
        slot.realize("h", |_| unreachable!(), |h| h.init(&config)).unwrap();
        slot.close();

        let err = slot
            .realize("h", |_| unreachable!(), |h| h.init(&config))
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Unavailable { .. }));
        assert_eq!(handler.inits.load(Ordering::SeqCst), 1);
        assert!(!slot.is_realized());
    }

    #[test]
    fn test_unknown_class_is_tagged_with_name() {
        let slot: ComponentSlot<dyn Handler> = ComponentSlot::new("com.example.Missing".into());
        let err = slot
            .realize(
                "missing",
                |class| Err(InstantiationError::UnknownClass(class.to_string())),
                |_| Ok(()),
            )
            .err()
            .unwrap();
        match err {
            EngineError::Initialization { name, .. } => assert_eq!(name, "missing"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!slot.is_realized());
    }

    #[test]
    fn test_failed_init_leaves_slot_empty() {
        let handler = Arc::new(Counting {
            inits: AtomicUsize::new(0),
            fail: true,
        });
        let slot: ComponentSlot<dyn Handler> =
            ComponentSlot::new(ComponentSource::Instance(handler));
        let config = ComponentConfig::default();
        assert!(slot.realize("h", |_| unreachable!(), |h| h.init(&config)).is_err());
        assert!(!slot.is_realized());
    }
}
