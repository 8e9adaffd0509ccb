//! A deployed application: registries, lifecycle and dispatch entry points.
//!
//! # Responsibilities
//! - Register handlers, filters, mappings and application settings
//! - Move through `Created → Initialized → Running → Stopped`
//! - Resolve paths to handlers and build filter chains
//! - Hand out request dispatchers for forward and include
//!
//! # Design Decisions
//! - All registration data lives in one immutable [`Registry`] snapshot
//!   published through `ArcSwap`; request threads never take a lock to read it
//! - Writers clone the snapshot, mutate the clone and publish it under a
//!   mutex, so a failed mutation publishes nothing
//! - Mutations are rejected once the application is running
//!
//! # Data Flow
//! ```text
//! configuration → add_handler / add_filter / add_mapping (Created)
//!     → initialize (realize filters + load-on-startup handlers)
//!     → start (Running, registries frozen)
//!     → resolve / build_chain / request_dispatcher (per request)
//!     → stop (destroy instances, invalidate sessions)
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;

use crate::dispatch::chain::{select_filters, FilterChain};
use crate::dispatch::dispatcher::RequestDispatcher;
use crate::routing::mapping::{MappingMatch, MappingTable};
use crate::routing::matcher::UrlPattern;
use crate::session::SessionManager;
use crate::webapp::environment::{
    FilterEnvironment, FilterMapping, HandlerEnvironment, InitParameters, MappingTarget,
};
use crate::webapp::error::EngineError;
use crate::webapp::handler::{
    ComponentConfig, ComponentSource, Filter, Handler, Instantiator,
};
use crate::webapp::mime::MimeTypeManager;
use crate::webapp::request::DispatchType;

/// Application lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Created,
    Initialized,
    Running,
    Stopped,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LifecycleState::Created,
            1 => LifecycleState::Initialized,
            2 => LifecycleState::Running,
            _ => LifecycleState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            LifecycleState::Created => 0,
            LifecycleState::Initialized => 1,
            LifecycleState::Running => 2,
            LifecycleState::Stopped => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Created => "created",
            LifecycleState::Initialized => "initialized",
            LifecycleState::Running => "running",
            LifecycleState::Stopped => "stopped",
        }
    }
}

/// Error-page table: fault type or status code → location.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorPages {
    by_status: BTreeMap<u16, String>,
    by_fault: BTreeMap<String, String>,
}

impl ErrorPages {
    /// Location for a failure; a fault-type entry wins over a status entry.
    pub fn location_for(&self, status: u16, fault: Option<&str>) -> Option<&str> {
        fault
            .and_then(|f| self.by_fault.get(f))
            .or_else(|| self.by_status.get(&status))
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.by_status.is_empty() && self.by_fault.is_empty()
    }
}

#[derive(Clone, Default)]
pub(crate) struct Registry {
    handlers: Vec<HandlerEnvironment>,
    filters: Vec<FilterEnvironment>,
    filter_mappings: Vec<FilterMapping>,
    mappings: MappingTable,
    context_params: InitParameters,
    welcome_files: Vec<String>,
    error_pages: ErrorPages,
    roles: BTreeSet<String>,
    mime: MimeTypeManager,
}

impl Registry {
    fn handler(&self, name: &str) -> Option<&HandlerEnvironment> {
        self.handlers.iter().find(|h| h.name == name)
    }

    fn handler_mut(&mut self, name: &str) -> Result<&mut HandlerEnvironment, EngineError> {
        self.handlers
            .iter_mut()
            .find(|h| h.name == name)
            .ok_or_else(|| EngineError::UnknownHandler {
                name: name.to_string(),
            })
    }

    fn filter(&self, name: &str) -> Option<&FilterEnvironment> {
        self.filters.iter().find(|f| f.name == name)
    }

    fn filter_mut(&mut self, name: &str) -> Result<&mut FilterEnvironment, EngineError> {
        self.filters
            .iter_mut()
            .find(|f| f.name == name)
            .ok_or_else(|| EngineError::InvalidArgument(format!("no filter named '{}'", name)))
    }

    fn insert_filter_mapping(&mut self, mapping: FilterMapping) {
        if mapping.match_after {
            self.filter_mappings.push(mapping);
        } else {
            let position = self
                .filter_mappings
                .iter()
                .position(|m| m.match_after)
                .unwrap_or(self.filter_mappings.len());
            self.filter_mappings.insert(position, mapping);
        }
    }
}

/// An isolated deployed application.
pub struct WebApplication {
    name: String,
    context_path: String,
    hosts: Vec<String>,
    state: AtomicU8,
    registry: ArcSwap<Registry>,
    write_lock: Mutex<()>,
    instantiator: Arc<dyn Instantiator>,
    attributes: DashMap<String, Value>,
    sessions: SessionManager,
}

impl WebApplication {
    /// Create an application at `context_path` (`""` or `"/"` for the root).
    pub fn new(
        name: impl Into<String>,
        context_path: &str,
        instantiator: Arc<dyn Instantiator>,
    ) -> Self {
        let context_path = normalize_context_path(context_path);
        Self {
            name: name.into(),
            sessions: SessionManager::new(context_path.clone()),
            context_path,
            hosts: Vec::new(),
            state: AtomicU8::new(LifecycleState::Created.as_u8()),
            registry: ArcSwap::from_pointee(Registry::default()),
            write_lock: Mutex::new(()),
            instantiator,
            attributes: DashMap::new(),
        }
    }

    /// Restrict the application to these virtual hosts (case-insensitive).
    pub fn with_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.hosts = hosts
            .into_iter()
            .map(|h| h.as_ref().to_ascii_lowercase())
            .collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// True if the application serves `host` (port already stripped, lowercase).
    pub fn serves_host(&self, host: Option<&str>) -> bool {
        if self.hosts.is_empty() {
            return true;
        }
        host.is_some_and(|h| self.hosts.iter().any(|candidate| candidate == h))
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    fn set_state(&self, state: LifecycleState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn write_guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply `f` to a copy of the registry and publish it on success.
    fn mutate<R, F>(&self, f: F) -> Result<R, EngineError>
    where
        F: FnOnce(&mut Registry) -> Result<R, EngineError>,
    {
        let _guard = self.write_guard();
        match self.state() {
            LifecycleState::Created | LifecycleState::Initialized => {}
            LifecycleState::Running | LifecycleState::Stopped => {
                return Err(EngineError::AlreadyInitialized {
                    context_path: self.context_path.clone(),
                })
            }
        }
        let mut next = Registry::clone(&self.registry.load());
        let result = f(&mut next)?;
        self.registry.store(Arc::new(next));
        Ok(result)
    }

    // --- handler registration ---

    /// Register a handler from an instance or a class reference.
    pub fn add_handler(
        &self,
        name: &str,
        source: impl Into<ComponentSource<dyn Handler>>,
    ) -> Result<HandlerRegistration<'_>, EngineError> {
        if name.is_empty() {
            return Err(EngineError::InvalidArgument(
                "handler name must not be empty".to_string(),
            ));
        }
        let source = source.into();
        self.mutate(|registry| {
            if registry.handler(name).is_some() {
                return Err(EngineError::DuplicateRegistration {
                    kind: "handler",
                    name: name.to_string(),
                });
            }
            registry.handlers.push(HandlerEnvironment::new(name, source));
            Ok(())
        })?;
        tracing::debug!(context_path = %self.context_path, handler = %name, "Handler registered");
        Ok(HandlerRegistration {
            app: self,
            name: name.to_string(),
        })
    }

    /// Mutator handle for an existing handler.
    pub fn handler_registration(&self, name: &str) -> Option<HandlerRegistration<'_>> {
        self.registry.load().handler(name).map(|_| HandlerRegistration {
            app: self,
            name: name.to_string(),
        })
    }

    /// Snapshot of a handler's environment record.
    pub fn handler_environment(&self, name: &str) -> Option<HandlerEnvironment> {
        self.registry.load().handler(name).cloned()
    }

    pub fn handler_names(&self) -> Vec<String> {
        self.registry
            .load()
            .handlers
            .iter()
            .map(|h| h.name.clone())
            .collect()
    }

    /// Map URL patterns to a handler; all-or-nothing.
    ///
    /// # Returns
    /// The accepted pattern set, or `MappingConflict` if any pattern is bound
    /// to a different handler (the table is unchanged).
    pub fn add_mapping(&self, handler: &str, patterns: &[&str]) -> Result<BTreeSet<String>, EngineError> {
        self.mutate(|registry| {
            if registry.handler(handler).is_none() {
                return Err(EngineError::UnknownHandler {
                    name: handler.to_string(),
                });
            }
            registry.mappings.add(handler, patterns)
        })
    }

    // --- filter registration ---

    /// Register a filter from an instance or a class reference.
    pub fn add_filter(
        &self,
        name: &str,
        source: impl Into<ComponentSource<dyn Filter>>,
    ) -> Result<FilterRegistration<'_>, EngineError> {
        if name.is_empty() {
            return Err(EngineError::InvalidArgument(
                "filter name must not be empty".to_string(),
            ));
        }
        let source = source.into();
        self.mutate(|registry| {
            if registry.filter(name).is_some() {
                return Err(EngineError::DuplicateRegistration {
                    kind: "filter",
                    name: name.to_string(),
                });
            }
            registry.filters.push(FilterEnvironment::new(name, source));
            Ok(())
        })?;
        tracing::debug!(context_path = %self.context_path, filter = %name, "Filter registered");
        Ok(FilterRegistration {
            app: self,
            name: name.to_string(),
        })
    }

    pub fn filter_registration(&self, name: &str) -> Option<FilterRegistration<'_>> {
        self.registry.load().filter(name).map(|_| FilterRegistration {
            app: self,
            name: name.to_string(),
        })
    }

    pub fn filter_environment(&self, name: &str) -> Option<FilterEnvironment> {
        self.registry.load().filter(name).cloned()
    }

    /// Filter mappings in chain-selection order.
    pub fn filter_mappings(&self) -> Vec<FilterMapping> {
        self.registry.load().filter_mappings.clone()
    }

    // --- context settings ---

    /// Set a context init parameter; first write wins.
    pub fn set_init_parameter(&self, name: &str, value: &str) -> Result<bool, EngineError> {
        self.mutate(|registry| registry.context_params.set(name, value))
    }

    /// Set many context init parameters; returns the keys that already existed.
    pub fn set_init_parameters(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<BTreeSet<String>, EngineError> {
        self.mutate(|registry| registry.context_params.set_all(params))
    }

    pub fn init_parameter(&self, name: &str) -> Option<String> {
        self.registry
            .load()
            .context_params
            .get(name)
            .map(str::to_string)
    }

    pub fn add_welcome_file(&self, file: &str) -> Result<(), EngineError> {
        self.mutate(|registry| {
            if !registry.welcome_files.iter().any(|f| f == file) {
                registry.welcome_files.push(file.to_string());
            }
            Ok(())
        })
    }

    pub fn welcome_files(&self) -> Vec<String> {
        self.registry.load().welcome_files.clone()
    }

    pub fn add_error_page_for_status(&self, status: u16, location: &str) -> Result<(), EngineError> {
        self.mutate(|registry| {
            registry
                .error_pages
                .by_status
                .insert(status, location.to_string());
            Ok(())
        })
    }

    pub fn add_error_page_for_fault(&self, fault: &str, location: &str) -> Result<(), EngineError> {
        self.mutate(|registry| {
            registry
                .error_pages
                .by_fault
                .insert(fault.to_string(), location.to_string());
            Ok(())
        })
    }

    pub fn error_page_for(&self, status: u16, fault: Option<&str>) -> Option<String> {
        self.registry
            .load()
            .error_pages
            .location_for(status, fault)
            .map(str::to_string)
    }

    pub fn declare_roles<I, S>(&self, roles: I) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let roles: Vec<String> = roles.into_iter().map(Into::into).collect();
        self.mutate(|registry| {
            registry.roles.extend(roles);
            Ok(())
        })
    }

    pub fn roles(&self) -> BTreeSet<String> {
        self.registry.load().roles.clone()
    }

    pub fn add_mime_type(&self, extension: &str, mime_type: &str) -> Result<(), EngineError> {
        self.mutate(|registry| {
            registry.mime.add(extension, mime_type);
            Ok(())
        })
    }

    pub fn mime_type(&self, filename: &str) -> Option<String> {
        self.registry
            .load()
            .mime
            .mime_type(filename)
            .map(str::to_string)
    }

    // --- attributes ---

    pub fn attribute(&self, name: &str) -> Option<Value> {
        self.attributes.get(name).map(|v| v.value().clone())
    }

    pub fn set_attribute(&self, name: &str, value: impl Into<Value>) {
        self.attributes.insert(name.to_string(), value.into());
    }

    pub fn remove_attribute(&self, name: &str) -> Option<Value> {
        self.attributes.remove(name).map(|(_, v)| v)
    }

    // --- resolution and chains ---

    /// Resolve a path within this application's context to a handler.
    pub fn resolve(&self, path: &str) -> Result<MappingMatch, EngineError> {
        self.registry
            .load()
            .mappings
            .resolve(path)
            .ok_or_else(|| EngineError::NoSuchResource {
                context_path: self.context_path.clone(),
                path: path.to_string(),
            })
    }

    /// Realize (on first use) and return a handler instance.
    pub fn realize_handler(&self, name: &str) -> Result<Arc<dyn Handler>, EngineError> {
        let registry = self.registry.load();
        let env = registry
            .handler(name)
            .ok_or_else(|| EngineError::UnknownHandler {
                name: name.to_string(),
            })?;
        self.realize_handler_env(env)
    }

    fn realize_handler_env(&self, env: &HandlerEnvironment) -> Result<Arc<dyn Handler>, EngineError> {
        let config = self.component_config(&env.name, &env.init_params);
        env.slot.realize(
            &env.name,
            |class| self.instantiator.instantiate_handler(class),
            |handler| handler.init(&config),
        )
    }

    fn realize_filter_env(&self, env: &FilterEnvironment) -> Result<Arc<dyn Filter>, EngineError> {
        let config = self.component_config(&env.name, &env.init_params);
        env.slot.realize(
            &env.name,
            |class| self.instantiator.instantiate_filter(class),
            |filter| filter.init(&config),
        )
    }

    fn component_config(&self, name: &str, params: &InitParameters) -> ComponentConfig {
        ComponentConfig {
            name: name.to_string(),
            init_params: params.to_map(),
            context_path: self.context_path.clone(),
        }
    }

    /// Build the filter chain for `handler_name`.
    ///
    /// # Arguments
    /// * `path` - path within the context, or `None` for a named dispatch
    /// * `dispatch` - dispatch type the chain is built for
    pub fn build_chain(
        &self,
        handler_name: &str,
        path: Option<&str>,
        dispatch: DispatchType,
    ) -> Result<FilterChain, EngineError> {
        let registry = self.registry.load();
        let handler_env = registry
            .handler(handler_name)
            .ok_or_else(|| EngineError::UnknownHandler {
                name: handler_name.to_string(),
            })?;

        let mut async_supported = handler_env.async_supported;
        let mut filters = Vec::new();
        for name in select_filters(&registry.filter_mappings, handler_name, path, dispatch) {
            let Some(env) = registry.filter(name) else {
                continue;
            };
            async_supported &= env.async_supported;
            filters.push((name.to_string(), self.realize_filter_env(env)?));
        }
        let handler = self.realize_handler_env(handler_env)?;

        tracing::trace!(
            context_path = %self.context_path,
            handler = %handler_name,
            dispatch = %dispatch,
            filters = filters.len(),
            "Filter chain built"
        );
        Ok(FilterChain::new(filters, Some((handler_name.to_string(), handler)))
            .with_async_supported(async_supported))
    }

    /// Dispatcher for a context-relative path such as `/target?x=1`.
    ///
    /// The target is resolved now; an unresolvable path fails here, before
    /// any request or response state is touched.
    pub fn request_dispatcher(self: &Arc<Self>, path: &str) -> Result<RequestDispatcher, EngineError> {
        if !path.starts_with('/') {
            return Err(EngineError::InvalidArgument(format!(
                "dispatch path '{}' must start with '/'",
                path
            )));
        }
        let (path, query) = match path.split_once('?') {
            Some((p, q)) => (p, Some(q.to_string()).filter(|q| !q.is_empty())),
            None => (path, None),
        };
        let matched = self.resolve(path)?;
        Ok(RequestDispatcher::for_path(
            Arc::clone(self),
            path.to_string(),
            query,
            matched,
        ))
    }

    /// Dispatcher addressing a handler by name.
    pub fn named_dispatcher(self: &Arc<Self>, name: &str) -> Result<RequestDispatcher, EngineError> {
        if self.registry.load().handler(name).is_none() {
            return Err(EngineError::UnknownHandler {
                name: name.to_string(),
            });
        }
        Ok(RequestDispatcher::named(Arc::clone(self), name.to_string()))
    }

    // --- lifecycle ---

    /// Realize every filter and each handler with `load_on_startup >= 0`.
    ///
    /// Handlers are initialized in ascending priority, registration order
    /// breaking ties. The first failure is returned tagged with the component
    /// name and the application stays `Created`.
    pub fn initialize(&self) -> Result<(), EngineError> {
        let _guard = self.write_guard();
        let state = self.state();
        if state != LifecycleState::Created {
            return Err(self.lifecycle_error(state, LifecycleState::Initialized));
        }

        let registry = self.registry.load_full();
        for env in &registry.filters {
            self.realize_filter_env(env).inspect_err(|e| {
                tracing::error!(context_path = %self.context_path, error = %e, "Filter initialization failed");
            })?;
        }

        let mut eager: Vec<&HandlerEnvironment> = registry
            .handlers
            .iter()
            .filter(|h| h.load_on_startup >= 0)
            .collect();
        eager.sort_by_key(|h| h.load_on_startup);
        for env in eager {
            self.realize_handler_env(env).inspect_err(|e| {
                tracing::error!(context_path = %self.context_path, error = %e, "Handler initialization failed");
            })?;
        }

        self.set_state(LifecycleState::Initialized);
        tracing::info!(
            application = %self.name,
            context_path = %self.context_path,
            handlers = registry.handlers.len(),
            filters = registry.filters.len(),
            "Application initialized"
        );
        Ok(())
    }

    /// Initialize if needed, then freeze registries and accept requests.
    pub fn start(&self) -> Result<(), EngineError> {
        if self.state() == LifecycleState::Created {
            self.initialize()?;
        }
        let _guard = self.write_guard();
        let state = self.state();
        if state != LifecycleState::Initialized {
            return Err(self.lifecycle_error(state, LifecycleState::Running));
        }
        self.set_state(LifecycleState::Running);
        tracing::info!(application = %self.name, context_path = %self.context_path, "Application started");
        Ok(())
    }

    /// Destroy realized instances and invalidate every session.
    pub fn stop(&self) -> Result<(), EngineError> {
        let _guard = self.write_guard();
        if self.state() == LifecycleState::Stopped {
            return Ok(());
        }
        self.set_state(LifecycleState::Stopped);

        let registry = self.registry.load_full();
        for env in &registry.filters {
            if let Some(filter) = env.slot.close() {
                filter.destroy();
            }
        }
        for env in &registry.handlers {
            if let Some(handler) = env.slot.close() {
                handler.destroy();
            }
        }
        let invalidated = self.sessions.invalidate_all();
        tracing::info!(
            application = %self.name,
            context_path = %self.context_path,
            sessions_invalidated = invalidated,
            "Application stopped"
        );
        Ok(())
    }

    fn lifecycle_error(&self, from: LifecycleState, to: LifecycleState) -> EngineError {
        EngineError::Lifecycle {
            context_path: self.context_path.clone(),
            from: from.as_str(),
            to: to.as_str(),
        }
    }

    // --- diagnostics ---

    /// Read-only view of registrations for diagnostics.
    pub fn mappings_snapshot(&self) -> MappingsSnapshot {
        let registry = self.registry.load();
        MappingsSnapshot {
            name: self.name.clone(),
            context_path: self.context_path.clone(),
            state: self.state(),
            mappings: registry
                .mappings
                .entries()
                .map(|(p, h)| (p.to_string(), h.to_string()))
                .collect(),
            handlers: registry
                .handlers
                .iter()
                .map(|h| HandlerSnapshot {
                    name: h.name.clone(),
                    class: h.class_name().map(str::to_string),
                    patterns: registry.mappings.patterns_for(&h.name),
                    load_on_startup: h.load_on_startup,
                    async_supported: h.async_supported,
                    realized: h.is_realized(),
                })
                .collect(),
            filters: registry
                .filters
                .iter()
                .map(|f| FilterSnapshot {
                    name: f.name.clone(),
                    class: f.class_name().map(str::to_string),
                    async_supported: f.async_supported,
                    realized: f.is_realized(),
                    mappings: registry
                        .filter_mappings
                        .iter()
                        .filter(|m| m.filter_name == f.name)
                        .map(FilterMappingSnapshot::from)
                        .collect(),
                })
                .collect(),
            active_sessions: self.sessions.active_sessions(),
        }
    }
}

impl std::fmt::Debug for WebApplication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebApplication")
            .field("name", &self.name)
            .field("context_path", &self.context_path)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Mutator handle for a registered handler.
pub struct HandlerRegistration<'a> {
    app: &'a WebApplication,
    name: String,
}

impl HandlerRegistration<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_mapping(&self, patterns: &[&str]) -> Result<BTreeSet<String>, EngineError> {
        self.app.add_mapping(&self.name, patterns)
    }

    pub fn mappings(&self) -> BTreeSet<String> {
        self.app.registry.load().mappings.patterns_for(&self.name)
    }

    pub fn set_init_parameter(&self, name: &str, value: &str) -> Result<bool, EngineError> {
        self.app
            .mutate(|r| r.handler_mut(&self.name)?.init_params.set(name, value))
    }

    pub fn set_init_parameters(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<BTreeSet<String>, EngineError> {
        self.app
            .mutate(|r| r.handler_mut(&self.name)?.init_params.set_all(params))
    }

    pub fn init_parameter(&self, name: &str) -> Option<String> {
        self.app
            .registry
            .load()
            .handler(&self.name)
            .and_then(|h| h.init_params.get(name).map(str::to_string))
    }

    pub fn set_load_on_startup(&self, priority: i32) -> Result<(), EngineError> {
        self.app.mutate(|r| {
            r.handler_mut(&self.name)?.load_on_startup = priority;
            Ok(())
        })
    }

    pub fn set_async_supported(&self, supported: bool) -> Result<(), EngineError> {
        self.app.mutate(|r| {
            r.handler_mut(&self.name)?.async_supported = supported;
            Ok(())
        })
    }
}

/// Mutator handle for a registered filter.
pub struct FilterRegistration<'a> {
    app: &'a WebApplication,
    name: String,
}

impl FilterRegistration<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Map the filter to URL patterns.
    ///
    /// An empty `dispatch_types` means direct requests only. `match_after`
    /// places the mapping after every "before" mapping of the application.
    pub fn add_mapping_for_url_patterns(
        &self,
        dispatch_types: &[DispatchType],
        match_after: bool,
        patterns: &[&str],
    ) -> Result<(), EngineError> {
        let parsed = patterns
            .iter()
            .map(|p| UrlPattern::parse(p))
            .collect::<Result<Vec<_>, _>>()?;
        let targets = parsed.into_iter().map(MappingTarget::UrlPattern).collect();
        self.add_mappings(dispatch_types, match_after, targets)
    }

    /// Map the filter to handlers by name (`*` matches every handler).
    pub fn add_mapping_for_handler_names(
        &self,
        dispatch_types: &[DispatchType],
        match_after: bool,
        handler_names: &[&str],
    ) -> Result<(), EngineError> {
        let targets = handler_names
            .iter()
            .map(|n| MappingTarget::HandlerName(n.to_string()))
            .collect();
        self.add_mappings(dispatch_types, match_after, targets)
    }

    fn add_mappings(
        &self,
        dispatch_types: &[DispatchType],
        match_after: bool,
        targets: Vec<MappingTarget>,
    ) -> Result<(), EngineError> {
        let dispatch_types: BTreeSet<DispatchType> = if dispatch_types.is_empty() {
            FilterMapping::default_dispatch_types()
        } else {
            dispatch_types.iter().copied().collect()
        };
        self.app.mutate(|r| {
            r.filter_mut(&self.name)?;
            for target in targets {
                r.insert_filter_mapping(FilterMapping {
                    filter_name: self.name.clone(),
                    target,
                    dispatch_types: dispatch_types.clone(),
                    match_after,
                });
            }
            Ok(())
        })
    }

    pub fn url_pattern_mappings(&self) -> Vec<String> {
        self.mapping_targets(|t| match t {
            MappingTarget::UrlPattern(p) => Some(p.to_string()),
            MappingTarget::HandlerName(_) => None,
        })
    }

    pub fn handler_name_mappings(&self) -> Vec<String> {
        self.mapping_targets(|t| match t {
            MappingTarget::HandlerName(n) => Some(n.clone()),
            MappingTarget::UrlPattern(_) => None,
        })
    }

    fn mapping_targets<F>(&self, pick: F) -> Vec<String>
    where
        F: Fn(&MappingTarget) -> Option<String>,
    {
        self.app
            .registry
            .load()
            .filter_mappings
            .iter()
            .filter(|m| m.filter_name == self.name)
            .filter_map(|m| pick(&m.target))
            .collect()
    }

    pub fn set_init_parameter(&self, name: &str, value: &str) -> Result<bool, EngineError> {
        self.app
            .mutate(|r| r.filter_mut(&self.name)?.init_params.set(name, value))
    }

    pub fn set_init_parameters(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<BTreeSet<String>, EngineError> {
        self.app
            .mutate(|r| r.filter_mut(&self.name)?.init_params.set_all(params))
    }

    pub fn init_parameter(&self, name: &str) -> Option<String> {
        self.app
            .registry
            .load()
            .filter(&self.name)
            .and_then(|f| f.init_params.get(name).map(str::to_string))
    }

    pub fn set_async_supported(&self, supported: bool) -> Result<(), EngineError> {
        self.app.mutate(|r| {
            r.filter_mut(&self.name)?.async_supported = supported;
            Ok(())
        })
    }
}

/// Diagnostics view of an application.
#[derive(Debug, Clone, Serialize)]
pub struct MappingsSnapshot {
    pub name: String,
    pub context_path: String,
    pub state: LifecycleState,
    pub mappings: BTreeMap<String, String>,
    pub handlers: Vec<HandlerSnapshot>,
    pub filters: Vec<FilterSnapshot>,
    pub active_sessions: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HandlerSnapshot {
    pub name: String,
    pub class: Option<String>,
    pub patterns: BTreeSet<String>,
    pub load_on_startup: i32,
    pub async_supported: bool,
    pub realized: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterSnapshot {
    pub name: String,
    pub class: Option<String>,
    pub async_supported: bool,
    pub realized: bool,
    pub mappings: Vec<FilterMappingSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterMappingSnapshot {
    pub url_pattern: Option<String>,
    pub handler_name: Option<String>,
    pub dispatch_types: Vec<DispatchType>,
    pub match_after: bool,
}

impl From<&FilterMapping> for FilterMappingSnapshot {
    fn from(mapping: &FilterMapping) -> Self {
        let (url_pattern, handler_name) = match &mapping.target {
            MappingTarget::UrlPattern(p) => (Some(p.to_string()), None),
            MappingTarget::HandlerName(n) => (None, Some(n.clone())),
        };
        Self {
            url_pattern,
            handler_name,
            dispatch_types: mapping.dispatch_types.iter().copied().collect(),
            match_after: mapping.match_after,
        }
    }
}

fn normalize_context_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}
