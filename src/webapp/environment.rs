//! Handler and filter environment records.
//!
//! # Responsibilities
//! - Hold per-registration metadata: init parameters, load priority,
//!   async capability, filter mappings
//! - Own the lazily realized instance through a [`ComponentSlot`]
//!
//! # Design Decisions
//! - Records are plain values cloned into each registry snapshot; the
//!   instance slot is shared between snapshots through an `Arc`
//! - Init parameters are write-once per key

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;

use crate::routing::matcher::UrlPattern;
use crate::webapp::error::EngineError;
use crate::webapp::handler::{ComponentSlot, ComponentSource, Filter, Handler};
use crate::webapp::request::DispatchType;

/// Write-once init parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InitParameters {
    params: BTreeMap<String, String>,
}

impl InitParameters {
    /// Set a parameter unless the key already exists.
    ///
    /// # Returns
    /// `Ok(false)` without mutating when the key is already present;
    /// `InvalidParameter` for an empty name.
    pub fn set(&mut self, name: &str, value: &str) -> Result<bool, EngineError> {
        if name.is_empty() {
            return Err(EngineError::InvalidParameter {
                reason: "init parameter name must not be empty".to_string(),
            });
        }
        if self.params.contains_key(name) {
            return Ok(false);
        }
        self.params.insert(name.to_string(), value.to_string());
        Ok(true)
    }

    /// Set many parameters at once.
    ///
    /// Keys that already exist are left unchanged and returned as conflicts.
    /// An empty name rejects the whole call before anything is written.
    pub fn set_all(
        &mut self,
        params: &HashMap<String, String>,
    ) -> Result<BTreeSet<String>, EngineError> {
        if params.keys().any(String::is_empty) {
            return Err(EngineError::InvalidParameter {
                reason: "init parameter name must not be empty".to_string(),
            });
        }
        let mut conflicts = BTreeSet::new();
        for (name, value) in params {
            if self.params.contains_key(name) {
                conflicts.insert(name.clone());
            } else {
                self.params.insert(name.clone(), value.clone());
            }
        }
        Ok(conflicts)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn to_map(&self) -> HashMap<String, String> {
        self.params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Registration record of a handler.
#[derive(Clone)]
pub struct HandlerEnvironment {
    pub(crate) name: String,
    pub(crate) init_params: InitParameters,
    /// Negative means realize lazily on first dispatch.
    pub(crate) load_on_startup: i32,
    pub(crate) async_supported: bool,
    pub(crate) slot: Arc<ComponentSlot<dyn Handler>>,
}

impl HandlerEnvironment {
    pub(crate) fn new(name: &str, source: ComponentSource<dyn Handler>) -> Self {
        Self {
            name: name.to_string(),
            init_params: InitParameters::default(),
            load_on_startup: -1,
            async_supported: false,
            slot: Arc::new(ComponentSlot::new(source)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn init_params(&self) -> &InitParameters {
        &self.init_params
    }

    pub fn load_on_startup(&self) -> i32 {
        self.load_on_startup
    }

    pub fn is_async_supported(&self) -> bool {
        self.async_supported
    }

    pub fn class_name(&self) -> Option<&str> {
        self.slot.source().class_name()
    }

    pub fn is_realized(&self) -> bool {
        self.slot.is_realized()
    }
}

/// Registration record of a filter.
#[derive(Clone)]
pub struct FilterEnvironment {
    pub(crate) name: String,
    pub(crate) init_params: InitParameters,
    pub(crate) async_supported: bool,
    pub(crate) slot: Arc<ComponentSlot<dyn Filter>>,
}

impl FilterEnvironment {
    pub(crate) fn new(name: &str, source: ComponentSource<dyn Filter>) -> Self {
        Self {
            name: name.to_string(),
            init_params: InitParameters::default(),
            async_supported: false,
            slot: Arc::new(ComponentSlot::new(source)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn init_params(&self) -> &InitParameters {
        &self.init_params
    }

    pub fn is_async_supported(&self) -> bool {
        self.async_supported
    }

    pub fn class_name(&self) -> Option<&str> {
        self.slot.source().class_name()
    }

    pub fn is_realized(&self) -> bool {
        self.slot.is_realized()
    }
}

/// What a filter mapping matches against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingTarget {
    UrlPattern(UrlPattern),
    HandlerName(String),
}

/// One filter mapping entry, in application-wide order.
#[derive(Debug, Clone)]
pub struct FilterMapping {
    pub filter_name: String,
    pub target: MappingTarget,
    pub dispatch_types: BTreeSet<DispatchType>,
    pub match_after: bool,
}

impl FilterMapping {
    /// Dispatch types used when a mapping names none.
    pub fn default_dispatch_types() -> BTreeSet<DispatchType> {
        BTreeSet::from([DispatchType::Request])
    }

    /// True when this mapping applies to `handler_name` at `path`.
    ///
    /// `path` is `None` for named dispatches, where only handler-name
    /// mappings can match.
    pub fn applies(&self, handler_name: &str, path: Option<&str>, dispatch: DispatchType) -> bool {
        if !self.dispatch_types.contains(&dispatch) {
            return false;
        }
        match &self.target {
            MappingTarget::UrlPattern(pattern) => path.is_some_and(|p| pattern.matches(p)),
            MappingTarget::HandlerName(name) => name == handler_name || name == "*",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_write_wins() {
        let mut params = InitParameters::default();
        assert!(params.set("a", "1").unwrap());
        assert!(!params.set("a", "2").unwrap());
        assert_eq!(params.get("a"), Some("1"));
    }

    #[test]
    fn test_set_all_reports_conflicts() {
        let mut params = InitParameters::default();
        params.set("a", "1").unwrap();

        let bulk = HashMap::from([
            ("a".to_string(), "x".to_string()),
            ("b".to_string(), "2".to_string()),
        ]);
        let conflicts = params.set_all(&bulk).unwrap();
        assert_eq!(conflicts, BTreeSet::from(["a".to_string()]));
        assert_eq!(params.get("a"), Some("1"));
        assert_eq!(params.get("b"), Some("2"));
    }

    #[test]
    fn test_set_all_rejects_empty_name_atomically() {
        let mut params = InitParameters::default();
        let bulk = HashMap::from([
            ("".to_string(), "x".to_string()),
            ("b".to_string(), "2".to_string()),
        ]);
        assert!(matches!(
            params.set_all(&bulk),
            Err(EngineError::InvalidParameter { .. })
        ));
        assert!(params.is_empty());
    }

    #[test]
    fn test_mapping_applies() {
        let mapping = FilterMapping {
            filter_name: "audit".into(),
            target: MappingTarget::UrlPattern(UrlPattern::parse("/secure/*").unwrap()),
            dispatch_types: BTreeSet::from([DispatchType::Request, DispatchType::Forward]),
            match_after: false,
        };
        assert!(mapping.applies("h", Some("/secure/x"), DispatchType::Request));
        assert!(mapping.applies("h", Some("/secure/x"), DispatchType::Forward));
        assert!(!mapping.applies("h", Some("/secure/x"), DispatchType::Include));
        assert!(!mapping.applies("h", Some("/open"), DispatchType::Request));
        assert!(!mapping.applies("h", None, DispatchType::Request));

        let by_name = FilterMapping {
            filter_name: "audit".into(),
            target: MappingTarget::HandlerName("echo".into()),
            dispatch_types: FilterMapping::default_dispatch_types(),
            match_after: false,
        };
        assert!(by_name.applies("echo", None, DispatchType::Request));
        assert!(!by_name.applies("other", Some("/x"), DispatchType::Request));
    }
}
