//! Bidirectional URL pattern ↔ handler index.
//!
//! # Design Decisions
//! - Exact and extension patterns are hash lookups; prefixes are kept sorted
//!   longest-first so the first hit is the longest match
//! - `add` is all-or-nothing: a single conflicting pattern rejects the call
//!   and the table is left exactly as it was

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use super::matcher::{split_prefix, MatchKind, UrlPattern};
use crate::webapp::error::EngineError;

/// Outcome of resolving a path within an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingMatch {
    pub handler_name: String,
    pub servlet_path: String,
    pub path_info: Option<String>,
    #[serde(skip)]
    pub kind: MatchKind,
}

#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    by_pattern: BTreeMap<String, String>,
    by_handler: HashMap<String, BTreeSet<String>>,
    exact: HashMap<String, String>,
    prefixes: Vec<(String, String)>,
    extensions: HashMap<String, String>,
    default: Option<String>,
}

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `patterns` to `handler`.
    ///
    /// # Returns
    /// The accepted pattern set. Re-adding a pattern already mapped to the same
    /// handler is accepted. A pattern mapped to another handler yields
    /// `MappingConflict` and nothing is added.
    pub fn add(&mut self, handler: &str, patterns: &[&str]) -> Result<BTreeSet<String>, EngineError> {
        let mut parsed = Vec::with_capacity(patterns.len());
        for raw in patterns {
            let pattern = UrlPattern::parse(raw)?;
            if let Some(existing) = self.by_pattern.get(*raw) {
                if existing != handler {
                    return Err(EngineError::MappingConflict {
                        pattern: raw.to_string(),
                        existing: existing.clone(),
                    });
                }
            }
            parsed.push((raw.to_string(), pattern));
        }

        let mut accepted = BTreeSet::new();
        for (raw, pattern) in parsed {
            accepted.insert(raw.clone());
            if self.by_pattern.contains_key(&raw) {
                continue;
            }
            self.by_pattern.insert(raw.clone(), handler.to_string());
            self.by_handler
                .entry(handler.to_string())
                .or_default()
                .insert(raw);
            self.index(pattern, handler);
        }
        Ok(accepted)
    }

    fn index(&mut self, pattern: UrlPattern, handler: &str) {
        match pattern {
            UrlPattern::Exact(path) => {
                self.exact.insert(path, handler.to_string());
            }
            UrlPattern::PathPrefix(prefix) => {
                self.prefixes.push((prefix, handler.to_string()));
                self.prefixes
                    .sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
            }
            UrlPattern::Extension(ext) => {
                self.extensions.insert(ext, handler.to_string());
            }
            UrlPattern::Default => self.default = Some(handler.to_string()),
        }
    }

    /// Patterns mapped to `handler`, sorted.
    pub fn patterns_for(&self, handler: &str) -> BTreeSet<String> {
        self.by_handler.get(handler).cloned().unwrap_or_default()
    }

    pub fn handler_for(&self, pattern: &str) -> Option<&str> {
        self.by_pattern.get(pattern).map(String::as_str)
    }

    /// Every pattern with its handler, sorted by pattern.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.by_pattern.iter().map(|(p, h)| (p.as_str(), h.as_str()))
    }

    pub fn len(&self) -> usize {
        self.by_pattern.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_pattern.is_empty()
    }

    /// Resolve a path within the context: exact, then longest prefix, then
    /// extension, then default.
    pub fn resolve(&self, path: &str) -> Option<MappingMatch> {
        if let Some(handler) = self.exact.get(path) {
            return Some(found(handler, path.to_string(), None, MatchKind::Exact));
        }
        if path == "/" {
            if let Some(handler) = self.exact.get("") {
                return Some(found(handler, String::new(), Some("/".into()), MatchKind::Exact));
            }
        }

        for (prefix, handler) in &self.prefixes {
            if let Some((servlet_path, path_info)) = split_prefix(prefix, path) {
                return Some(found(handler, servlet_path, path_info, MatchKind::PathPrefix));
            }
        }

        let last_segment = path.rsplit('/').next().unwrap_or(path);
        if let Some((stem, ext)) = last_segment.rsplit_once('.') {
            if !stem.is_empty() {
                if let Some(handler) = self.extensions.get(ext) {
                    return Some(found(handler, path.to_string(), None, MatchKind::Extension));
                }
            }
        }

        self.default
            .as_ref()
            .map(|handler| found(handler, path.to_string(), None, MatchKind::Default))
    }
}

fn found(handler: &str, servlet_path: String, path_info: Option<String>, kind: MatchKind) -> MappingMatch {
    MappingMatch {
        handler_name: handler.to_string(),
        servlet_path,
        path_info,
        kind,
    }
}
