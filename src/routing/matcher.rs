//! URL pattern parsing and matching.
//!
//! # Responsibilities
//! - Parse the four pattern shapes: exact, path-prefix (`/x/*`), extension
//!   (`*.ext`) and default (`/`)
//! - Split a path-within-context into servlet path and path info
//!
//! # Design Decisions
//! - Matching is case-sensitive, like the path matching of the routing layer
//! - No regex: every match is a string comparison, O(pattern length)
//! - The empty pattern `""` maps the context root exactly

use std::fmt;

use crate::webapp::error::EngineError;

/// How a pattern matched; also the precedence order (lower wins).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchKind {
    Exact,
    PathPrefix,
    Extension,
    Default,
}

/// A parsed URL pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UrlPattern {
    /// `"/exact/path"`, or `""` for the context root.
    Exact(String),
    /// `"/prefix/*"`; stores the prefix without the trailing `/*`.
    PathPrefix(String),
    /// `"*.ext"`; stores the extension without the dot.
    Extension(String),
    /// `"/"`.
    Default,
}

impl UrlPattern {
    /// Parse a pattern string.
    pub fn parse(pattern: &str) -> Result<Self, EngineError> {
        let invalid = || EngineError::InvalidPattern {
            pattern: pattern.to_string(),
        };

        if pattern.is_empty() {
            return Ok(UrlPattern::Exact(String::new()));
        }
        if pattern == "/" {
            return Ok(UrlPattern::Default);
        }
        if let Some(ext) = pattern.strip_prefix("*.") {
            if ext.is_empty() || ext.contains('/') || ext.contains('*') {
                return Err(invalid());
            }
            return Ok(UrlPattern::Extension(ext.to_string()));
        }
        if !pattern.starts_with('/') {
            return Err(invalid());
        }
        if let Some(prefix) = pattern.strip_suffix("/*") {
            if prefix.contains('*') {
                return Err(invalid());
            }
            return Ok(UrlPattern::PathPrefix(prefix.to_string()));
        }
        if pattern.contains('*') {
            return Err(invalid());
        }
        Ok(UrlPattern::Exact(pattern.to_string()))
    }

    /// Precedence class of this pattern.
    pub fn kind(&self) -> MatchKind {
        match self {
            UrlPattern::Exact(_) => MatchKind::Exact,
            UrlPattern::PathPrefix(_) => MatchKind::PathPrefix,
            UrlPattern::Extension(_) => MatchKind::Extension,
            UrlPattern::Default => MatchKind::Default,
        }
    }

    /// True if the pattern matches the path at all.
    ///
    /// Used for filter mappings, where only match existence matters. The
    /// default pattern matches every path.
    pub fn matches(&self, path: &str) -> bool {
        match self {
            UrlPattern::Exact(exact) => exact_matches(exact, path),
            UrlPattern::PathPrefix(prefix) => prefix_matches(prefix, path),
            UrlPattern::Extension(ext) => extension_matches(ext, path),
            UrlPattern::Default => true,
        }
    }

    /// Split `path` into `(servlet_path, path_info)` as selected by this pattern.
    ///
    /// Returns `None` when the pattern does not match.
    pub fn split(&self, path: &str) -> Option<(String, Option<String>)> {
        match self {
            UrlPattern::Exact(exact) if exact.is_empty() => {
                exact_matches(exact, path).then(|| (String::new(), Some("/".to_string())))
            }
            UrlPattern::Exact(exact) => {
                exact_matches(exact, path).then(|| (path.to_string(), None))
            }
            UrlPattern::PathPrefix(prefix) => split_prefix(prefix, path),
            UrlPattern::Extension(ext) => {
                extension_matches(ext, path).then(|| (path.to_string(), None))
            }
            UrlPattern::Default => Some((path.to_string(), None)),
        }
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlPattern::Exact(exact) => f.write_str(exact),
            UrlPattern::PathPrefix(prefix) => write!(f, "{}/*", prefix),
            UrlPattern::Extension(ext) => write!(f, "*.{}", ext),
            UrlPattern::Default => f.write_str("/"),
        }
    }
}

fn exact_matches(exact: &str, path: &str) -> bool {
    if exact.is_empty() {
        path.is_empty() || path == "/"
    } else {
        exact == path
    }
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    // "/*" has an empty prefix and matches everything.
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Split `path` under a path-prefix pattern's `prefix`.
pub(crate) fn split_prefix(prefix: &str, path: &str) -> Option<(String, Option<String>)> {
    if !prefix_matches(prefix, path) {
        return None;
    }
    let rest = &path[prefix.len()..];
    let path_info = if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    };
    Some((prefix.to_string(), path_info))
}

fn extension_matches(ext: &str, path: &str) -> bool {
    let last_segment = path.rsplit('/').next().unwrap_or(path);
    match last_segment.rsplit_once('.') {
        Some((stem, found)) => !stem.is_empty() && found == ext,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shapes() {
        assert_eq!(UrlPattern::parse("/a/b").unwrap(), UrlPattern::Exact("/a/b".into()));
        assert_eq!(UrlPattern::parse("/a/*").unwrap(), UrlPattern::PathPrefix("/a".into()));
        assert_eq!(UrlPattern::parse("/*").unwrap(), UrlPattern::PathPrefix(String::new()));
        assert_eq!(UrlPattern::parse("*.jsp").unwrap(), UrlPattern::Extension("jsp".into()));
        assert_eq!(UrlPattern::parse("/").unwrap(), UrlPattern::Default);
        assert_eq!(UrlPattern::parse("").unwrap(), UrlPattern::Exact(String::new()));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["a/b", "/a/*/b", "*.", "*.a/b", "/a*", "**"] {
            assert!(UrlPattern::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_prefix_split() {
        let p = UrlPattern::parse("/echo/*").unwrap();
        assert_eq!(p.split("/echo/x"), Some(("/echo".into(), Some("/x".into()))));
        assert_eq!(p.split("/echo"), Some(("/echo".into(), None)));
        assert_eq!(p.split("/echoes"), None);
    }

    #[test]
    fn test_extension_uses_last_segment() {
        let p = UrlPattern::parse("*.jsp").unwrap();
        assert!(p.matches("/a/b/index.jsp"));
        assert!(!p.matches("/a.jsp/index"));
        assert!(!p.matches("/a/.jsp"));
    }

    #[test]
    fn test_context_root_pattern() {
        let p = UrlPattern::parse("").unwrap();
        assert_eq!(p.split("/"), Some((String::new(), Some("/".into()))));
        assert_eq!(p.split("/x"), None);
    }

    #[test]
    fn test_display_round_trips_source() {
        for src in ["/a/b", "/a/*", "*.jsp", "/", "/*"] {
            assert_eq!(UrlPattern::parse(src).unwrap().to_string(), src);
        }
    }
}
