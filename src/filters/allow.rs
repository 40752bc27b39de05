//! Path and method allow-lists.

use std::collections::HashSet;

use axum::http::request::Parts;
use regex::Regex;

use super::{Filter, FilterError};

/// Admits a request only if its path matches at least one pattern.
///
/// Patterns are unanchored regexes; use `^`/`$` explicitly. An empty
/// pattern list admits nothing.
#[derive(Debug, Clone)]
pub struct PathFilter {
    patterns: Vec<Regex>,
}

impl PathFilter {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, FilterError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|e| FilterError::InvalidPattern {
                    pattern: p.as_ref().to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }
}

impl Filter for PathFilter {
    fn name(&self) -> &str {
        "path"
    }

    fn process(&self, parts: &mut Parts) -> Result<(), FilterError> {
        let path = parts.uri.path();
        if self.patterns.iter().any(|p| p.is_match(path)) {
            Ok(())
        } else {
            Err(FilterError::PathNotAllowed(path.to_string()))
        }
    }
}

/// Admits a request only if its method is listed. Matching is
/// case-insensitive on the configured names.
#[derive(Debug, Clone)]
pub struct MethodFilter {
    allowed: HashSet<String>,
}

impl MethodFilter {
    pub fn new<S: AsRef<str>>(methods: &[S]) -> Self {
        Self {
            allowed: methods.iter().map(|m| m.as_ref().to_ascii_uppercase()).collect(),
        }
    }
}

impl Filter for MethodFilter {
    fn name(&self) -> &str {
        "method"
    }

    fn process(&self, parts: &mut Parts) -> Result<(), FilterError> {
        let method = parts.method.as_str();
        if self.allowed.contains(method) {
            Ok(())
        } else {
            Err(FilterError::MethodNotAllowed(method.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::parts;
    use axum::http::StatusCode;

    #[test]
    fn path_filter_matches_any_pattern() {
        let filter = PathFilter::new(&["^/api/v[0-9]+/", "^/public"]).unwrap();
        assert!(filter.process(&mut parts("GET", "/api/v2/users")).is_ok());
        assert!(filter.process(&mut parts("GET", "/public/logo.png")).is_ok());

        let err = filter.process(&mut parts("GET", "/admin")).unwrap_err();
        assert_eq!(err.to_string(), "path /admin not allowed");
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn empty_path_filter_rejects_everything() {
        let filter = PathFilter::new::<&str>(&[]).unwrap();
        assert!(filter.process(&mut parts("GET", "/")).is_err());
    }

    #[test]
    fn invalid_path_pattern_fails_to_build() {
        let err = PathFilter::new(&["(unclosed"]).unwrap_err();
        assert!(matches!(err, FilterError::InvalidPattern { .. }));
    }

    #[test]
    fn method_filter_normalizes_case() {
        let filter = MethodFilter::new(&["get", "Post"]);
        assert!(filter.process(&mut parts("GET", "/")).is_ok());
        assert!(filter.process(&mut parts("POST", "/")).is_ok());

        let err = filter.process(&mut parts("DELETE", "/")).unwrap_err();
        assert_eq!(err.to_string(), "method DELETE not allowed");
        assert_eq!(err.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
