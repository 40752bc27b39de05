//! Request filter subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request head (method, URI, headers)
//!     → FilterChain (global filters, insertion order)
//!     → FilterChain (service filters, insertion order)
//!     → first error aborts the chain and the request
//! ```
//!
//! # Design Decisions
//! - Filters see only the request head; bodies stream through untouched
//! - The chain is read-mostly: appends swap in a new snapshot so readers
//!   never take a lock
//! - Filters are built from declarative config once, at startup

pub mod allow;
pub mod composite;
pub mod headers;
pub mod query;
pub mod rewrite;

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::http::{request::Parts, uri::PathAndQuery, StatusCode, Uri};

use crate::config::FilterConfig;

pub use allow::{MethodFilter, PathFilter};
pub use composite::CompositeFilter;
pub use headers::HeaderFilter;
pub use query::QueryFilter;
pub use rewrite::UrlRewriteFilter;

/// A request transformer or guard.
pub trait Filter: Send + Sync {
    /// Short name used in logs and error messages.
    fn name(&self) -> &str;

    /// Inspect and optionally mutate the request head.
    fn process(&self, parts: &mut Parts) -> Result<(), FilterError>;
}

impl fmt::Debug for dyn Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Filter({})", self.name())
    }
}

/// Errors raised by filters, either while processing a request or while
/// being built from configuration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FilterError {
    #[error("path {0} not allowed")]
    PathNotAllowed(String),

    #[error("method {0} not allowed")]
    MethodNotAllowed(String),

    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid header {name:?}")]
    InvalidHeader { name: String },

    #[error("invalid rewrite target {target:?}: {reason}")]
    InvalidRewrite { target: String, reason: String },

    #[error("{message}")]
    Rejected { status: StatusCode, message: String },
}

impl FilterError {
    /// Status returned to the client when this error aborts a request.
    pub fn status(&self) -> StatusCode {
        match self {
            FilterError::PathNotAllowed(_) => StatusCode::FORBIDDEN,
            FilterError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            FilterError::InvalidRewrite { .. } => StatusCode::BAD_REQUEST,
            FilterError::InvalidPattern { .. } | FilterError::InvalidHeader { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            FilterError::Rejected { status, .. } => *status,
        }
    }
}

/// A filter error tagged with the filter that raised it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("filter {filter} failed: {error}")]
pub struct FilterRejection {
    pub filter: String,
    pub error: FilterError,
}

/// Ordered, append-only sequence of filters shared by all requests.
pub struct FilterChain {
    filters: ArcSwap<Vec<Arc<dyn Filter>>>,
}

impl FilterChain {
    pub fn new(filters: Vec<Arc<dyn Filter>>) -> Self {
        Self {
            filters: ArcSwap::from_pointee(filters),
        }
    }

    /// Build a chain from declarative definitions.
    pub fn from_config(configs: &[FilterConfig]) -> Result<Self, FilterError> {
        Ok(Self::new(build_filters(configs)?))
    }

    /// Append a filter. Requests already running keep their snapshot.
    pub fn add(&self, filter: Arc<dyn Filter>) {
        self.filters.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(filter.clone());
            next
        });
    }

    pub fn len(&self) -> usize {
        self.filters.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn names(&self) -> Vec<String> {
        self.filters.load().iter().map(|f| f.name().to_string()).collect()
    }

    /// Run every filter in insertion order, stopping at the first error.
    pub fn process(&self, parts: &mut Parts) -> Result<(), FilterRejection> {
        let filters = self.filters.load();
        for filter in filters.iter() {
            filter.process(parts).map_err(|error| FilterRejection {
                filter: filter.name().to_string(),
                error,
            })?;
        }
        Ok(())
    }
}

impl Default for FilterChain {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChain").field("filters", &self.names()).finish()
    }
}

/// Build one filter from its declarative definition.
pub fn build_filter(config: &FilterConfig) -> Result<Arc<dyn Filter>, FilterError> {
    let filter: Arc<dyn Filter> = match config {
        FilterConfig::Headers { headers } => Arc::new(HeaderFilter::new(headers)?),
        FilterConfig::Rewrite { rules } => Arc::new(UrlRewriteFilter::new(
            rules.iter().map(|r| (r.pattern.as_str(), r.replacement.as_str())),
        )?),
        FilterConfig::AllowPaths { patterns } => Arc::new(PathFilter::new(patterns.as_slice())?),
        FilterConfig::AllowMethods { methods } => Arc::new(MethodFilter::new(methods.as_slice())),
        FilterConfig::Query { params } => Arc::new(QueryFilter::new(params.clone())),
        FilterConfig::All { filters } => Arc::new(CompositeFilter::new(build_filters(filters)?)),
    };
    Ok(filter)
}

pub fn build_filters(configs: &[FilterConfig]) -> Result<Vec<Arc<dyn Filter>>, FilterError> {
    configs.iter().map(build_filter).collect()
}

/// Replace the path and query of a request, keeping scheme and authority.
pub(crate) fn set_path_and_query(
    parts: &mut Parts,
    path: &str,
    query: Option<&str>,
) -> Result<(), FilterError> {
    let target = match query {
        Some(q) if !q.is_empty() => format!("{}?{}", path, q),
        _ => path.to_string(),
    };
    let invalid = |reason: String| FilterError::InvalidRewrite {
        target: target.clone(),
        reason,
    };

    let path_and_query = PathAndQuery::try_from(target.as_str()).map_err(|e| invalid(e.to_string()))?;
    let mut uri_parts = parts.uri.clone().into_parts();
    uri_parts.path_and_query = Some(path_and_query);
    parts.uri = Uri::from_parts(uri_parts).map_err(|e| invalid(e.to_string()))?;
    Ok(())
}

/// Decode a query string into ordered key/value pairs.
pub(crate) fn parse_query(query: Option<&str>) -> Vec<(String, String)> {
    query
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn encode_query(pairs: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

#[cfg(test)]
pub(crate) fn parts(method: &str, uri: &str) -> Parts {
    axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .body(())
        .unwrap()
        .into_parts()
        .0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recording {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl Filter for Recording {
        fn name(&self) -> &str {
            &self.name
        }

        fn process(&self, _parts: &mut Parts) -> Result<(), FilterError> {
            self.log.lock().unwrap().push(self.name.clone());
            if self.fail {
                Err(FilterError::Rejected {
                    status: StatusCode::UNAUTHORIZED,
                    message: "nope".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn recording(name: &str, log: &Arc<Mutex<Vec<String>>>, fail: bool) -> Arc<dyn Filter> {
        Arc::new(Recording {
            name: name.into(),
            log: log.clone(),
            fail,
        })
    }

    #[test]
    fn runs_in_insertion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = FilterChain::new(vec![recording("a", &log, false)]);
        chain.add(recording("b", &log, false));
        chain.add(recording("c", &log, false));

        chain.process(&mut parts("GET", "/x")).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(chain.names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn first_error_aborts_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = FilterChain::new(vec![
            recording("a", &log, false),
            recording("guard", &log, true),
            recording("never", &log, false),
        ]);

        let rejection = chain.process(&mut parts("GET", "/x")).unwrap_err();
        assert_eq!(rejection.filter, "guard");
        assert_eq!(rejection.error.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(rejection.to_string(), "filter guard failed: nope");
        assert_eq!(*log.lock().unwrap(), vec!["a", "guard"]);
    }

    #[test]
    fn builds_from_config() {
        let configs: Vec<FilterConfig> = serde_json::from_str(
            r#"[
                {"type": "allow_methods", "methods": ["get"]},
                {"type": "query", "params": {"v": "2"}},
                {"type": "all", "filters": [{"type": "allow_paths", "patterns": ["^/api"]}]}
            ]"#,
        )
        .unwrap();
        let chain = FilterChain::from_config(&configs).unwrap();
        assert_eq!(chain.names(), vec!["method", "query", "composite"]);

        let mut head = parts("GET", "/api/items");
        chain.process(&mut head).unwrap();
        assert_eq!(head.uri.query(), Some("v=2"));

        let err = chain.process(&mut parts("POST", "/api/items")).unwrap_err();
        assert_eq!(err.error.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn set_path_keeps_authority() {
        let mut head = parts("GET", "http://example.com/old?a=1");
        set_path_and_query(&mut head, "/new", Some("b=2")).unwrap();
        assert_eq!(head.uri.to_string(), "http://example.com/new?b=2");
    }
}
