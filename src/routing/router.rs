//! Route lookup.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Resolve a request path to a named service
//! - Compute the path forwarded upstream
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) prefix scan over routes sorted longest-first (acceptable for
//!   typical service counts)
//! - Explicit `None` rather than a silent default route

use crate::routing::matcher::PathPrefix;

#[derive(Debug)]
pub struct Route<T> {
    name: String,
    prefix: PathPrefix,
    strip_prefix: bool,
    target: T,
}

impl<T> Route<T> {
    pub fn new(name: impl Into<String>, prefix: &str, strip_prefix: bool, target: T) -> Self {
        Self {
            name: name.into(),
            prefix: PathPrefix::new(prefix),
            strip_prefix,
            target,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &PathPrefix {
        &self.prefix
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    /// Path sent to the backend for an inbound `path` matched by this route.
    pub fn upstream_path<'a>(&self, path: &'a str) -> &'a str {
        if self.strip_prefix {
            self.prefix.strip(path)
        } else {
            path
        }
    }
}

#[derive(Debug)]
pub struct ServiceRouter<T> {
    routes: Vec<Route<T>>,
}

impl<T> ServiceRouter<T> {
    pub fn new(routes: impl IntoIterator<Item = Route<T>>) -> Self {
        let mut routes: Vec<_> = routes.into_iter().collect();
        routes.sort_by(|a, b| b.prefix.as_str().len().cmp(&a.prefix.as_str().len()));
        Self { routes }
    }

    pub fn resolve(&self, path: &str) -> Option<&Route<T>> {
        self.routes.iter().find(|r| r.prefix.matches(path))
    }

    pub fn get(&self, name: &str) -> Option<&Route<T>> {
        self.routes.iter().find(|r| r.name == name)
    }

    pub fn routes(&self) -> impl Iterator<Item = &Route<T>> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
