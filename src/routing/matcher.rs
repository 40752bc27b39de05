//! Path prefix matching.
//!
//! # Design Decisions
//! - Matching is case-sensitive and respects segment boundaries:
//!   `/api` matches `/api` and `/api/users` but not `/apiary`
//! - `/` matches every path

/// A normalized path prefix: leading slash, no trailing slash (except `/`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPrefix {
    prefix: String,
}

impl PathPrefix {
    pub fn new(prefix: &str) -> Self {
        let trimmed = prefix.trim_matches('/');
        Self {
            prefix: format!("/{}", trimmed),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.prefix
    }

    pub fn is_root(&self) -> bool {
        self.prefix == "/"
    }

    pub fn matches(&self, path: &str) -> bool {
        if self.is_root() {
            return path.starts_with('/');
        }
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Remove the prefix from a matching path. The result always starts
    /// with `/`.
    pub fn strip<'a>(&self, path: &'a str) -> &'a str {
        if self.is_root() {
            return path;
        }
        match path.strip_prefix(self.prefix.as_str()) {
            Some("") => "/",
            Some(rest) => rest,
            None => path,
        }
    }
}
