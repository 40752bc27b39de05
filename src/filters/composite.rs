//! AND-composition of filters.

use std::sync::Arc;

use axum::http::request::Parts;

use super::{Filter, FilterError};

/// Runs its children in order; the first failure is returned unchanged.
#[derive(Debug, Clone)]
pub struct CompositeFilter {
    filters: Vec<Arc<dyn Filter>>,
}

impl CompositeFilter {
    pub fn new(filters: Vec<Arc<dyn Filter>>) -> Self {
        Self { filters }
    }
}

impl Filter for CompositeFilter {
    fn name(&self) -> &str {
        "composite"
    }

    fn process(&self, parts: &mut Parts) -> Result<(), FilterError> {
        self.filters.iter().try_for_each(|f| f.process(parts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{parts, HeaderFilter, MethodFilter};

    #[test]
    fn applies_children_until_first_failure() {
        let composite = CompositeFilter::new(vec![
            Arc::new(HeaderFilter::new([("x-seen", "1")]).unwrap()),
            Arc::new(MethodFilter::new(&["GET"])),
        ]);

        let mut ok = parts("GET", "/");
        composite.process(&mut ok).unwrap();
        assert_eq!(ok.headers["x-seen"], "1");

        let mut denied = parts("PUT", "/");
        let err = composite.process(&mut denied).unwrap_err();
        assert!(matches!(err, FilterError::MethodNotAllowed(_)));
        assert_eq!(denied.headers["x-seen"], "1");
    }
}
