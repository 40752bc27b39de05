//! Static query-parameter injection.

use std::collections::BTreeMap;

use axum::http::request::Parts;

use super::{encode_query, parse_query, set_path_and_query, Filter, FilterError};

/// Sets fixed query parameters, replacing any values the client sent for
/// the same keys.
#[derive(Debug, Clone)]
pub struct QueryFilter {
    params: BTreeMap<String, String>,
}

impl QueryFilter {
    pub fn new(params: BTreeMap<String, String>) -> Self {
        Self { params }
    }
}

impl Filter for QueryFilter {
    fn name(&self) -> &str {
        "query"
    }

    fn process(&self, parts: &mut Parts) -> Result<(), FilterError> {
        let mut pairs = parse_query(parts.uri.query());
        for (key, value) in &self.params {
            replace_key(&mut pairs, key, std::iter::once(value.clone()));
        }
        let path = parts.uri.path().to_string();
        set_path_and_query(parts, &path, Some(&encode_query(&pairs)))
    }
}

/// Drop every existing value for `key`, then append `values`.
pub(crate) fn replace_key(
    pairs: &mut Vec<(String, String)>,
    key: &str,
    values: impl IntoIterator<Item = String>,
) {
    pairs.retain(|(k, _)| k != key);
    pairs.extend(values.into_iter().map(|v| (key.to_string(), v)));
}
