//! Regex-based URL rewriting.
//!
//! Each rule's pattern is anchored at both ends and matched against the
//! request path (a leading `/` is added if missing). The first matching
//! rule wins. `$1`..`$N` in the replacement are substituted with capture
//! groups; a `?` in the result splits off query parameters that are merged
//! over the request's own, replacing values for the same keys.

use axum::http::request::Parts;
use regex::Regex;

use super::query::replace_key;
use super::{encode_query, parse_query, set_path_and_query, Filter, FilterError};

#[derive(Debug, Clone)]
struct RewriteRule {
    pattern: Regex,
    replacement: String,
}

impl RewriteRule {
    fn apply(&self, path: &str) -> Option<String> {
        let captures = self.pattern.captures(path)?;
        let mut target = self.replacement.clone();
        // Highest index first so "$1" never clobbers the prefix of "$10".
        for i in (1..captures.len()).rev() {
            let value = captures.get(i).map_or("", |m| m.as_str());
            target = target.replace(&format!("${}", i), value);
        }
        Some(target)
    }
}

#[derive(Debug, Clone)]
pub struct UrlRewriteFilter {
    rules: Vec<RewriteRule>,
}

impl UrlRewriteFilter {
    pub fn new<I, P, R>(rules: I) -> Result<Self, FilterError>
    where
        I: IntoIterator<Item = (P, R)>,
        P: AsRef<str>,
        R: AsRef<str>,
    {
        let rules = rules
            .into_iter()
            .map(|(pattern, replacement)| {
                let pattern = pattern.as_ref();
                let anchored = if pattern.starts_with('/') {
                    format!("^{}$", pattern)
                } else {
                    format!("^/{}$", pattern)
                };
                let regex = Regex::new(&anchored).map_err(|e| FilterError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })?;
                Ok(RewriteRule {
                    pattern: regex,
                    replacement: replacement.as_ref().to_string(),
                })
            })
            .collect::<Result<Vec<_>, FilterError>>()?;

        Ok(Self { rules })
    }
}

impl Filter for UrlRewriteFilter {
    fn name(&self) -> &str {
        "urlrewrite"
    }

    fn process(&self, parts: &mut Parts) -> Result<(), FilterError> {
        let Some(target) = self.rules.iter().find_map(|r| r.apply(parts.uri.path())) else {
            return Ok(());
        };

        let (path, query) = match target.split_once('?') {
            Some((path, extra)) => {
                let mut pairs = parse_query(parts.uri.query());
                let mut overrides: Vec<(String, Vec<String>)> = Vec::new();
                for (key, value) in parse_query(Some(extra)) {
                    match overrides.iter_mut().find(|(k, _)| *k == key) {
                        Some((_, values)) => values.push(value),
                        None => overrides.push((key, vec![value])),
                    }
                }
                for (key, values) in overrides {
                    replace_key(&mut pairs, &key, values);
                }
                (path.to_string(), Some(encode_query(&pairs)))
            }
            None => (target, parts.uri.query().map(str::to_string)),
        };

        set_path_and_query(parts, &path, query.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::parts;

    #[test]
    fn substitutes_capture_groups() {
        let filter = UrlRewriteFilter::new([("/users/(\\d+)/posts/(\\w+)", "/v2/posts/$2?user=$1")]).unwrap();
        let mut head = parts("GET", "/users/42/posts/intro");
        filter.process(&mut head).unwrap();
        assert_eq!(head.uri.path(), "/v2/posts/intro");
        assert_eq!(head.uri.query(), Some("user=42"));
    }

    #[test]
    fn pattern_is_anchored_and_slash_prefixed() {
        let filter = UrlRewriteFilter::new([("old", "/new")]).unwrap();

        let mut exact = parts("GET", "/old?keep=1");
        filter.process(&mut exact).unwrap();
        assert_eq!(exact.uri.path(), "/new");
        assert_eq!(exact.uri.query(), Some("keep=1"));

        let mut longer = parts("GET", "/old/more");
        filter.process(&mut longer).unwrap();
        assert_eq!(longer.uri.path(), "/old/more");
    }

    #[test]
    fn merges_query_over_existing() {
        let filter = UrlRewriteFilter::new([("/search", "/find?sort=desc")]).unwrap();
        let mut head = parts("GET", "/search?q=rust&sort=asc");
        filter.process(&mut head).unwrap();
        assert_eq!(head.uri.path(), "/find");
        assert_eq!(head.uri.query(), Some("q=rust&sort=desc"));
    }

    #[test]
    fn double_digit_groups() {
        let pattern = "/(a)(b)(c)(d)(e)(f)(g)(h)(i)(j)(k)";
        let filter = UrlRewriteFilter::new([(pattern, "/$11-$1")]).unwrap();
        let mut head = parts("GET", "/abcdefghijk");
        filter.process(&mut head).unwrap();
        assert_eq!(head.uri.path(), "/k-a");
    }

    #[test]
    fn first_matching_rule_wins() {
        let filter = UrlRewriteFilter::new([("/a/.*", "/first"), ("/a/b", "/second")]).unwrap();
        let mut head = parts("GET", "/a/b");
        filter.process(&mut head).unwrap();
        assert_eq!(head.uri.path(), "/first");
    }
}
