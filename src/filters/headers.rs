//! Static header injection.

use axum::http::{request::Parts, HeaderMap, HeaderName, HeaderValue};

use super::{Filter, FilterError};

/// Sets a fixed set of headers on every request, replacing existing values.
#[derive(Debug, Clone)]
pub struct HeaderFilter {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl HeaderFilter {
    pub fn new<I, K, V>(headers: I) -> Result<Self, FilterError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let headers = headers
            .into_iter()
            .map(|(name, value)| {
                let invalid = || FilterError::InvalidHeader {
                    name: name.as_ref().to_string(),
                };
                let name = HeaderName::try_from(name.as_ref()).map_err(|_| invalid())?;
                let value = HeaderValue::try_from(value.as_ref()).map_err(|_| invalid())?;
                Ok((name, value))
            })
            .collect::<Result<Vec<_>, FilterError>>()?;

        Ok(Self { headers })
    }

    pub fn apply(&self, headers: &mut HeaderMap) {
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
    }
}

impl Filter for HeaderFilter {
    fn name(&self) -> &str {
        "header"
    }

    fn process(&self, parts: &mut Parts) -> Result<(), FilterError> {
        self.apply(&mut parts.headers);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::parts;

    #[test]
    fn replaces_existing_values() {
        let filter = HeaderFilter::new([("X-Env", "prod"), ("x-team", "core")]).unwrap();
        let mut head = parts("GET", "/");
        head.headers.insert("x-env", HeaderValue::from_static("dev"));
        head.headers.append("x-env", HeaderValue::from_static("staging"));

        filter.process(&mut head).unwrap();

        let values: Vec<_> = head.headers.get_all("x-env").iter().collect();
        assert_eq!(values, vec!["prod"]);
        assert_eq!(head.headers["x-team"], "core");
    }

    #[test]
    fn rejects_invalid_header_name() {
        let err = HeaderFilter::new([("bad header", "v")]).unwrap_err();
        assert!(matches!(err, FilterError::InvalidHeader { .. }));
    }
}
