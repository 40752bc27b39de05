//! Bearer token authentication.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Decides whether a presented bearer token is acceptable.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> bool;
}

/// A fixed set of accepted tokens.
#[derive(Debug, Clone, Default)]
pub struct StaticTokens {
    tokens: HashSet<String>,
}

impl StaticTokens {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }
}

impl TokenValidator for StaticTokens {
    fn validate(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }
}

fn bearer_token(request: &Request<Body>) -> Option<&str> {
    let value = request.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
        Some(token.trim())
    } else {
        None
    }
}

/// Rejects requests without a valid bearer token: 401 when missing,
/// 403 when present but not accepted.
pub async fn auth_middleware(
    State(validator): State<Arc<dyn TokenValidator>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let accepted = bearer_token(&request).map(|token| validator.validate(token));
    match accepted {
        None => {
            let mut response = (StatusCode::UNAUTHORIZED, "Missing bearer token").into_response();
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            response
        }
        Some(true) => next.run(request).await,
        Some(false) => {
            tracing::warn!(path = %request.uri().path(), "Rejected invalid bearer token");
            (StatusCode::FORBIDDEN, "Invalid token").into_response()
        }
    }
}
