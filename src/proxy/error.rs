//! Errors that end a proxied request early.

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::filters::FilterRejection;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("no service matches path {0}")]
    NoRoute(String),

    #[error(transparent)]
    Filter(#[from] FilterRejection),

    #[error("rate limit exceeded for service {0}")]
    RateLimited(String),

    #[error("circuit open for service {0}")]
    CircuitOpen(String),

    #[error("service {0} is unhealthy")]
    Unhealthy(String),

    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),

    #[error("upstream request failed: {0}")]
    Transport(String),

    #[error("upstream response exceeded {0} bytes")]
    ResponseTooLarge(usize),

    #[error("invalid upstream request: {0}")]
    InvalidRequest(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoRoute(_) => StatusCode::NOT_FOUND,
            ProxyError::Filter(rejection) => rejection.error.status(),
            ProxyError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::CircuitOpen(_) | ProxyError::Unhealthy(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Transport(_) | ProxyError::ResponseTooLarge(_) => StatusCode::BAD_GATEWAY,
            ProxyError::InvalidRequest(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::NoRoute(_) => "no_route",
            ProxyError::Filter(_) => "filter",
            ProxyError::RateLimited(_) => "rate_limited",
            ProxyError::CircuitOpen(_) => "circuit_open",
            ProxyError::Unhealthy(_) => "unhealthy",
            ProxyError::Timeout(_) => "timeout",
            ProxyError::Transport(_) => "transport",
            ProxyError::ResponseTooLarge(_) => "response_too_large",
            ProxyError::InvalidRequest(_) => "invalid_request",
        }
    }

    /// Whether the failure is attributed to the backend.
    pub fn is_upstream_failure(&self) -> bool {
        matches!(
            self,
            ProxyError::Timeout(_) | ProxyError::Transport(_) | ProxyError::ResponseTooLarge(_)
        )
    }

    /// Text sent to the client. Upstream details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            ProxyError::NoRoute(_) => "No matching service".to_string(),
            ProxyError::Filter(rejection) => rejection.error.to_string(),
            ProxyError::RateLimited(_) => "Rate limit exceeded".to_string(),
            ProxyError::CircuitOpen(_) | ProxyError::Unhealthy(_) => "Service unavailable".to_string(),
            ProxyError::Timeout(_) => "Upstream request timed out".to_string(),
            ProxyError::Transport(_) | ProxyError::ResponseTooLarge(_) => "Upstream request failed".to_string(),
            ProxyError::InvalidRequest(_) => "Internal Server Error".to_string(),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status(), self.client_message()).into_response()
    }
}

/// Render an error with its source chain.
pub(crate) fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
