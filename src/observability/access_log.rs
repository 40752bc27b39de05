//! Per-request access log.
//!
//! One event per proxied request on the `access_log` target, so it can be
//! routed or filtered independently of diagnostic logs
//! (`RUST_LOG=access_log=info`).

use std::collections::BTreeMap;

use axum::http::HeaderMap;
use serde::Serialize;

/// Headers never copied into the access log.
pub const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "x-auth-token",
    "x-access-token",
    "proxy-authorization",
];

#[derive(Debug, Clone, Serialize)]
pub struct AccessLogEntry {
    pub request_id: String,
    pub client_ip: String,
    pub method: String,
    pub path: String,
    pub service: String,
    pub status: u16,
    pub latency_ms: u64,
    pub bytes_sent: u64,
    pub cache_hit: bool,
    pub circuit_state: Option<&'static str>,
    pub error: Option<String>,
    pub headers: BTreeMap<String, String>,
}

impl AccessLogEntry {
    pub fn emit(&self) {
        let headers = serde_json::to_string(&self.headers).unwrap_or_default();
        if self.status >= 500 {
            tracing::warn!(
                target: "access_log",
                request_id = %self.request_id,
                client_ip = %self.client_ip,
                method = %self.method,
                path = %self.path,
                service = %self.service,
                status = self.status,
                latency_ms = self.latency_ms,
                bytes_sent = self.bytes_sent,
                cache_hit = self.cache_hit,
                circuit_state = self.circuit_state,
                error = self.error.as_deref(),
                headers = %headers,
                "request completed"
            );
        } else {
            tracing::info!(
                target: "access_log",
                request_id = %self.request_id,
                client_ip = %self.client_ip,
                method = %self.method,
                path = %self.path,
                service = %self.service,
                status = self.status,
                latency_ms = self.latency_ms,
                bytes_sent = self.bytes_sent,
                cache_hit = self.cache_hit,
                circuit_state = self.circuit_state,
                error = self.error.as_deref(),
                headers = %headers,
                "request completed"
            );
        }
    }
}

/// Copy request headers suitable for logging, dropping credentials and
/// values that are not valid visible ASCII.
pub fn loggable_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (name, value) in headers {
        if SENSITIVE_HEADERS.contains(&name.as_str()) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            out.entry(name.as_str().to_string())
                .and_modify(|existing: &mut String| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn redacts_credentials() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer secret"));
        headers.insert("cookie", HeaderValue::from_static("session=1"));
        headers.insert("x-api-key", HeaderValue::from_static("k"));
        headers.insert("user-agent", HeaderValue::from_static("curl/8"));
        headers.append("accept", HeaderValue::from_static("text/html"));
        headers.append("accept", HeaderValue::from_static("application/json"));

        let logged = loggable_headers(&headers);
        assert_eq!(logged.len(), 2);
        assert_eq!(logged["user-agent"], "curl/8");
        assert_eq!(logged["accept"], "text/html, application/json");
    }
}
