//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Shared outbound transport settings.
    pub upstream: UpstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Response cache settings.
    pub cache: CacheConfig,

    /// Breaker applied to every service that does not declare its own.
    pub circuit_breaker: Option<BreakerConfig>,

    /// Per-client rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Bearer token authentication.
    pub auth: AuthConfig,

    /// Filters run on every proxied request, in order.
    pub filters: Vec<FilterConfig>,

    /// Backend services keyed by name.
    pub services: BTreeMap<String, ServiceConfig>,
}

impl ProxyConfig {
    /// Effective breaker settings for a service, if any.
    pub fn breaker_for(&self, service: &ServiceConfig) -> Option<BreakerConfig> {
        service
            .circuit_breaker
            .clone()
            .or_else(|| self.circuit_breaker.clone())
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Maximum requests processed concurrently (backpressure).
    pub max_concurrent_requests: usize,

    /// Maximum accepted request body in bytes.
    pub max_request_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            max_concurrent_requests: 10_000,
            max_request_body_bytes: 2 * 1024 * 1024,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Outbound connection pool settings shared by all services.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Idle connections kept per upstream host.
    pub max_idle_per_host: usize,

    /// In-flight requests allowed per upstream host.
    pub max_conns_per_host: usize,

    /// How long an idle pooled connection is kept, in seconds.
    pub idle_timeout_secs: u64,

    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Request timeout for services that do not set their own.
    pub default_timeout_ms: u64,

    /// Largest response body buffered for caching.
    pub max_response_body_bytes: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 32,
            max_conns_per_host: 256,
            idle_timeout_secs: 90,
            connect_timeout_ms: 5_000,
            default_timeout_ms: 30_000,
            max_response_body_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Outer deadline for a whole inbound request, in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 60 }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable response caching.
    pub enabled: bool,

    /// Entry lifetime in milliseconds.
    pub ttl_ms: u64,

    /// Upper bound on cached body bytes (0 = unbounded).
    pub max_size_bytes: u64,

    /// Interval of the expired-entry sweep in seconds.
    pub sweep_interval_secs: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_ms: 60_000,
            max_size_bytes: 64 * 1024 * 1024,
            sweep_interval_secs: 60,
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failures recorded before the breaker opens.
    pub max_failures: u32,

    /// How long the breaker stays open after the last failure, in milliseconds.
    pub timeout_ms: u64,
}

impl BreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            timeout_ms: 30_000,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Maximum requests per second per IP.
    pub requests_per_second: u32,

    /// Burst capacity.
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_second: 100,
            burst_size: 50,
        }
    }
}

/// Token bucket applied to all traffic of one service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceRateLimit {
    pub requests_per_second: u32,
    pub burst_size: u32,
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Probe cycle interval in milliseconds.
    pub interval_ms: u64,

    /// Per-probe timeout in milliseconds. Must be shorter than the interval.
    pub timeout_ms: u64,

    /// Bytes of a probe response body read before it is discarded.
    pub max_body_bytes: usize,

    /// Reject traffic to services whose last probe failed.
    pub gate_traffic: bool,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 60_000,
            timeout_ms: 5_000,
            max_body_bytes: 1024,
            gate_traffic: false,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable the Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Prometheus endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Bearer token authentication.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,

    /// Accepted tokens, compared against the full `Authorization` value
    /// with an optional `Bearer ` prefix removed.
    pub tokens: Vec<String>,
}

/// One URL rewrite rule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RewriteRuleConfig {
    /// Regex matched against the whole path.
    pub pattern: String,

    /// Replacement path; `$1`.. refer to capture groups, a `?` starts
    /// query parameters merged into the request query.
    pub replacement: String,
}

/// Declarative filter definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterConfig {
    Headers { headers: BTreeMap<String, String> },
    Rewrite { rules: Vec<RewriteRuleConfig> },
    AllowPaths { patterns: Vec<String> },
    AllowMethods { methods: Vec<String> },
    Query { params: BTreeMap<String, String> },
    All { filters: Vec<FilterConfig> },
}

/// Backend service definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base URL of the backend (e.g., "http://127.0.0.1:3000").
    pub url: String,

    /// Request timeout in milliseconds; falls back to the upstream default.
    pub timeout_ms: Option<u64>,

    /// Path prefix routed to this service; defaults to `/<name>`.
    pub path_prefix: Option<String>,

    /// Remove the routed prefix before forwarding.
    pub strip_prefix: bool,

    /// Headers set on every outbound request.
    pub headers: BTreeMap<String, String>,

    /// Optional per-service rate limit.
    pub rate_limit: Option<ServiceRateLimit>,

    /// Optional per-service breaker.
    pub circuit_breaker: Option<BreakerConfig>,

    /// Filters run after the global ones.
    pub filters: Vec<FilterConfig>,
}

impl ServiceConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_ms.map(Duration::from_millis).unwrap_or(default)
    }

    /// Routed prefix, normalized to start with `/` and carry no trailing `/`.
    pub fn prefix(&self, name: &str) -> String {
        let raw = self.path_prefix.clone().unwrap_or_else(|| name.to_string());
        let trimmed = raw.trim_matches('/');
        format!("/{}", trimmed)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_ms: None,
            path_prefix: None,
            strip_prefix: true,
            headers: BTreeMap::new(),
            rate_limit: None,
            circuit_breaker: None,
            filters: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_toml() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [cache]
            enabled = true
            ttl_ms = 100

            [services.users]
            url = "http://127.0.0.1:3000"
            timeout_ms = 250

            [services.users.circuit_breaker]
            max_failures = 2
            timeout_ms = 1000

            [[services.users.filters]]
            type = "allow_methods"
            methods = ["GET", "post"]
            "#,
        )
        .unwrap();

        assert!(config.cache.enabled);
        assert_eq!(config.cache.ttl(), Duration::from_millis(100));
        let users = &config.services["users"];
        assert!(users.strip_prefix);
        assert_eq!(users.timeout(Duration::from_secs(30)), Duration::from_millis(250));
        assert_eq!(config.breaker_for(users).unwrap().max_failures, 2);
        assert!(matches!(users.filters[0], FilterConfig::AllowMethods { .. }));
    }

    #[test]
    fn global_breaker_is_fallback() {
        let mut config = ProxyConfig::default();
        config.circuit_breaker = Some(BreakerConfig::default());
        let svc = ServiceConfig::new("http://localhost:1");
        assert_eq!(config.breaker_for(&svc), Some(BreakerConfig::default()));
    }

    #[test]
    fn prefix_normalization() {
        let mut svc = ServiceConfig::new("http://localhost:1");
        assert_eq!(svc.prefix("orders"), "/orders");
        svc.path_prefix = Some("api/v2/".into());
        assert_eq!(svc.prefix("orders"), "/api/v2");
    }
}
