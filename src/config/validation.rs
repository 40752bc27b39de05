//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate service URLs, names and routed prefixes
//! - Validate value ranges (timeouts > 0, thresholds > 0)
//! - Compile filter definitions once to surface bad regexes at startup
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashMap;

use crate::config::schema::{BreakerConfig, ProxyConfig};
use crate::filters;

/// Names that collide with the gateway's own endpoints.
pub const RESERVED_SERVICE_NAMES: &[&str] = &["health", "metrics"];

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.upstream.default_timeout_ms == 0 {
        errors.push(ValidationError::new("upstream.default_timeout_ms", "must be > 0"));
    }
    if config.upstream.max_conns_per_host == 0 {
        errors.push(ValidationError::new("upstream.max_conns_per_host", "must be > 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }
    if config.cache.enabled && config.cache.ttl_ms == 0 {
        errors.push(ValidationError::new("cache.ttl_ms", "must be > 0 when caching is enabled"));
    }
    if config.cache.enabled && config.cache.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("cache.sweep_interval_secs", "must be > 0"));
    }

    let health = &config.health_check;
    if health.enabled {
        if health.interval_ms == 0 {
            errors.push(ValidationError::new("health_check.interval_ms", "must be > 0"));
        } else if health.timeout_ms == 0 || health.timeout_ms >= health.interval_ms {
            errors.push(ValidationError::new(
                "health_check.timeout_ms",
                "must be > 0 and shorter than the probe interval",
            ));
        }
    }

    if config.rate_limit.enabled
        && (config.rate_limit.requests_per_second == 0 || config.rate_limit.burst_size == 0)
    {
        errors.push(ValidationError::new("rate_limit", "rate and burst must be > 0"));
    }

    if config.auth.enabled && config.auth.tokens.is_empty() {
        errors.push(ValidationError::new("auth.tokens", "at least one token is required"));
    }

    if let Some(breaker) = &config.circuit_breaker {
        validate_breaker("circuit_breaker", breaker, &mut errors);
    }

    if let Err(e) = filters::build_filters(&config.filters) {
        errors.push(ValidationError::new("filters", e.to_string()));
    }

    let mut prefixes: HashMap<String, &str> = HashMap::new();
    for (name, service) in &config.services {
        let field = |f: &str| format!("services.{}.{}", name, f);

        if RESERVED_SERVICE_NAMES.contains(&name.as_str()) {
            errors.push(ValidationError::new(format!("services.{}", name), "service name is reserved"));
        }

        match url::Url::parse(&service.url) {
            Ok(parsed) if parsed.scheme() == "http" && parsed.host().is_some() => {}
            Ok(_) => errors.push(ValidationError::new(field("url"), "must be an http:// URL with a host")),
            Err(e) => errors.push(ValidationError::new(field("url"), format!("invalid URL: {}", e))),
        }

        if service.timeout_ms == Some(0) {
            errors.push(ValidationError::new(field("timeout_ms"), "must be > 0"));
        }

        if let Some(breaker) = &service.circuit_breaker {
            validate_breaker(&field("circuit_breaker"), breaker, &mut errors);
        }

        if let Some(limit) = &service.rate_limit {
            if limit.requests_per_second == 0 || limit.burst_size == 0 {
                errors.push(ValidationError::new(field("rate_limit"), "rate and burst must be > 0"));
            }
        }

        if let Err(e) = filters::build_filters(&service.filters) {
            errors.push(ValidationError::new(field("filters"), e.to_string()));
        }

        let prefix = service.prefix(name);
        if let Some(other) = prefixes.insert(prefix.clone(), name) {
            errors.push(ValidationError::new(
                field("path_prefix"),
                format!("prefix {} already routed to {}", prefix, other),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_breaker(field: &str, breaker: &BreakerConfig, errors: &mut Vec<ValidationError>) {
    if breaker.max_failures == 0 {
        errors.push(ValidationError::new(format!("{}.max_failures", field), "must be > 0"));
    }
    if breaker.timeout_ms == 0 {
        errors.push(ValidationError::new(format!("{}.timeout_ms", field), "must be > 0"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{FilterConfig, RewriteRuleConfig, ServiceConfig};

    fn config_with(name: &str, service: ServiceConfig) -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.services.insert(name.to_string(), service);
        config
    }

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ProxyConfig::default()).is_ok());
    }

    #[test]
    fn rejects_probe_timeout_not_shorter_than_interval() {
        let mut config = ProxyConfig::default();
        config.health_check.interval_ms = 1000;
        config.health_check.timeout_ms = 1000;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "health_check.timeout_ms");
    }

    #[test]
    fn rejects_bad_url_and_zero_breaker() {
        let mut svc = ServiceConfig::new("ftp://example.com");
        svc.circuit_breaker = Some(BreakerConfig { max_failures: 0, timeout_ms: 10 });
        let errors = validate_config(&config_with("api", svc)).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"services.api.url"));
        assert!(fields.contains(&"services.api.circuit_breaker.max_failures"));
    }

    #[test]
    fn rejects_invalid_rewrite_regex() {
        let mut svc = ServiceConfig::new("http://localhost:3000");
        svc.filters.push(FilterConfig::Rewrite {
            rules: vec![RewriteRuleConfig {
                pattern: "/users/(\\d+".into(),
                replacement: "/u/$1".into(),
            }],
        });
        let errors = validate_config(&config_with("api", svc)).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "services.api.filters");
    }

    #[test]
    fn rejects_duplicate_prefixes() {
        let mut config = ProxyConfig::default();
        let mut a = ServiceConfig::new("http://localhost:1");
        a.path_prefix = Some("/shared".into());
        let mut b = ServiceConfig::new("http://localhost:2");
        b.path_prefix = Some("shared/".into());
        config.services.insert("a".into(), a);
        config.services.insert("b".into(), b);
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
    }
}
