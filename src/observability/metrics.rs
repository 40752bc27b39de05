//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Own the process-wide request totals served by `GET /metrics`
//! - Mirror events to the `metrics` facade
//! - Optionally install a Prometheus scrape endpoint
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by service, status
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_active_requests` (gauge): in-flight requests
//! - `proxy_cache_hits_total` / `proxy_cache_misses_total` (counters)
//! - `proxy_errors_total` (counter): by kind
//! - `proxy_rate_limited_total` (counter): by scope
//! - `proxy_circuit_state` (gauge): 0=closed, 1=half_open, 2=open
//! - `proxy_backend_healthy` (gauge): 1=healthy, 0=unhealthy
//! - `proxy_cache_bytes` / `proxy_cache_entries` (gauges)
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Totals are monotonic for the process lifetime and never reset
//! - The active gauge is maintained by an RAII guard so every exit path
//!   decrements it

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use serde::Serialize;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}

/// Process-wide request totals.
#[derive(Debug, Default)]
pub struct ProxyMetrics {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    errors: AtomicU64,
    /// Unix milliseconds of the most recent error; zero means never.
    last_error_ms: AtomicI64,
    active_requests: AtomicI64,
}

/// Point-in-time copy of [`ProxyMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    #[serde(rename = "requests")]
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub errors: u64,
    pub last_error: Option<DateTime<Utc>>,
    pub active_requests: i64,
}

impl ProxyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a new request and hold the active gauge until the guard drops.
    pub fn start_request(&self) -> ActiveRequest<'_> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let active = self.active_requests.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::gauge!("proxy_active_requests").set(active as f64);
        ActiveRequest { metrics: self }
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("proxy_cache_hits_total").increment(1);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("proxy_cache_misses_total").increment(1);
    }

    pub fn record_error(&self, kind: &'static str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.last_error_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        metrics::counter!("proxy_errors_total", "kind" => kind).increment(1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let last_error_ms = self.last_error_ms.load(Ordering::Relaxed);
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            last_error: (last_error_ms > 0)
                .then(|| DateTime::from_timestamp_millis(last_error_ms))
                .flatten(),
            active_requests: self.active_requests.load(Ordering::Relaxed),
        }
    }
}

/// Decrements the active-request gauge on drop.
#[derive(Debug)]
pub struct ActiveRequest<'a> {
    metrics: &'a ProxyMetrics,
}

impl Drop for ActiveRequest<'_> {
    fn drop(&mut self) {
        let active = self.metrics.active_requests.fetch_sub(1, Ordering::Relaxed) - 1;
        metrics::gauge!("proxy_active_requests").set(active as f64);
    }
}

/// Record one completed request on the facade.
pub fn record_request(service: &str, status: u16, latency: Duration) {
    metrics::counter!(
        "proxy_requests_total",
        "service" => service.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("proxy_request_duration_seconds", "service" => service.to_string())
        .record(latency.as_secs_f64());
}

pub fn record_rate_limited(scope: &'static str) {
    metrics::counter!("proxy_rate_limited_total", "scope" => scope).increment(1);
}
