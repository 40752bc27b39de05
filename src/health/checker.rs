//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every configured service
//! - Publish one `HealthStatus` per service
//! - Track cycle aggregates for operators

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{header, Request, StatusCode, Uri};
use dashmap::DashMap;
use http_body_util::BodyExt;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::HealthCheckConfig;
use crate::health::status::{HealthMetrics, HealthStatus};
use crate::resilience::with_timeout;

const USER_AGENT: &str = "resilient-proxy-health-check/0.1";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HealthError {
    #[error("timeout waiting for first health check")]
    Timeout,

    #[error("health checker stopped")]
    Stopped,
}

pub struct HealthChecker {
    services: Vec<(String, String)>,
    statuses: DashMap<String, HealthStatus>,
    client: Client<HttpConnector, Body>,
    interval: Duration,
    timeout: Duration,
    max_body_bytes: usize,
    metrics: RwLock<HealthMetrics>,
    cycles: watch::Sender<u64>,
    running: AtomicBool,
    cancel: CancellationToken,
}

impl HealthChecker {
    /// `services` yields (name, base URL) pairs.
    pub fn new<I, N, U>(services: I, config: &HealthCheckConfig) -> Self
    where
        I: IntoIterator<Item = (N, U)>,
        N: Into<String>,
        U: Into<String>,
    {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(config.timeout()));
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(0)
            .build(connector);

        Self {
            services: services.into_iter().map(|(n, u)| (n.into(), u.into())).collect(),
            statuses: DashMap::new(),
            client,
            interval: config.interval(),
            timeout: config.timeout(),
            max_body_bytes: config.max_body_bytes,
            metrics: RwLock::new(HealthMetrics::default()),
            cycles: watch::channel(0).0,
            running: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Begin probing. The first cycle runs immediately, then once per
    /// interval. Calling again, or after `stop`, does nothing.
    pub fn start(self: &Arc<Self>) {
        if self.cancel.is_cancelled() || self.running.swap(true, Ordering::AcqRel) {
            return;
        }

        tracing::info!(
            services = self.services.len(),
            interval_ms = self.interval.as_millis() as u64,
            timeout_ms = self.timeout.as_millis() as u64,
            "Health checker starting"
        );

        let checker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(checker.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = checker.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::select! {
                            _ = checker.cancel.cancelled() => break,
                            _ = checker.check_all() => {}
                        }
                    }
                }
            }
            checker.running.store(false, Ordering::Release);
            tracing::info!("Health checker stopped");
        });
    }

    /// Stop future cycles without waiting for one in flight. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && !self.cancel.is_cancelled()
    }

    /// Wait until at least one full cycle has completed.
    pub async fn wait_for_first_check(&self, timeout: Duration) -> Result<(), HealthError> {
        let mut cycles = self.cycles.subscribe();
        let wait = async {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(HealthError::Stopped),
                done = cycles.wait_for(|count| *count > 0) => done.map(|_| ()).map_err(|_| HealthError::Stopped),
            }
        };
        with_timeout(timeout, wait).await.map_err(|_| HealthError::Timeout)?
    }

    pub fn get_status(&self, service: &str) -> Option<HealthStatus> {
        self.statuses.get(service).map(|s| s.value().clone())
    }

    pub fn get_all_status(&self) -> Vec<(String, HealthStatus)> {
        let mut all: Vec<_> = self
            .statuses
            .iter()
            .map(|s| (s.key().clone(), s.value().clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn metrics(&self) -> HealthMetrics {
        *self.metrics.read()
    }

    /// Run one probe cycle over every service and wait for all of them.
    pub async fn check_all(self: &Arc<Self>) {
        let started = Instant::now();
        let mut probes = JoinSet::new();
        for (name, url) in &self.services {
            let checker = Arc::clone(self);
            let name = name.clone();
            let url = url.clone();
            probes.spawn(async move {
                let status = checker.probe(&url).await;
                if !status.healthy {
                    tracing::warn!(
                        service = %name,
                        message = status.message.as_deref().unwrap_or(""),
                        "Health check failed"
                    );
                }
                metrics::gauge!("proxy_backend_healthy", "service" => name.clone())
                    .set(if status.healthy { 1.0 } else { 0.0 });
                let healthy = status.healthy;
                checker.statuses.insert(name, status);
                healthy
            });
        }

        let (mut healthy, mut unhealthy) = (0, 0);
        while let Some(result) = probes.join_next().await {
            match result {
                Ok(true) => healthy += 1,
                Ok(false) => unhealthy += 1,
                Err(e) => tracing::error!(error = %e, "Health probe task failed"),
            }
        }

        let elapsed = started.elapsed();
        let total = {
            let mut totals = self.metrics.write();
            totals.healthy_services = healthy;
            totals.unhealthy_services = unhealthy;
            totals.total_checks += 1;
            totals.last_check_duration = elapsed;
            totals.total_checks
        };
        metrics::histogram!("proxy_health_cycle_seconds").record(elapsed.as_secs_f64());
        self.cycles.send_replace(total);

        tracing::debug!(healthy, unhealthy, duration_ms = elapsed.as_millis() as u64, "Health check cycle complete");
    }

    async fn probe(&self, base_url: &str) -> HealthStatus {
        let target = match probe_uri(base_url) {
            Ok(uri) => uri,
            Err(reason) => return HealthStatus::unhealthy(format!("Invalid URL: {}", reason)),
        };

        let request = match Request::get(target)
            .header(header::USER_AGENT, USER_AGENT)
            .body(Body::empty())
        {
            Ok(request) => request,
            Err(e) => return HealthStatus::unhealthy(format!("Failed to create request: {}", e)),
        };

        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| format!("Request failed: {}", e))?;
            let status = response.status();
            drain(response.into_body(), self.max_body_bytes)
                .await
                .map_err(|e| format!("Failed to read response body: {}", e))?;
            Ok::<StatusCode, String>(status)
        };

        match with_timeout(self.timeout, exchange).await {
            Ok(Ok(StatusCode::OK)) => HealthStatus::healthy(),
            Ok(Ok(status)) => HealthStatus::unhealthy(format!("Unexpected status code: {}", status)),
            Ok(Err(message)) => HealthStatus::unhealthy(message),
            Err(elapsed) => HealthStatus::unhealthy(format!("Request failed: {}", elapsed)),
        }
    }
}

impl Drop for HealthChecker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Build `<base>/health`, rejecting URLs without scheme or host.
fn probe_uri(base_url: &str) -> Result<Uri, String> {
    let parsed = url::Url::parse(base_url).map_err(|e| e.to_string())?;
    if !parsed.has_host() {
        return Err("missing host".to_string());
    }
    format!("{}/health", base_url.trim_end_matches('/'))
        .parse::<Uri>()
        .map_err(|e| e.to_string())
}

/// Read and discard at most `limit` body bytes.
async fn drain<B>(mut body: B, limit: usize) -> Result<(), B::Error>
where
    B: BodyExt + Unpin,
{
    let mut read = 0;
    while read < limit {
        match body.frame().await {
            Some(frame) => {
                if let Ok(data) = frame?.into_data() {
                    read += bytes::Buf::remaining(&data);
                }
            }
            None => break,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config(interval_ms: u64, timeout_ms: u64) -> HealthCheckConfig {
        HealthCheckConfig {
            enabled: true,
            interval_ms,
            timeout_ms,
            max_body_bytes: 1024,
            gate_traffic: false,
        }
    }

    /// Serve every connection with a fixed raw response.
    async fn backend(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        format!("http://{}", addr)
    }

    /// Accept connections and never answer.
    async fn hanging_backend() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("http://{}", addr)
    }

    const OK: &str = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok";
    const DOWN: &str = "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

    #[tokio::test]
    async fn classifies_probe_outcomes() {
        let up = backend(OK).await;
        let down = backend(DOWN).await;
        let checker = Arc::new(HealthChecker::new(
            [
                ("up", up.as_str()),
                ("down", down.as_str()),
                ("refused", "http://127.0.0.1:1"),
                ("garbage", "not a url"),
            ],
            &config(60_000, 1_000),
        ));

        checker.check_all().await;

        assert!(checker.get_status("up").unwrap().healthy);

        let down = checker.get_status("down").unwrap();
        assert!(!down.healthy);
        assert_eq!(down.message.as_deref(), Some("Unexpected status code: 503 Service Unavailable"));

        let refused = checker.get_status("refused").unwrap();
        assert!(refused.message.unwrap().starts_with("Request failed"));

        let garbage = checker.get_status("garbage").unwrap();
        assert!(garbage.message.unwrap().starts_with("Invalid URL"));

        assert!(checker.get_status("unknown").is_none());
        assert_eq!(checker.get_all_status().len(), 4);

        let metrics = checker.metrics();
        assert_eq!(metrics.healthy_services, 1);
        assert_eq!(metrics.unhealthy_services, 3);
        assert_eq!(metrics.total_checks, 1);
    }

    #[tokio::test]
    async fn hung_probe_does_not_delay_others() {
        let up = backend(OK).await;
        let hung = hanging_backend().await;
        let checker = Arc::new(HealthChecker::new(
            [("fast", up.as_str()), ("hung", hung.as_str())],
            &config(60_000, 2_000),
        ));

        let started = Instant::now();
        let cycle = tokio::spawn({
            let checker = checker.clone();
            async move { checker.check_all().await }
        });

        while checker.get_status("fast").is_none() {
            assert!(started.elapsed() < Duration::from_millis(1_000), "fast probe was delayed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(checker.get_status("hung").is_none());

        cycle.await.unwrap();
        let hung = checker.get_status("hung").unwrap();
        assert!(!hung.healthy);
        assert!(started.elapsed() >= Duration::from_millis(2_000));
    }

    #[tokio::test]
    async fn start_stop_lifecycle() {
        let up = backend(OK).await;
        let checker = Arc::new(HealthChecker::new([("svc", up.as_str())], &config(50, 40)));
        assert!(!checker.is_running());

        checker.start();
        checker.start();
        assert!(checker.is_running());
        checker.wait_for_first_check(Duration::from_secs(2)).await.unwrap();
        assert!(checker.get_status("svc").unwrap().healthy);

        checker.stop();
        checker.stop();
        assert!(!checker.is_running());

        let cycles = checker.metrics().total_checks;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(checker.metrics().total_checks <= cycles + 1);
        assert_eq!(
            checker.wait_for_first_check(Duration::from_millis(10)).await,
            Err(HealthError::Stopped)
        );
    }

    #[tokio::test]
    async fn wait_times_out_when_never_started() {
        let checker = HealthChecker::new(Vec::<(String, String)>::new(), &config(1_000, 500));
        assert_eq!(
            checker.wait_for_first_check(Duration::from_millis(20)).await,
            Err(HealthError::Timeout)
        );
    }

    #[test]
    fn probe_uri_appends_health_path() {
        assert_eq!(probe_uri("http://a:1/").unwrap(), "http://a:1/health");
        assert_eq!(probe_uri("http://a:1/base").unwrap(), "http://a:1/base/health");
        assert!(probe_uri("localhost").is_err());
    }
}
