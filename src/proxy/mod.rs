//! Proxy orchestrator.
//!
//! # Data Flow
//! ```text
//! Request
//!     → resolve service (404)
//!     → global filters → service filters (filter's status)
//!     → service rate limit (429)
//!     → circuit breaker allow (503)
//!     → cache lookup (hit: write cached copy, done)
//!     → health gate, if enabled (503)
//!     → forward over pooled client with per-service timeout (502/504)
//!     → record breaker outcome (5xx or transport error = failure)
//!     → cache store (GET 200, buffered once)
//!     → access log + metrics
//! ```
//!
//! # Design Decisions
//! - Breaker admission precedes the cache lookup, which precedes forwarding
//! - A half-open trial that is answered without reaching the backend is
//!   released instead of recorded
//! - Only cache-eligible responses are buffered; everything else streams

pub mod client;
pub mod error;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::{Body, HttpBody},
    http::{header, request::Parts, HeaderMap, Method, Request, Uri, Version},
    response::{IntoResponse, Response},
};
use http_body_util::{BodyExt, LengthLimitError, Limited};

use crate::cache::{BufferedResponse, ResponseCache};
use crate::config::{ProxyConfig, ServiceConfig};
use crate::filters::{FilterChain, FilterError, HeaderFilter};
use crate::health::HealthChecker;
use crate::http::X_REQUEST_ID;
use crate::observability::access_log::{loggable_headers, AccessLogEntry};
use crate::observability::metrics::{self, ProxyMetrics};
use crate::resilience::{with_timeout, CircuitBreaker};
use crate::routing::{Route, ServiceRouter};
use crate::security::headers::{append_forwarded_for, strip_hop_by_hop};
use crate::security::ServiceLimiter;

pub use client::UpstreamClient;
pub use error::ProxyError;
use error::error_chain;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("global filters: {0}")]
    Filters(#[from] FilterError),

    #[error("service {service}: {source}")]
    ServiceFilters {
        service: String,
        #[source]
        source: FilterError,
    },

    #[error("service {service}: invalid url {url:?}")]
    InvalidUrl { service: String, url: String },
}

/// Everything the proxy needs to serve one backend.
pub struct Service {
    name: String,
    base_url: String,
    timeout: Duration,
    headers: HeaderFilter,
    filters: FilterChain,
    breaker: Option<Arc<CircuitBreaker>>,
    limiter: Option<ServiceLimiter>,
}

impl Service {
    fn from_config(name: &str, service: &ServiceConfig, config: &ProxyConfig) -> Result<Self, BuildError> {
        let base_url = service.url.trim_end_matches('/').to_string();
        let valid = base_url
            .parse::<Uri>()
            .map(|uri| uri.scheme().is_some() && uri.authority().is_some())
            .unwrap_or(false);
        if !valid {
            return Err(BuildError::InvalidUrl {
                service: name.to_string(),
                url: service.url.clone(),
            });
        }

        let in_service = |source| BuildError::ServiceFilters {
            service: name.to_string(),
            source,
        };

        Ok(Self {
            name: name.to_string(),
            base_url,
            timeout: service.timeout(Duration::from_millis(config.upstream.default_timeout_ms)),
            headers: HeaderFilter::new(&service.headers).map_err(in_service)?,
            filters: FilterChain::from_config(&service.filters).map_err(in_service)?,
            breaker: config
                .breaker_for(service)
                .map(|b| Arc::new(CircuitBreaker::from_config(name, &b))),
            limiter: service.rate_limit.as_ref().map(ServiceLimiter::new),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn filters(&self) -> &FilterChain {
        &self.filters
    }

    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    fn upstream_uri(&self, path: &str, query: Option<&str>) -> Result<Uri, ProxyError> {
        let target = match query {
            Some(q) => format!("{}{}?{}", self.base_url, path, q),
            None => format!("{}{}", self.base_url, path),
        };
        target
            .parse()
            .map_err(|e| ProxyError::InvalidRequest(format!("{}: {}", target, e)))
    }
}

enum Origin {
    Cache,
    Upstream,
}

enum Upstream {
    Buffered(BufferedResponse),
    Streaming(Response),
}

#[derive(Default)]
struct RequestTrace {
    service: Option<String>,
    cache_hit: bool,
    circuit_state: Option<&'static str>,
}

pub struct Proxy {
    router: ServiceRouter<Service>,
    filters: FilterChain,
    cache: Option<Arc<ResponseCache>>,
    health: Option<Arc<HealthChecker>>,
    gate_traffic: bool,
    client: UpstreamClient,
    metrics: ProxyMetrics,
    max_response_body_bytes: usize,
}

impl Proxy {
    /// Build every per-service component from configuration. Background
    /// tasks (health probes, cache sweep) are not started here.
    pub fn new(config: &ProxyConfig) -> Result<Self, BuildError> {
        let filters = FilterChain::from_config(&config.filters)?;

        let routes = config
            .services
            .iter()
            .map(|(name, svc)| {
                let service = Service::from_config(name, svc, config)?;
                Ok(Route::new(name.clone(), &svc.prefix(name), svc.strip_prefix, service))
            })
            .collect::<Result<Vec<_>, BuildError>>()?;

        let cache = config
            .cache
            .enabled
            .then(|| Arc::new(ResponseCache::from_config(&config.cache)));

        let health = config.health_check.enabled.then(|| {
            Arc::new(HealthChecker::new(
                config.services.iter().map(|(n, s)| (n.clone(), s.url.clone())),
                &config.health_check,
            ))
        });

        Ok(Self {
            router: ServiceRouter::new(routes),
            filters,
            cache,
            health,
            gate_traffic: config.health_check.enabled && config.health_check.gate_traffic,
            client: UpstreamClient::new(&config.upstream),
            metrics: ProxyMetrics::new(),
            max_response_body_bytes: config.upstream.max_response_body_bytes,
        })
    }

    /// Global filters, run before any service's own.
    pub fn filters(&self) -> &FilterChain {
        &self.filters
    }

    pub fn metrics(&self) -> &ProxyMetrics {
        &self.metrics
    }

    pub fn cache(&self) -> Option<&Arc<ResponseCache>> {
        self.cache.as_ref()
    }

    pub fn health(&self) -> Option<&Arc<HealthChecker>> {
        self.health.as_ref()
    }

    pub fn service(&self, name: &str) -> Option<&Service> {
        self.router.get(name).map(Route::target)
    }

    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.router.routes().map(Route::target)
    }

    /// Serve one inbound request. Never fails: every error becomes a
    /// response.
    pub async fn handle(&self, request: Request<Body>, client: SocketAddr) -> Response {
        let started = Instant::now();
        let _active = self.metrics.start_request();

        let (parts, body) = request.into_parts();
        let request_id = parts
            .headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string();
        let method = parts.method.to_string();
        let path = parts.uri.path().to_string();
        let headers = loggable_headers(&parts.headers);

        let mut trace = RequestTrace::default();
        let (response, error) = match self.dispatch(parts, body, client.ip(), &mut trace).await {
            Ok(response) => (response, None),
            Err(err) => {
                let detail = error_chain(&err);
                self.metrics.record_error(err.kind());
                if err.is_upstream_failure() {
                    tracing::error!(request_id = %request_id, path = %path, error = %detail, "Upstream failure");
                } else {
                    tracing::debug!(request_id = %request_id, path = %path, error = %detail, "Request rejected");
                }
                (err.into_response(), Some(detail))
            }
        };

        let latency = started.elapsed();
        let service = trace.service.unwrap_or_else(|| "-".to_string());
        let status = response.status().as_u16();
        metrics::record_request(&service, status, latency);

        AccessLogEntry {
            request_id,
            client_ip: client.ip().to_string(),
            method,
            path,
            service,
            status,
            latency_ms: latency.as_millis() as u64,
            bytes_sent: response.body().size_hint().exact().unwrap_or(0),
            cache_hit: trace.cache_hit,
            circuit_state: trace.circuit_state,
            error,
            headers,
        }
        .emit();

        response
    }

    async fn dispatch(
        &self,
        mut parts: Parts,
        body: Body,
        client_ip: IpAddr,
        trace: &mut RequestTrace,
    ) -> Result<Response, ProxyError> {
        let route = self
            .router
            .resolve(parts.uri.path())
            .ok_or_else(|| ProxyError::NoRoute(parts.uri.path().to_string()))?;
        let service = route.target();
        trace.service = Some(service.name.clone());

        self.filters.process(&mut parts)?;
        service.filters.process(&mut parts)?;

        if let Some(limiter) = &service.limiter {
            if !limiter.try_acquire() {
                metrics::record_rate_limited("service");
                return Err(ProxyError::RateLimited(service.name.clone()));
            }
        }

        let Some(breaker) = service.breaker.as_deref() else {
            return self
                .serve_admitted(route, parts, body, client_ip, trace)
                .await
                .map(|(response, _)| response);
        };

        let Some(admission) = breaker.allow() else {
            trace.circuit_state = Some(breaker.get_state().as_str());
            return Err(ProxyError::CircuitOpen(service.name.clone()));
        };

        let result = self.serve_admitted(route, parts, body, client_ip, trace).await;
        match &result {
            Ok((response, Origin::Upstream)) if response.status().is_server_error() => {
                breaker.failure(admission)
            }
            Ok((_, Origin::Upstream)) => breaker.success(admission),
            Ok((_, Origin::Cache)) => breaker.abandon_trial(admission),
            Err(e) if e.is_upstream_failure() => breaker.failure(admission),
            Err(_) => breaker.abandon_trial(admission),
        }
        trace.circuit_state = Some(breaker.get_state().as_str());
        result.map(|(response, _)| response)
    }

    /// Everything after breaker admission: cache, gate, forward, store.
    async fn serve_admitted(
        &self,
        route: &Route<Service>,
        parts: Parts,
        body: Body,
        client_ip: IpAddr,
        trace: &mut RequestTrace,
    ) -> Result<(Response, Origin), ProxyError> {
        let service = route.target();

        if let Some(cache) = &self.cache {
            if parts.method == Method::GET {
                if let Some(hit) = cache.get(&parts.method, &parts.uri) {
                    self.metrics.record_cache_hit();
                    trace.cache_hit = true;
                    return Ok((hit.into_response(), Origin::Cache));
                }
                self.metrics.record_cache_miss();
            }
        }

        if self.gate_traffic {
            let unhealthy = self
                .health
                .as_ref()
                .and_then(|h| h.get_status(&service.name))
                .is_some_and(|s| !s.healthy);
            if unhealthy {
                return Err(ProxyError::Unhealthy(service.name.clone()));
            }
        }

        let method = parts.method.clone();
        let cache_uri = parts.uri.clone();
        match self.forward(route, parts, body, client_ip).await? {
            Upstream::Buffered(buffered) => {
                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.set(&method, &cache_uri, &buffered) {
                        tracing::warn!(service = %service.name, error = %e, "Response not cached");
                    }
                }
                Ok((buffered.into_response(), Origin::Upstream))
            }
            Upstream::Streaming(response) => Ok((response, Origin::Upstream)),
        }
    }

    async fn forward(
        &self,
        route: &Route<Service>,
        mut parts: Parts,
        body: Body,
        client_ip: IpAddr,
    ) -> Result<Upstream, ProxyError> {
        let service = route.target();
        let path = route.upstream_path(parts.uri.path()).to_string();
        parts.uri = service.upstream_uri(&path, parts.uri.query())?;
        parts.version = Version::HTTP_11;

        strip_hop_by_hop(&mut parts.headers);
        parts.headers.remove(header::HOST);
        append_forwarded_for(&mut parts.headers, client_ip);
        service.headers.apply(&mut parts.headers);

        let buffer = self.cache.is_some() && parts.method == Method::GET;
        let request = Request::from_parts(parts, body);

        with_timeout(service.timeout, self.exchange(request, buffer))
            .await
            .map_err(|elapsed| ProxyError::Timeout(elapsed.0))?
    }

    /// Send upstream and either buffer a cache-eligible response or hand
    /// back the stream.
    async fn exchange(&self, request: Request<Body>, buffer: bool) -> Result<Upstream, ProxyError> {
        let method = request.method().clone();
        let limit = self.max_response_body_bytes;

        let response = self.client.send(request).await?;
        let (mut head, body) = response.into_parts();
        strip_hop_by_hop(&mut head.headers);

        let eligible = buffer
            && ResponseCache::is_cacheable(&method, head.status, &head.headers)
            && declared_length(&head.headers).map_or(true, |len| len <= limit);
        if !eligible {
            return Ok(Upstream::Streaming(Response::from_parts(head, body)));
        }

        let bytes = Limited::new(body, limit)
            .collect()
            .await
            .map_err(|e| {
                if e.downcast_ref::<LengthLimitError>().is_some() {
                    ProxyError::ResponseTooLarge(limit)
                } else {
                    ProxyError::Transport(error_chain(&*e))
                }
            })?
            .to_bytes();
        Ok(Upstream::Buffered(BufferedResponse::new(head.status, head.headers, bytes)))
    }
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}
