//! Token bucket rate limiting.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;

use crate::config::{RateLimitConfig, ServiceRateLimit};
use crate::observability::metrics;

/// Idle buckets are pruned once the map grows past this many keys.
const PRUNE_THRESHOLD: usize = 10_000;

/// A simple token bucket.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn refill(&mut self, capacity: f64, refill_rate: f64, now: Instant) {
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> bool {
        self.refill(capacity, refill_rate, Instant::now());
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Keyed token buckets sharing one rate and burst.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, TokenBucket>>,
    rps: f64,
    burst: f64,
}

impl RateLimiter {
    pub fn new(requests_per_second: u32, burst_size: u32) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            rps: requests_per_second as f64,
            burst: burst_size.max(1) as f64,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests_per_second, config.burst_size)
    }

    /// Take one token from `key`'s bucket.
    pub fn check(&self, key: &str) -> bool {
        let mut buckets = self.buckets.lock();
        if buckets.len() >= PRUNE_THRESHOLD && !buckets.contains_key(key) {
            let now = Instant::now();
            let (burst, rps) = (self.burst, self.rps);
            buckets.retain(|_, bucket| {
                bucket.refill(burst, rps, now);
                bucket.tokens < burst
            });
        }

        buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.burst))
            .try_acquire(self.burst, self.rps)
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets.lock().len()
    }
}

/// A single bucket shared by all traffic to one service.
#[derive(Debug)]
pub struct ServiceLimiter {
    bucket: Mutex<TokenBucket>,
    rps: f64,
    burst: f64,
}

impl ServiceLimiter {
    pub fn new(config: &ServiceRateLimit) -> Self {
        let burst = config.burst_size.max(1) as f64;
        Self {
            bucket: Mutex::new(TokenBucket::new(burst)),
            rps: config.requests_per_second as f64,
            burst,
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.bucket.lock().try_acquire(self.burst, self.rps)
    }
}

/// Middleware limiting requests per client IP.
pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let client = addr.ip().to_string();
    if limiter.check(&client) {
        next.run(request).await
    } else {
        tracing::warn!(client = %client, "Rate limit exceeded");
        metrics::record_rate_limited("client");
        (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded").into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::connect_info::MockConnectInfo, routing::get, Router};
    use tower::ServiceExt;

    #[test]
    fn test_burst_then_reject() {
        let limiter = RateLimiter::new(1, 3);
        assert!(limiter.check("a"));
        assert!(limiter.check("a"));
        assert!(limiter.check("a"));
        assert!(!limiter.check("a"));
        // Separate key, separate bucket
        assert!(limiter.check("b"));
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[test]
    fn test_refill() {
        let limiter = RateLimiter::new(100, 1);
        assert!(limiter.check("a"));
        assert!(!limiter.check("a"));
        std::thread::sleep(std::time::Duration::from_millis(30));
        assert!(limiter.check("a"));
    }

    #[test]
    fn test_service_limiter() {
        let limiter = ServiceLimiter::new(&ServiceRateLimit {
            requests_per_second: 1,
            burst_size: 2,
        });
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_middleware_returns_429() {
        let limiter = Arc::new(RateLimiter::new(1, 1));
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(limiter, rate_limit_middleware))
            .layer(MockConnectInfo(SocketAddr::from(([10, 0, 0, 1], 4000))));

        let request = || Request::builder().uri("/").body(Body::empty()).unwrap();
        let first = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let second = app.oneshot(request()).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
