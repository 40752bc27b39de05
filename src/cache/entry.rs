//! Cached response representation.

use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderMap, StatusCode},
    response::Response,
};
use bytes::Bytes;
use parking_lot::Mutex;

/// A fully buffered response.
///
/// The body is an immutable `Bytes`, so clones share storage and every
/// consumer reads the complete payload independently.
#[derive(Debug, Clone)]
pub struct BufferedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl BufferedResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

#[derive(Debug)]
struct EntryStats {
    hits: u64,
    last_access: Instant,
}

/// One stored response plus its bookkeeping. `size` is the body length
/// and never changes after creation.
#[derive(Debug)]
pub(crate) struct CacheEntry {
    response: BufferedResponse,
    pub(crate) size: u64,
    expires_at: Instant,
    stats: Mutex<EntryStats>,
}

impl CacheEntry {
    pub(crate) fn new(response: BufferedResponse, expires_at: Instant, now: Instant) -> Self {
        Self {
            size: response.body.len() as u64,
            response,
            expires_at,
            stats: Mutex::new(EntryStats {
                hits: 0,
                last_access: now,
            }),
        }
    }

    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Record a hit and return a copy, or `None` if expired. The expiry
    /// check and the counter update happen under the entry lock.
    pub(crate) fn hit(&self, now: Instant) -> Option<BufferedResponse> {
        let mut stats = self.stats.lock();
        if self.is_expired(now) {
            return None;
        }
        stats.hits += 1;
        stats.last_access = now;
        Some(self.response.clone())
    }

    /// Seconds since last access divided by (hits + 1). Higher is evicted
    /// first.
    pub(crate) fn eviction_score(&self, now: Instant) -> f64 {
        let stats = self.stats.lock();
        let idle = now.saturating_duration_since(stats.last_access).as_secs_f64();
        idle / (stats.hits as f64 + 1.0)
    }

    #[cfg(test)]
    pub(crate) fn hits(&self) -> u64 {
        self.stats.lock().hits
    }
}
