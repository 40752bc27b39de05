//! Built-in endpoints served by the gateway itself.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::Response,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::http::server::AppState;
use crate::observability::MetricsSnapshot;
use crate::resilience::CircuitState;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// "ok" when every service is healthy, "degraded" otherwise.
    pub status: String,
    pub services: BTreeMap<String, bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checks: Option<CheckSummary>,
    pub timestamp: DateTime<Utc>,
}

/// Aggregates of the last completed probe cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSummary {
    pub healthy: usize,
    pub unhealthy: usize,
    pub cycles: u64,
    pub last_cycle_ms: u64,
}

/// A service counts as healthy unless its last probe failed or its
/// breaker is open. Services not probed yet are reported healthy.
pub async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    let proxy = &state.proxy;
    let health = proxy.health();

    let services: BTreeMap<String, bool> = proxy
        .services()
        .map(|service| {
            let probed = health
                .and_then(|h| h.get_status(service.name()))
                .map_or(true, |s| s.healthy);
            let closed = service
                .breaker()
                .map_or(true, |b| b.get_state() != CircuitState::Open);
            (service.name().to_string(), probed && closed)
        })
        .collect();

    let status = if services.values().all(|healthy| *healthy) {
        "ok"
    } else {
        "degraded"
    };

    let checks = health.map(|h| {
        let m = h.metrics();
        CheckSummary {
            healthy: m.healthy_services,
            unhealthy: m.unhealthy_services,
            cycles: m.total_checks,
            last_cycle_ms: m.last_check_duration.as_millis() as u64,
        }
    });

    Json(HealthReport {
        status: status.to_string(),
        services,
        checks,
        timestamp: Utc::now(),
    })
}

pub async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.proxy.metrics().snapshot())
}

/// Fallback for every path not claimed by a built-in endpoint.
pub async fn proxy(
    State(state): State<AppState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    state.proxy.handle(request, client).await
}
