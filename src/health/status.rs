//! Health probe results.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of the most recently completed probe for one service.
///
/// Always replaced as a whole, never patched in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub last_check: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthStatus {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            last_check: Utc::now(),
            message: None,
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            last_check: Utc::now(),
            message: Some(message.into()),
        }
    }
}

/// Aggregates over the last completed probe cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthMetrics {
    pub healthy_services: usize,
    pub unhealthy_services: usize,
    /// Completed cycles since start.
    pub total_checks: u64,
    pub last_check_duration: Duration,
}
