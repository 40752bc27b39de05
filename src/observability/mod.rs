//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (process totals + metrics facade)
//!     → access_log.rs (one event per proxied request)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → GET /metrics (JSON snapshot of process totals)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through the access log
//! - Metrics are cheap (atomic increments)
//! - Process totals are owned by the proxy, not a global

pub mod access_log;
pub mod logging;
pub mod metrics;

pub use self::access_log::AccessLogEntry;
pub use self::logging::init_logging;
pub use self::metrics::{MetricsSnapshot, ProxyMetrics};
