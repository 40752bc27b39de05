//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Periodic timer (checker.rs)
//!     → Fan out one probe task per service: GET <base>/health
//!     → Each probe publishes its HealthStatus as soon as it completes
//!     → Fan in: update cycle aggregates, bump cycle counter
//!
//! Readers:
//!     /health endpoint, proxy health gate → get_status()/get_all_status()
//! ```
//!
//! # Design Decisions
//! - Probes are independent tasks; a hung backend only costs its own
//!   probe timeout
//! - Status entries are replaced wholesale so readers never see a torn value
//! - Probe failures are never surfaced to proxied traffic, only to the map

pub mod checker;
pub mod status;

pub use checker::{HealthChecker, HealthError};
pub use status::{HealthMetrics, HealthStatus};
