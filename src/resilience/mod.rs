//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to backend:
//!     → circuit_breaker.rs (admission; per-service state machine)
//!     → timeouts.rs (deadline around the outbound call)
//!     → circuit_breaker.rs (record outcome: 5xx/transport = failure)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Circuit breaker prevents cascading failures
//! - No retries: a failed call is reported, not replayed

pub mod circuit_breaker;
pub mod timeouts;

pub use circuit_breaker::{Admission, CircuitBreaker, CircuitState, TrialId};
pub use timeouts::{with_timeout, Elapsed};
