//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (per-client-IP token bucket, 429)
//!     → auth.rs (bearer token, 401/403)
//!     → Pass to proxy
//!
//! Outbound request:
//!     → headers.rs (strip hop-by-hop, append X-Forwarded-For)
//!     → rate_limit.rs (per-service bucket, checked by the proxy)
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any security check failure
//! - No trust in client input: X-Forwarded-For is appended to, never
//!   replaced by the client's value alone

pub mod auth;
pub mod headers;
pub mod rate_limit;

pub use auth::{StaticTokens, TokenValidator};
pub use rate_limit::{RateLimiter, ServiceLimiter};
