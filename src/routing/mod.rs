//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request path
//!     → router.rs (longest matching prefix wins)
//!     → matcher.rs (segment-boundary prefix test, optional strip)
//!     → Return: matched Route or None (404)
//!
//! Route compilation (at startup):
//!     services.<name> config
//!     → Normalize prefix ("/<name>" unless path_prefix is set)
//!     → Sort by prefix length, longest first
//!     → Freeze as immutable router
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in the hot path (prefix matching only)
//! - Deterministic: same path always resolves to the same service

pub mod matcher;
pub mod router;

pub use matcher::PathPrefix;
pub use router::{Route, ServiceRouter};
