//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     trigger() → token cancelled → listener stops accepting
//!               → health checker stops → cache sweep stops
//!               → in-flight requests drain → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger()
//! ```
//!
//! # Design Decisions
//! - One cancellation token is shared by every background task
//! - Triggering is idempotent and may come from a signal or from code
//!   (tests shut the gateway down without signals)

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::{shutdown_signal, spawn_signal_handler};
