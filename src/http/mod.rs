//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (axum router, tower layers, request id)
//!     → /health, /metrics → handlers.rs
//!     → anything else → rate limit → auth → proxy::Proxy::handle
//!     → Send to client
//! ```

pub mod handlers;
pub mod server;

pub use handlers::{HealthReport, X_REQUEST_ID};
pub use server::{build_router, AppState, HttpServer};
