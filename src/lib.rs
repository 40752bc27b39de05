//! Resilient reverse-proxy gateway library.
//!
//! Routes inbound HTTP requests to named backend services through a
//! filter chain, per-service circuit breakers, a TTL and size bounded
//! response cache and a concurrent health checker.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod proxy;
pub mod routing;

// Request shaping and traffic management
pub mod cache;
pub mod filters;
pub mod health;
pub mod resilience;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use proxy::Proxy;
