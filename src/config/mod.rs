//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is loaded once at startup and never mutated afterwards
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AuthConfig, BreakerConfig, CacheConfig, FilterConfig, HealthCheckConfig, ListenerConfig,
    LogFormat, ObservabilityConfig, ProxyConfig, RateLimitConfig, RewriteRuleConfig,
    ServiceConfig, ServiceRateLimit, TimeoutConfig, TlsConfig, UpstreamConfig,
};
