//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the axum Router with the built-in endpoints and the proxy
//!   fallback
//! - Wire up middleware (request ID, tracing, concurrency, body limit,
//!   timeout, rate limit, auth)
//! - Start and stop background tasks (health probes, cache sweep)
//! - Serve plain TCP or TLS until shutdown
//!
//! # Design Decisions
//! - Layers listed first run first (outermost)
//! - The body limit wraps the timeout: the timeout layer needs a response
//!   body with `Default`, which the limit's `ResponseBody` lacks
//! - `/health` and `/metrics` bypass rate limiting and auth
//! - Background tasks share the server's shutdown token

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{middleware::from_fn_with_state, routing::get, Router};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tower::{limit::GlobalConcurrencyLimitLayer, ServiceBuilder};
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::http::handlers;
use crate::lifecycle::Shutdown;
use crate::proxy::{BuildError, Proxy};
use crate::security::auth::auth_middleware;
use crate::security::rate_limit::rate_limit_middleware;
use crate::security::{RateLimiter, StaticTokens, TokenValidator};

/// How long TLS connections may drain after shutdown is triggered.
const TLS_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<Proxy>,
}

/// HTTP server for the reverse proxy.
pub struct HttpServer {
    app: Router,
    proxy: Arc<Proxy>,
    config: ProxyConfig,
    shutdown: Shutdown,
}

impl HttpServer {
    pub fn new(config: ProxyConfig, shutdown: Shutdown) -> Result<Self, BuildError> {
        let proxy = Arc::new(Proxy::new(&config)?);
        let app = build_router(&config, Arc::clone(&proxy));
        Ok(Self {
            app,
            proxy,
            config,
            shutdown,
        })
    }

    pub fn proxy(&self) -> &Arc<Proxy> {
        &self.proxy
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn router(&self) -> Router {
        self.app.clone()
    }

    fn start_background(&self) {
        if let Some(health) = self.proxy.health() {
            health.start();
            let health = Arc::clone(health);
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                shutdown.wait().await;
                health.stop();
            });
        }

        if let Some(cache) = self.proxy.cache() {
            let interval = Duration::from_secs(self.config.cache.sweep_interval_secs.max(1));
            cache.spawn_maintenance(interval, self.shutdown.token());
        }
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            services = self.proxy.services().count(),
            cache = self.proxy.cache().is_some(),
            health_checks = self.proxy.health().is_some(),
            "HTTP server starting"
        );

        self.start_background();

        let app = self.app.into_make_service_with_connect_info::<SocketAddr>();
        let shutdown = self.shutdown.clone();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await;

        self.shutdown.trigger();
        tracing::info!("HTTP server stopped");
        served
    }

    /// Run the server over TLS on `addr`.
    pub async fn run_tls(self, addr: SocketAddr, tls: RustlsConfig) -> Result<(), std::io::Error> {
        tracing::info!(
            address = %addr,
            services = self.proxy.services().count(),
            "HTTPS server starting"
        );

        self.start_background();

        let handle = axum_server::Handle::new();
        let drain = handle.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            shutdown.wait().await;
            drain.graceful_shutdown(Some(TLS_DRAIN_TIMEOUT));
        });

        let served = axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(self.app.into_make_service_with_connect_info::<SocketAddr>())
            .await;

        self.shutdown.trigger();
        tracing::info!("HTTPS server stopped");
        served
    }
}

/// Build the axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(config: &ProxyConfig, proxy: Arc<Proxy>) -> Router {
    let state = AppState { proxy };

    let mut proxied = Router::new()
        .fallback(handlers::proxy)
        .with_state(state.clone());

    if config.auth.enabled {
        let validator: Arc<dyn TokenValidator> = Arc::new(StaticTokens::new(config.auth.tokens.clone()));
        proxied = proxied.layer(from_fn_with_state(validator, auth_middleware));
    }
    if config.rate_limit.enabled {
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        proxied = proxied.layer(from_fn_with_state(limiter, rate_limit_middleware));
    }

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .merge(proxied)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(GlobalConcurrencyLimitLayer::new(
                    config.listener.max_concurrent_requests.max(1),
                ))
                .layer(RequestBodyLimitLayer::new(config.listener.max_request_body_bytes))
                .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
        )
}
