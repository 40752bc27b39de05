//! Resilient reverse-proxy gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ axum router ──▶ rate limit ──▶ auth ──▶ Proxy::handle
//!                  │                                       │
//!                  ├─ GET /health  (probe map + breakers)  ├─ service router
//!                  └─ GET /metrics (process totals)        ├─ filter chain
//!                                                          ├─ circuit breaker
//!                                                          ├─ response cache
//!                                                          └─ pooled client ──▶ Backend
//!
//!     Background: health checker ticker, cache sweep, signal handler
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use resilient_proxy::config::load_config;
use resilient_proxy::lifecycle::{spawn_signal_handler, Shutdown};
use resilient_proxy::net::load_tls_config;
use resilient_proxy::observability::{init_logging, metrics::init_metrics};
use resilient_proxy::HttpServer;

#[derive(Parser)]
#[command(name = "resilient-proxy")]
#[command(about = "Reverse proxy with circuit breaking, caching and health checks", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    init_logging(&config.observability)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "resilient-proxy starting"
    );

    tracing::info!(
        bind_address = %config.listener.bind_address,
        services = config.services.len(),
        cache_enabled = config.cache.enabled,
        health_checks = config.health_check.enabled,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => {
                if let Err(e) = init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start Prometheus exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    let tls = config.listener.tls.clone();
    let bind_address = config.listener.bind_address.clone();
    let server = HttpServer::new(config, shutdown)?;

    match tls {
        Some(tls) => {
            let tls_config = load_tls_config(&tls).await?;
            let addr: SocketAddr = bind_address.parse()?;
            server.run_tls(addr, tls_config).await?;
        }
        None => {
            let listener = TcpListener::bind(&bind_address).await?;
            server.run(listener).await?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
