//! Pooled outbound HTTP client.
//!
//! # Responsibilities
//! - Share one connection pool across all services
//! - Bound idle connections per host (pool) and in-flight requests per
//!   host (semaphore)
//!
//! # Design Decisions
//! - The per-host permit travels with the response body and is released
//!   when the body is fully consumed or dropped
//! - Dropping the request future cancels the call and returns the
//!   connection to the pool

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, Response},
};
use dashmap::DashMap;
use http_body_util::BodyExt;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::sync::Semaphore;

use crate::config::UpstreamConfig;
use crate::proxy::error::{error_chain, ProxyError};

pub struct UpstreamClient {
    client: Client<HttpConnector, Body>,
    permits: DashMap<String, Arc<Semaphore>>,
    max_conns_per_host: usize,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_millis(config.connect_timeout_ms)));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .build(connector);

        Self {
            client,
            permits: DashMap::new(),
            max_conns_per_host: config.max_conns_per_host.max(1),
        }
    }

    /// Send `request`, waiting for a per-host slot first.
    pub async fn send(&self, request: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let host = request
            .uri()
            .authority()
            .map(|a| a.as_str().to_string())
            .ok_or_else(|| ProxyError::InvalidRequest(format!("no authority in {}", request.uri())))?;

        let semaphore = self
            .permits
            .entry(host)
            .or_insert_with(|| Arc::new(Semaphore::new(self.max_conns_per_host)))
            .clone();
        let permit = semaphore
            .acquire_owned()
            .await
            .map_err(|e| ProxyError::Transport(e.to_string()))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| ProxyError::Transport(error_chain(&e)))?;

        Ok(response.map(|body| {
            Body::new(body.map_err(move |e| {
                let _held = &permit;
                e
            }))
        }))
    }

    /// Requests currently holding a slot for `host`.
    pub fn in_flight(&self, host: &str) -> usize {
        self.permits
            .get(host)
            .map(|s| self.max_conns_per_host - s.available_permits())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn permit_is_held_until_body_is_dropped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello")
                        .await;
                });
            }
        });

        let client = UpstreamClient::new(&UpstreamConfig::default());
        let request = Request::get(format!("http://{}/", addr)).body(Body::empty()).unwrap();
        let response = client.send(request).await.unwrap();
        assert_eq!(client.in_flight(&addr.to_string()), 1);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"hello");
        assert_eq!(client.in_flight(&addr.to_string()), 0);
    }

    #[tokio::test]
    async fn connection_refused_is_transport_error() {
        let client = UpstreamClient::new(&UpstreamConfig::default());
        let request = Request::get("http://127.0.0.1:1/").body(Body::empty()).unwrap();
        let err = client.send(request).await.unwrap_err();
        assert!(matches!(err, ProxyError::Transport(_)));
        assert_eq!(client.in_flight("127.0.0.1:1"), 0);
    }
}
