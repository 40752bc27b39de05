//! Failure injection tests for the gateway.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use resilient_proxy::config::{BreakerConfig, ServiceConfig};
use resilient_proxy::resilience::CircuitState;

mod common;

#[tokio::test]
async fn test_breaker_isolates_failing_service() {
    let svc1 = common::start_mock_backend("one").await;

    let svc2_calls = Arc::new(AtomicU32::new(0));
    let svc2_failing = Arc::new(AtomicBool::new(true));
    let (calls, failing) = (svc2_calls.clone(), svc2_failing.clone());
    let svc2 = common::start_programmable_backend(move |_| {
        let (calls, failing) = (calls.clone(), failing.clone());
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            if failing.load(Ordering::SeqCst) {
                (500, "boom".into())
            } else {
                (200, "two".into())
            }
        }
    })
    .await;

    let mut config = common::base_config();
    config
        .services
        .insert("svc1".into(), ServiceConfig::new(format!("http://{}", svc1)));
    let mut svc2_config = ServiceConfig::new(format!("http://{}", svc2));
    svc2_config.circuit_breaker = Some(BreakerConfig {
        max_failures: 2,
        timeout_ms: 60_000,
    });
    config.services.insert("svc2".into(), svc2_config);

    let gateway = common::start_gateway(config).await;
    let client = common::client();

    for _ in 0..2 {
        let res = client.get(gateway.url("/svc2/x")).send().await.unwrap();
        assert_eq!(res.status(), 500);
    }

    let unaffected = {
        let client = client.clone();
        let url = gateway.url("/svc1/x");
        tokio::spawn(async move { client.get(url).send().await.unwrap() })
    };

    let res = client.get(gateway.url("/svc2/x")).send().await.unwrap();
    assert_eq!(res.status(), 503);
    assert_eq!(res.text().await.unwrap(), "Service unavailable");
    assert_eq!(svc2_calls.load(Ordering::SeqCst), 2, "open breaker must not reach the backend");

    let res = unaffected.await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "one");

    gateway.stop().await;
}

#[tokio::test]
async fn test_breaker_recovers_through_half_open_trial() {
    let failing = Arc::new(AtomicBool::new(true));
    let flag = failing.clone();
    let backend = common::start_programmable_backend(move |_| {
        let flag = flag.clone();
        async move {
            if flag.load(Ordering::SeqCst) {
                (503, "down".into())
            } else {
                (200, "up".into())
            }
        }
    })
    .await;

    let mut config = common::base_config();
    config.circuit_breaker = Some(BreakerConfig {
        max_failures: 1,
        timeout_ms: 100,
    });
    config
        .services
        .insert("api".into(), ServiceConfig::new(format!("http://{}", backend)));

    let gateway = common::start_gateway(config).await;
    let client = common::client();
    let breaker = gateway.proxy.service("api").unwrap().breaker().unwrap().clone();

    assert_eq!(client.get(gateway.url("/api/")).send().await.unwrap().status(), 503);
    assert_eq!(breaker.get_state(), CircuitState::Open);

    failing.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(150)).await;

    let res = client.get(gateway.url("/api/")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(breaker.get_state(), CircuitState::Closed);
    assert_eq!(breaker.failures(), 0);

    gateway.stop().await;
}

#[tokio::test]
async fn test_slow_backend_times_out() {
    let backend = common::start_programmable_backend(|_| async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        (200, "late".into())
    })
    .await;

    let mut config = common::base_config();
    let mut service = ServiceConfig::new(format!("http://{}", backend));
    service.timeout_ms = Some(100);
    config.services.insert("slow".into(), service);

    let gateway = common::start_gateway(config).await;
    let res = common::client()
        .get(gateway.url("/slow/x"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 504);
    assert_eq!(res.text().await.unwrap(), "Upstream request timed out");

    let snapshot = gateway.proxy.metrics().snapshot();
    assert_eq!(snapshot.errors, 1);
    assert!(snapshot.last_error.is_some());

    gateway.stop().await;
}

#[tokio::test]
async fn test_unreachable_backend_is_502_without_details() {
    let mut config = common::base_config();
    config
        .services
        .insert("gone".into(), ServiceConfig::new("http://127.0.0.1:1"));

    let gateway = common::start_gateway(config).await;
    let res = common::client()
        .get(gateway.url("/gone/x"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 502);
    let body = res.text().await.unwrap();
    assert_eq!(body, "Upstream request failed");
    assert!(!body.contains("127.0.0.1"));

    gateway.stop().await;
}

#[tokio::test]
async fn test_health_probes_mark_service_degraded() {
    let healthy = common::start_mock_backend("ok").await;
    let sick = common::start_programmable_backend(|path| async move {
        if path == "/health" {
            (500, "sick".into())
        } else {
            (200, "served".into())
        }
    })
    .await;

    let mut config = common::base_config();
    config.health_check.enabled = true;
    config.health_check.interval_ms = 200;
    config.health_check.timeout_ms = 100;
    config.health_check.gate_traffic = true;
    config
        .services
        .insert("svc1".into(), ServiceConfig::new(format!("http://{}", healthy)));
    config
        .services
        .insert("svc2".into(), ServiceConfig::new(format!("http://{}", sick)));

    let gateway = common::start_gateway(config).await;
    let checker = gateway.proxy.health().unwrap().clone();
    checker
        .wait_for_first_check(Duration::from_secs(2))
        .await
        .unwrap();
    assert!(checker.is_running());

    let client = common::client();
    let report: serde_json::Value = client
        .get(gateway.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["status"], "degraded");
    assert_eq!(report["services"]["svc1"], true);
    assert_eq!(report["services"]["svc2"], false);
    assert_eq!(report["checks"]["unhealthy"], 1);

    assert_eq!(client.get(gateway.url("/svc2/x")).send().await.unwrap().status(), 503);
    assert_eq!(client.get(gateway.url("/svc1/x")).send().await.unwrap().status(), 200);

    gateway.stop().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!checker.is_running());
}
