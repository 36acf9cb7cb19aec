#![allow(clippy::unwrap_used)]

use super::*;
use std::time::Duration;

/// Start a server on `port`, returning its controller and a client once it answers
async fn start(
    port: u16,
    readiness: ReadinessState,
    metrics: SharedMetrics,
) -> (
    ShutdownController,
    tokio::task::JoinHandle<std::io::Result<()>>,
    reqwest::Client,
) {
    let (controller, signal) = shutdown_channel();
    let handle =
        tokio::spawn(async move { run_health_server(port, readiness, metrics, signal).await });
    let client = wait_for_server(port, 10).await;
    (controller, handle, client)
}

/// Retry with backoff until the server accepts connections
async fn wait_for_server(port: u16, max_retries: u32) -> reqwest::Client {
    let client = reqwest::Client::new();
    let mut delay = Duration::from_millis(10);

    for attempt in 1..=max_retries {
        match client
            .get(format!("http://127.0.0.1:{}/healthz", port))
            .timeout(Duration::from_millis(100))
            .send()
            .await
        {
            Ok(_) => return client,
            Err(_) if attempt < max_retries => {
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_millis(200));
            }
            Err(e) => panic!("Server not ready after {} attempts: {}", max_retries, e),
        }
    }
    client
}

async fn get(client: &reqwest::Client, port: u16, path: &str) -> reqwest::Response {
    client
        .get(format!("http://127.0.0.1:{}{}", port, path))
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .expect("Failed to connect to health server")
}

#[tokio::test]
async fn test_healthz_returns_200() {
    let port = 18080;
    let (_controller, handle, client) =
        start(port, ReadinessState::new(), create_metrics().unwrap()).await;

    assert_eq!(get(&client, port, "/healthz").await.status(), 200);

    handle.abort();
}

/// Readiness follows the shared flag in both directions
#[tokio::test]
async fn test_readyz_follows_readiness_state() {
    let port = 18081;
    let readiness = ReadinessState::new();
    let (_controller, handle, client) =
        start(port, readiness.clone(), create_metrics().unwrap()).await;

    assert_eq!(get(&client, port, "/readyz").await.status(), 503);

    readiness.set_ready();
    assert_eq!(get(&client, port, "/readyz").await.status(), 200);

    readiness.set_not_ready();
    assert_eq!(get(&client, port, "/readyz").await.status(), 503);

    handle.abort();
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_engine_counters() {
    let port = 18082;
    let metrics = create_metrics().unwrap();
    metrics.record_evaluation("override");
    let (_controller, handle, client) =
        start(port, ReadinessState::new(), metrics.clone()).await;

    let response = get(&client, port, "/metrics").await;
    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains(r#"kokeilu_flag_evaluations_total{source="override"} 1"#));

    handle.abort();
}

/// The server exits cleanly once shutdown is signalled
#[tokio::test]
async fn test_server_stops_on_shutdown() {
    let port = 18083;
    let (controller, handle, _client) =
        start(port, ReadinessState::new(), create_metrics().unwrap()).await;

    controller.shutdown();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server did not stop");
    assert!(result.unwrap().is_ok());
}

#[test]
fn test_readiness_state_transitions() {
    let state = ReadinessState::new();
    assert!(!state.is_ready());

    state.set_ready();
    let cloned = state.clone();
    assert!(cloned.is_ready());

    cloned.set_not_ready();
    assert!(!state.is_ready());
}
