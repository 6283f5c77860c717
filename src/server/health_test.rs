//! Tests for the health and metrics endpoints

use super::*;
use std::time::Duration;

/// Start a server on `port` and wait until it answers
///
/// Retries with exponential backoff rather than sleeping a fixed amount.
async fn start_server(
    port: u16,
    readiness: ReadinessState,
) -> (reqwest::Client, ShutdownController, tokio::task::JoinHandle<()>) {
    let (controller, signal) = shutdown_channel();
    let metrics = create_metrics().expect("metrics registry");
    let handle = tokio::spawn(async move {
        let _ = run_health_server(port, readiness, metrics, signal).await;
    });

    let client = reqwest::Client::new();
    let mut delay = Duration::from_millis(10);
    for attempt in 1..=10 {
        match client
            .get(format!("http://127.0.0.1:{}/healthz", port))
            .timeout(Duration::from_millis(100))
            .send()
            .await
        {
            Ok(_) => break,
            Err(_) if attempt < 10 => {
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_millis(200));
            }
            Err(e) => panic!("Server not ready after {} attempts: {}", attempt, e),
        }
    }
    (client, controller, handle)
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
    let port = 18180;
    let (client, _controller, handle) = start_server(port, ReadinessState::new()).await;

    let response = get(&client, port, "/healthz").await;

    assert_eq!(response.status(), 200, "Liveness probe should return 200");
    handle.abort();
}

#[tokio::test]
async fn test_readyz_returns_503_while_upgrading() {
    let port = 18181;
    let (client, _controller, handle) = start_server(port, ReadinessState::new()).await;

    let response = get(&client, port, "/readyz").await;

    assert_eq!(response.status(), 503);
    assert_eq!(response.text().await.unwrap_or_default(), "upgrading");
    handle.abort();
}

#[tokio::test]
async fn test_readyz_follows_readiness_state() {
    let port = 18182;
    let readiness = ReadinessState::new();
    let (client, _controller, handle) = start_server(port, readiness.clone()).await;

    readiness.set_ready();
    assert_eq!(get(&client, port, "/readyz").await.status(), 200);

    readiness.set_not_ready();
    assert_eq!(get(&client, port, "/readyz").await.status(), 503);

    handle.abort();
}

#[tokio::test]
async fn test_metrics_endpoint_serves_text_format() {
    let port = 18183;
    let (client, _controller, handle) = start_server(port, ReadinessState::new()).await;

    let response = get(&client, port, "/metrics").await;

    assert_eq!(response.status(), 200);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/plain"));
    handle.abort();
}

#[tokio::test]
async fn test_server_stops_on_shutdown() {
    let port = 18184;
    let (_client, controller, handle) = start_server(port, ReadinessState::new()).await;

    controller.shutdown();

    let stopped = tokio::time::timeout(Duration::from_secs(5), handle).await;
    assert!(stopped.is_ok(), "server should stop after shutdown");
}

#[test]
fn test_readiness_state_transitions() {
    let state = ReadinessState::new();
    assert!(!state.is_ready());

    state.set_ready();
    assert!(state.is_ready());

    // Clones share the flag
    let cloned = state.clone();
    cloned.set_not_ready();
    assert!(!state.is_ready());
}
