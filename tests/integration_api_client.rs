mod common;

use axum::{Router, http::StatusCode, routing::post};
use chrono::Utc;
use common::{REGISTRATION_TOKEN, TestCoordinator, http_monitor};
use pollerfleet::api_models::{HeartbeatRequest, RegisterRequest};
use pollerfleet::models::{CheckStatus, PollerStatus, ResultRecord};
use pollerfleet::poller_modules::communication::PollerApiClient;

#[tokio::test]
async fn test_client_round_trip_against_coordinator() {
    let coordinator = TestCoordinator::new().with_registration_token().await;
    coordinator.store.upsert_monitor(http_monitor(7)).await.unwrap();
    let addr = common::spawn_server(coordinator.router.clone()).await;
    let base_url = format!("http://{addr}/");

    let client = PollerApiClient::new(&base_url).unwrap();
    let registered = client
        .register(
            REGISTRATION_TOKEN,
            &RegisterRequest {
                name: "client-test".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let client = client.with_credentials(Some(registered.poller_id), Some(registered.access_token));
    let first = client.fetch_assignments(None).await.unwrap();
    assert!(first.changed);
    assert_eq!(first.assignments.as_ref().map(Vec::len), Some(1));

    let second = client.fetch_assignments(Some(&first.version)).await.unwrap();
    assert!(!second.changed);
    assert!(second.assignments.is_none());

    let response = client
        .heartbeat(&HeartbeatRequest {
            status: PollerStatus::Online,
            queue_depth: 0,
            version: Some("test".to_string()),
            results: vec![ResultRecord {
                monitor_id: 7,
                status: CheckStatus::Up,
                message: "OK".to_string(),
                latency_ms: Some(3.0),
                execution_error: false,
                checked_at: Utc::now(),
            }],
        })
        .await
        .unwrap();
    assert_eq!(response.poller_id, registered.poller_id);
    assert_eq!(response.accepted_results, 1);
}

#[tokio::test]
async fn test_rejected_registration_is_unauthorized() {
    let coordinator = TestCoordinator::new().with_registration_token().await;
    let addr = common::spawn_server(coordinator.router.clone()).await;
    let client = PollerApiClient::new(&format!("http://{addr}")).unwrap();

    let err = client
        .register("wrong-token", &RegisterRequest::default())
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());
    assert!(err.to_string().contains("Invalid registration token"));
}

#[tokio::test]
async fn test_server_error_surfaces_status_and_body() {
    let router = Router::new().route(
        "/api/poller/heartbeat",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let addr = common::spawn_server(router).await;
    let client = PollerApiClient::new(&format!("http://{addr}"))
        .unwrap()
        .with_credentials(Some(1), Some("token".to_string()));

    let err = client
        .heartbeat(&HeartbeatRequest {
            status: PollerStatus::Online,
            queue_depth: 0,
            version: None,
            results: Vec::new(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Poller API request failed: 500 boom");
    assert!(!err.is_unauthorized());
}
