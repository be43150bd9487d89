mod common;

use axum::http::StatusCode;
use common::{TestCoordinator, bearer_request, heartbeat_body, http_monitor};
use pollerfleet::models::PollerStatus;
use serde_json::json;

async fn registered() -> (TestCoordinator, i64, String) {
    let coordinator = TestCoordinator::new().with_registration_token().await;
    for id in [11, 12, 13] {
        coordinator.store.upsert_monitor(http_monitor(id)).await.unwrap();
    }
    let (poller_id, token) = coordinator.register("192.0.2.10", json!({"name": "edge"})).await;
    (coordinator, poller_id, token)
}

#[tokio::test]
async fn test_poller_routes_require_bearer_token() {
    let (coordinator, poller_id, _) = registered().await;
    let (status, body) = coordinator
        .send(bearer_request("POST", "/api/poller/heartbeat", "not-a-token", Some(heartbeat_body())))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["ok"], json!(false));

    let uri = format!("/api/poller/assignments?poller_id={poller_id}");
    let request = axum::http::Request::builder()
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, _) = coordinator.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_assignments_and_since_version() {
    let (coordinator, poller_id, token) = registered().await;

    let uri = format!("/api/poller/assignments?poller_id={poller_id}");
    let (status, body) = coordinator.send(bearer_request("GET", &uri, &token, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], json!(true));
    let ids: Vec<i64> = body["assignments"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["monitor_id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![11, 12, 13]);
    assert_eq!(body["assignments"][0]["config"]["pollerDnsCacheMaxTtlSeconds"], json!(60));

    let version = body["version"].as_str().unwrap().to_string();
    let uri = format!("/api/poller/assignments?poller_id={poller_id}&since_version={version}");
    let (status, body) = coordinator.send(bearer_request("GET", &uri, &token, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], json!(false));
    assert_eq!(body["version"], json!(version));
    assert!(body.get("assignments").is_none());
}

#[tokio::test]
async fn test_assignments_reject_foreign_poller_id() {
    let (coordinator, poller_id, token) = registered().await;
    let uri = format!("/api/poller/assignments?poller_id={}", poller_id + 1);
    let (status, _) = coordinator.send(bearer_request("GET", &uri, &token, None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_heartbeat_records_state_and_results() {
    let (coordinator, poller_id, token) = registered().await;
    let body = json!({
        "status": "degraded",
        "queue_depth": 4,
        "version": "9.9.9",
        "results": [{
            "monitor_id": 11,
            "status": "DOWN",
            "message": "Unexpected status code 503",
            "latency_ms": 12.5,
            "execution_error": false,
            "checked_at": "2026-01-01T00:00:00Z"
        }]
    });
    let (status, response) = coordinator
        .send(bearer_request("POST", "/api/poller/heartbeat", &token, Some(body)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["accepted_results"], json!(1));

    let poller = coordinator.store.get_poller(poller_id).await.unwrap().unwrap();
    assert_eq!(poller.status, PollerStatus::Degraded);
    assert_eq!(poller.queue_depth, 4);
    assert!(poller.last_heartbeat_at.is_some());
    assert_eq!(coordinator.store.recent_results(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_revoked_token_is_rejected() {
    let (coordinator, poller_id, token) = registered().await;
    coordinator.app_state.token_service.revoke_tokens(poller_id).await.unwrap();
    let (status, _) = coordinator
        .send(bearer_request("POST", "/api/poller/heartbeat", &token, Some(heartbeat_body())))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
