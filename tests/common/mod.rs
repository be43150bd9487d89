//! Common utilities for coordinator integration tests.
#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use jsonwebtoken::{EncodingKey, Header, encode};
use pollerfleet::models::{Monitor, PlacementMode};
use pollerfleet::server::config::ServerConfig;
use pollerfleet::server::poller_store::{InMemoryPollerStore, PollerStore, SETTING_REGISTRATION_TOKEN};
use pollerfleet::web::middleware::auth::Claims;
use pollerfleet::web::{AppState, create_axum_router};
use serde_json::{Map, Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

pub const JWT_SECRET: &str = "integration-test-secret";
pub const REGISTRATION_TOKEN: &str = "test-registration-token";

pub fn test_config() -> ServerConfig {
    ServerConfig {
        listen_address: "127.0.0.1:0".to_string(),
        jwt_secret: JWT_SECRET.to_string(),
        poller_registration_rate_limit_per_minute: 10,
        poller_registration_token_ttl_minutes: 1440,
        poller_offline_after_seconds: 90,
        trust_proxy: true,
        monitors_file: None,
        log_dir: "logs".to_string(),
    }
}

pub fn http_monitor(id: i64) -> Monitor {
    Monitor {
        id,
        name: format!("monitor-{id}"),
        check_type: "http".to_string(),
        interval: 60,
        active: true,
        poller_mode: PlacementMode::Auto,
        poller_id: None,
        poller_region: None,
        poller_datacenter: None,
        poller_capability: None,
        poller_dns_cache_disabled: false,
        config: Map::new(),
    }
}

/// A coordinator wired over an in-memory store.
pub struct TestCoordinator {
    pub store: Arc<dyn PollerStore>,
    pub app_state: Arc<AppState>,
    pub router: Router,
}

impl TestCoordinator {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        let store: Arc<dyn PollerStore> = Arc::new(InMemoryPollerStore::new());
        let app_state = Arc::new(AppState::new(Arc::new(config), store.clone()));
        let router = create_axum_router(app_state.clone());
        Self {
            store,
            app_state,
            router,
        }
    }

    pub async fn with_registration_token(self) -> Self {
        self.store
            .set_setting(SETTING_REGISTRATION_TOKEN, REGISTRATION_TOKEN.to_string())
            .await
            .unwrap();
        self
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, body)
    }

    /// Registers a poller from `client_ip` and returns (poller_id, access_token).
    pub async fn register(&self, client_ip: &str, body: Value) -> (i64, String) {
        let (status, body) = self.send(register_request(Some(REGISTRATION_TOKEN), client_ip, body)).await;
        assert_eq!(status, StatusCode::OK, "registration failed: {body}");
        (
            body["poller_id"].as_i64().unwrap(),
            body["access_token"].as_str().unwrap().to_string(),
        )
    }
}

pub fn register_request(token: Option<&str>, client_ip: &str, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/poller/register")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", client_ip);
    if let Some(token) = token {
        builder = builder.header("X-Poller-Registration-Token", token);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn bearer_request(method: &str, uri: &str, token: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub fn admin_jwt() -> String {
    let claims = Claims {
        sub: "admin".to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

pub fn heartbeat_body() -> Value {
    json!({ "status": "online", "queue_depth": 0, "results": [] })
}

/// Serves `router` on an ephemeral local port.
pub async fn spawn_server(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .unwrap();
    });
    addr
}
