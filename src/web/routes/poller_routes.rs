use axum::{
    Extension, Json, Router,
    extract::{ConnectInfo, Query, State},
    http::{Extensions, HeaderMap},
    routing::{get, post},
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use crate::api_models::{
    AssignmentsQuery, AssignmentsResponse, HeartbeatRequest, HeartbeatResponse, REGISTRATION_TOKEN_HEADER,
    RegisterRequest, RegisterResponse, RpcResponse,
};
use crate::web::middleware::auth::AuthenticatedPoller;
use crate::web::{AppError, AppState};

/// Registration is public; it is guarded by the registration token instead.
pub fn create_public_router() -> Router<Arc<AppState>> {
    Router::new().route("/register", post(register))
}

/// Routes that require a poller bearer token.
pub fn create_protected_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/heartbeat", post(heartbeat))
        .route("/assignments", get(assignments))
}

/// First `X-Forwarded-For` hop when proxies are trusted, else the peer address.
pub fn client_ip(headers: &HeaderMap, extensions: &Extensions, trust_proxy: bool) -> IpAddr {
    let forwarded = trust_proxy
        .then(|| headers.get("x-forwarded-for"))
        .flatten()
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok());
    forwarded
        .or_else(|| {
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

async fn register(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    extensions: Extensions,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<RpcResponse<RegisterResponse>>, AppError> {
    let ip = client_ip(&headers, &extensions, app_state.config.trust_proxy);
    let provided = headers
        .get(REGISTRATION_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim);
    let registered = app_state.token_service.register(ip, provided, payload).await?;
    Ok(Json(RpcResponse::success(registered)))
}

async fn heartbeat(
    State(app_state): State<Arc<AppState>>,
    Extension(poller): Extension<AuthenticatedPoller>,
    Json(payload): Json<HeartbeatRequest>,
) -> Result<Json<RpcResponse<HeartbeatResponse>>, AppError> {
    let response = app_state.poller_service.heartbeat(poller.poller_id, payload).await?;
    Ok(Json(RpcResponse::success(response)))
}

async fn assignments(
    State(app_state): State<Arc<AppState>>,
    Extension(poller): Extension<AuthenticatedPoller>,
    Query(query): Query<AssignmentsQuery>,
) -> Result<Json<RpcResponse<AssignmentsResponse>>, AppError> {
    if query.poller_id != poller.poller_id {
        return Err(AppError::Forbidden("Poller id does not match token".to_string()));
    }
    let response = app_state
        .poller_service
        .assignments(poller.poller_id, query.since_version.as_deref())
        .await?;
    Ok(Json(RpcResponse::success(response)))
}
