use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, patch, post},
};
use std::sync::Arc;

use crate::api_models::{
    AccessTokenResponse, AssignmentPreviewResponse, DnsCacheSettingsPayload, PollerListResponse, PollerResponse,
    RegistrationTokenResponse, RevokeTokensResponse, RpcResponse, SetDnsCacheSettingsRequest, UpdatePollerRequest,
};
use crate::server::token_service::RegistrationToken;
use crate::web::{AppError, AppState};

pub fn create_admin_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/pollers", get(list_pollers))
        .route("/pollers/{id}", patch(update_poller))
        .route("/pollers/{id}/rotate-token", post(rotate_token))
        .route("/pollers/{id}/revoke-tokens", post(revoke_tokens))
        .route("/pollers/{id}/assignments", get(preview_assignments))
        .route(
            "/registration-token",
            get(get_registration_token).post(generate_registration_token),
        )
        .route("/dns-cache", get(get_dns_cache_settings).put(set_dns_cache_settings))
}

fn token_response(token: RegistrationToken) -> Json<RpcResponse<RegistrationTokenResponse>> {
    Json(RpcResponse::success(RegistrationTokenResponse {
        token: token.token,
        expires_at: token.expires_at,
    }))
}

async fn list_pollers(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<RpcResponse<PollerListResponse>>, AppError> {
    let pollers = app_state.admin_service.list_pollers().await?;
    Ok(Json(RpcResponse::success(PollerListResponse { pollers })))
}

async fn update_poller(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdatePollerRequest>,
) -> Result<Json<RpcResponse<PollerResponse>>, AppError> {
    let poller = app_state.admin_service.update_poller(id, payload).await?;
    Ok(Json(RpcResponse::success(PollerResponse { poller })))
}

async fn rotate_token(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<RpcResponse<AccessTokenResponse>>, AppError> {
    let access_token = app_state.admin_service.rotate_token(id).await?;
    Ok(Json(RpcResponse::success(AccessTokenResponse { access_token })))
}

async fn revoke_tokens(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<RpcResponse<RevokeTokensResponse>>, AppError> {
    let revoked = app_state.admin_service.revoke_tokens(id).await?;
    Ok(Json(RpcResponse::success(RevokeTokensResponse { revoked })))
}

async fn preview_assignments(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<RpcResponse<AssignmentPreviewResponse>>, AppError> {
    let set = app_state.admin_service.preview_assignments(id).await?;
    Ok(Json(RpcResponse::success(AssignmentPreviewResponse {
        version: set.version,
        assignments: set.assignments,
    })))
}

async fn get_registration_token(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<RpcResponse<RegistrationTokenResponse>>, AppError> {
    Ok(token_response(app_state.admin_service.registration_token().await?))
}

async fn generate_registration_token(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<RpcResponse<RegistrationTokenResponse>>, AppError> {
    Ok(token_response(app_state.admin_service.generate_registration_token().await?))
}

async fn get_dns_cache_settings(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<RpcResponse<DnsCacheSettingsPayload>>, AppError> {
    let max_ttl_seconds = app_state.admin_service.dns_cache_max_ttl().await?;
    Ok(Json(RpcResponse::success(DnsCacheSettingsPayload { max_ttl_seconds })))
}

async fn set_dns_cache_settings(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<SetDnsCacheSettingsRequest>,
) -> Result<Json<RpcResponse<DnsCacheSettingsPayload>>, AppError> {
    let max_ttl_seconds = app_state
        .admin_service
        .set_dns_cache_max_ttl(&payload.max_ttl_seconds)
        .await?;
    Ok(Json(RpcResponse::success(DnsCacheSettingsPayload { max_ttl_seconds })))
}
