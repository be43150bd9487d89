use axum::{
    body::Body as AxumBody,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::web::{AppState, error::AppError};

/// Operator JWT claims (HS256).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

#[derive(Debug, Clone)]
pub struct AuthenticatedAdmin {
    pub subject: String,
}

/// The poller a bearer token belongs to.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedPoller {
    pub poller_id: i64,
}

fn bearer_token(req: &Request<AxumBody>) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

pub async fn admin_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request<AxumBody>,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&req).ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;

    let token_data = decode::<Claims>(
        &token,
        &DecodingKey::from_secret(state.config.jwt_secret.as_ref()),
        &Validation::default(),
    )
    .map_err(|e| {
        warn!(error = ?e, "JWT decoding error during admin auth.");
        AppError::Unauthorized("Invalid credentials".to_string())
    })?;

    req.extensions_mut().insert(AuthenticatedAdmin {
        subject: token_data.claims.sub,
    });
    Ok(next.run(req).await)
}

pub async fn poller_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request<AxumBody>,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&req).ok_or_else(|| AppError::Unauthorized("Missing poller token".to_string()))?;

    let poller_token = state
        .token_service
        .authenticate(&token)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid poller token".to_string()))?;

    req.extensions_mut().insert(AuthenticatedPoller {
        poller_id: poller_token.poller_id,
    });
    Ok(next.run(req).await)
}
