use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use crate::api_models::RpcResponse;
use crate::server::admin_service::AdminError;
use crate::server::poller_service::PollerServiceError;
use crate::server::poller_store::StoreError;
use crate::server::token_service::RegistrationError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    TooManyRequests(String),
    #[error("{0}")]
    InternalServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::InternalServerError(msg) => {
                error!(error = %msg, "Request failed with an internal error.");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body: RpcResponse<()> = RpcResponse::failure(self.to_string());
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}

impl From<RegistrationError> for AppError {
    fn from(err: RegistrationError) -> Self {
        match err {
            RegistrationError::RateLimited => AppError::TooManyRequests(err.to_string()),
            RegistrationError::NotConfigured | RegistrationError::InvalidToken | RegistrationError::Expired => {
                AppError::Forbidden(err.to_string())
            }
            RegistrationError::Store(e) => e.into(),
        }
    }
}

impl From<AdminError> for AppError {
    fn from(err: AdminError) -> Self {
        match err {
            AdminError::PollerNotFound => AppError::NotFound(err.to_string()),
            AdminError::Store(e) => e.into(),
            _ => AppError::InvalidInput(err.to_string()),
        }
    }
}

impl From<PollerServiceError> for AppError {
    fn from(err: PollerServiceError) -> Self {
        match err {
            PollerServiceError::NotFound => AppError::NotFound(err.to_string()),
            PollerServiceError::Store(e) => e.into(),
        }
    }
}
