use axum::{
    Json, Router,
    http::{Method, header},
    middleware as axum_middleware,
    routing::get,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::server::admin_service::AdminService;
use crate::server::config::ServerConfig;
use crate::server::poller_service::PollerService;
use crate::server::poller_store::PollerStore;
use crate::server::token_service::TokenService;
use crate::web::{middleware::auth, routes::*};

pub use error::AppError;

pub mod error;
pub mod middleware;
pub mod routes;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: Arc<dyn PollerStore>,
    pub token_service: Arc<TokenService>,
    pub admin_service: Arc<AdminService>,
    pub poller_service: Arc<PollerService>,
}

impl AppState {
    /// Wires the services over one shared store.
    pub fn new(config: Arc<ServerConfig>, store: Arc<dyn PollerStore>) -> Self {
        let token_service = Arc::new(TokenService::new(
            store.clone(),
            config.poller_registration_rate_limit_per_minute,
            config.poller_registration_token_ttl_minutes,
        ));
        let admin_service = Arc::new(AdminService::new(store.clone(), token_service.clone()));
        let poller_service = Arc::new(PollerService::new(store.clone()));
        Self {
            config,
            store,
            token_service,
            admin_service,
            poller_service,
        }
    }
}

async fn health_check_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

pub fn create_axum_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .expose_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_check_handler))
        .nest(
            "/api/poller",
            poller_routes::create_public_router().merge(
                poller_routes::create_protected_router().route_layer(axum_middleware::from_fn_with_state(
                    app_state.clone(),
                    auth::poller_auth,
                )),
            ),
        )
        .nest(
            "/api/admin",
            admin_routes::create_admin_router().route_layer(axum_middleware::from_fn_with_state(
                app_state.clone(),
                auth::admin_auth,
            )),
        )
        .with_state(app_state)
        .layer(cors)
}
