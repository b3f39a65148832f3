pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
pub mod utils;

use std::sync::Arc;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use service_core::middleware::tracing::request_id_middleware;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::LoyaltyConfig;
use crate::services::{IdentityService, LedgerService};

pub use startup::Application;

#[derive(Clone)]
pub struct AppState {
    pub config: LoyaltyConfig,
    pub identity: IdentityService,
    pub ledger: Arc<LedgerService>,
}

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/auth/profile", get(handlers::profile))
        .route("/api/loyalty/earn", post(handlers::earn_points))
        .route("/api/loyalty/redeem", post(handlers::redeem_points))
        .route("/api/loyalty/balance", get(handlers::get_balance))
        .route("/api/loyalty/history", get(handlers::get_history))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        .route("/api/auth/signup", post(handlers::signup))
        .route("/api/auth/login", post(handlers::login))
        .merge(protected)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(from_fn(request_id_middleware))
}
