//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{credits, health, usage};
use crate::state::AppState;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Queue depths and worker liveness
///
/// ## Credits
/// - `GET /v1/credits/balance` - Current balance (applies lazy refresh)
/// - `GET /v1/credits/transactions` - Transaction history
/// - `POST /v1/credits/deduct` - Deduct credits
/// - `POST /v1/credits/add` - Add credits (operator adjustment)
/// - `POST /v1/credits/can-afford` - Affordability pre-check
/// - `POST /v1/credits/auto-top-up` - Configure auto-top-up
///
/// ## Usage
/// - `POST /v1/usage/record` - Accumulate a usage sample
/// - `POST /v1/usage/report` - Price and enqueue the current period
pub fn create_router(state: AppState) -> Router {
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    Router::new()
        // Health (public)
        .route("/health", get(health::health))
        // Credits
        .route("/v1/credits/balance", get(credits::get_balance))
        .route("/v1/credits/transactions", get(credits::list_transactions))
        .route("/v1/credits/deduct", post(credits::deduct))
        .route("/v1/credits/add", post(credits::add))
        .route("/v1/credits/can-afford", post(credits::can_afford))
        .route("/v1/credits/auto-top-up", post(credits::configure_auto_top_up))
        // Usage
        .route("/v1/usage/record", post(usage::record_usage))
        .route("/v1/usage/report", post(usage::report_usage))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
