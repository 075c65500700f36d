//! Health check handler.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use tally_core::QueueDepths;

use crate::error::ApiError;
use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: &'static str,

    /// Meter-queue depth counts.
    pub queue: QueueDepths,

    /// Whether the delivery worker task is running.
    pub worker_alive: bool,
}

/// Health check: queue depths plus worker liveness.
pub async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, ApiError> {
    let queue = state.queue.depths()?;

    Ok(Json(HealthResponse {
        status: "ok",
        queue,
        worker_alive: state.worker_alive(),
    }))
}
