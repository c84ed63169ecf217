//! API Routes
//!
//! `GET /health` and `GET /status`.

use std::sync::Arc;

use axum::{extract::State, middleware, routing::get, Json, Router};
use tower_http::trace::TraceLayer;

use crate::jobs::{SchedulerStatus, StatusBoard};

/// Build the status router over the scheduler's board
pub fn create_router(board: Arc<StatusBoard>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status))
        .layer(middleware::from_fn(super::middleware::logging_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(board)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Scheduler status
async fn status(State(board): State<Arc<StatusBoard>>) -> Json<SchedulerStatus> {
    Json(board.snapshot())
}
