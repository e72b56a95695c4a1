//! HTTP router for the Leaseq service

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use leaseq_queue::QueueState;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Build shared state for one queue from configuration
pub fn build_state(config: &crate::config::Config) -> Arc<QueueState> {
    let queue = leaseq_queue::LeaseQueue::with_clock(
        config.queue.name.clone(),
        config.queue_options(),
        Arc::new(leaseq_queue::SystemClock),
    );
    Arc::new(QueueState::new(queue, config.queue_defaults()))
}

/// Create the main application router
pub fn create_router(state: Arc<QueueState>) -> Router {
    let health = Router::new()
        .route("/health", get(health_check))
        .with_state(state.clone());

    Router::new()
        .merge(health)
        .merge(leaseq_queue::router(state))
        .layer(TraceLayer::new_for_http())
}

async fn health_check(State(state): State<Arc<QueueState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "running",
            "queue": state.queue().name(),
        })),
    )
}
