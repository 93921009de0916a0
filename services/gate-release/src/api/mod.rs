//! HTTP API handlers and routing.

mod health;
mod pod;

use axum::{routing::post, Router};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the gate release router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::routes())
        // Snapshot push from the webhook
        .route("/api/pod", post(pod::receive))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
