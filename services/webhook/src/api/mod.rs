//! HTTP API handlers and routing.

pub mod error;
mod health;
mod mutate;

use axum::{routing::post, Router};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the webhook router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .merge(health::routes())
        // Admission endpoint registered in the mutating webhook configuration
        .route("/mutate", post(mutate::mutate))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
