//! Snapshot endpoint.
//!
//! POST /api/pod

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use holdgate_resource::Resource;
use tracing::{info, warn};

use crate::state::AppState;

/// Receive a snapshot, answer with its stripped spec.
///
/// The write-back runs detached and never affects the response.
pub async fn receive(State(state): State<AppState>, body: Bytes) -> Response {
    let snapshot = match Resource::from_slice(&body) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = %e, "Failed to decode snapshot");
            return (StatusCode::BAD_REQUEST, "Error decoding JSON").into_response();
        }
    };

    info!(key = %snapshot.key(), "Received snapshot");
    let received = state.release().receive(snapshot);

    Json(received.spec).into_response()
}
