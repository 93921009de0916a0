//! Admission endpoint.
//!
//! POST /mutate

use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap},
    Json,
};
use bytes::Bytes;
use tracing::{info, warn};

use crate::api::error::ApiError;
use crate::review::AdmissionReview;
use crate::state::AppState;

/// Review an admission request.
///
/// Envelope problems are answered with 400 and a failed hand-off with 502,
/// leaving the outcome to the platform's failure policy. Everything else,
/// including a denial of mistyped input, is answered with an admission review.
pub async fn mutate(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<AdmissionReview>, ApiError> {
    info!("Received admission review");

    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or("").trim() == "application/json")
        .unwrap_or(false);
    if !is_json {
        warn!("Rejecting admission review with non-JSON content type");
        return Err(ApiError::bad_request(
            "invalid_content_type",
            "expected application/json content-type",
        ));
    }

    let review: AdmissionReview = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "Failed to decode admission review");
        ApiError::bad_request(
            "invalid_admission_review",
            format!("error getting admission review from request: {e}"),
        )
    })?;

    let Some(request) = review.request else {
        return Err(ApiError::bad_request(
            "missing_request",
            "admission review carries no request",
        ));
    };

    let response = state.interceptor().review(&request).await?;
    if response.allowed {
        info!(uid = %response.uid, patched = response.patch.is_some(), "Admission reviewed");
    }

    Ok(Json(AdmissionReview::respond(&review.api_version, response)))
}
