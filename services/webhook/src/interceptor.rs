//! Admission interceptor.
//!
//! For every creation request the interceptor:
//! - Verifies the resource type is the expected workload type
//! - Decodes the object and forwards a snapshot to the gate release service
//! - Returns a patch attaching the hold marker, unless any marker is present
//!
//! The gate never rejects on business grounds. Denials are reserved for
//! mistyped or undecodable input. A failed hand-off is returned as an error
//! so the platform's failure policy decides the outcome.

use std::sync::Arc;

use holdgate_resource::{attach_marker_patch, HoldMarker, Resource, ResourceError};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::forwarder::{ForwardError, SnapshotForwarder};
use crate::review::{AdmissionRequest, AdmissionResponse, GroupVersionResource};

/// Errors that block an admission.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("did not receive {expected}, got {actual}")]
    TypeMismatch {
        expected: GroupVersionResource,
        actual: GroupVersionResource,
    },

    #[error("error decoding raw object: {0}")]
    Decode(ResourceError),

    #[error("error forwarding snapshot to gate release: {0}")]
    Forwarding(#[from] ForwardError),

    #[error("error encoding patch: {0}")]
    Encode(ResourceError),
}

impl AdmissionError {
    /// HTTP-style code reported in the denial status.
    pub fn status_code(&self) -> u16 {
        match self {
            AdmissionError::TypeMismatch { .. } | AdmissionError::Decode(_) => 400,
            AdmissionError::Forwarding(_) => 502,
            AdmissionError::Encode(_) => 500,
        }
    }

    /// Returns true if the request itself is at fault and is answered with a denial.
    pub fn is_denial(&self) -> bool {
        matches!(self, AdmissionError::TypeMismatch { .. } | AdmissionError::Decode(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            AdmissionError::TypeMismatch { .. } => "type_mismatch",
            AdmissionError::Decode(_) => "decode_error",
            AdmissionError::Forwarding(_) => "forwarding_error",
            AdmissionError::Encode(_) => "encode_error",
        }
    }
}

/// Attaches the hold marker and hands snapshots to the release path.
pub struct Interceptor {
    marker: HoldMarker,
    expected: GroupVersionResource,
    forwarder: Arc<dyn SnapshotForwarder>,
}

impl Interceptor {
    /// Create an interceptor for core `v1` pods.
    pub fn new(marker: HoldMarker, forwarder: Arc<dyn SnapshotForwarder>) -> Self {
        Self {
            marker,
            expected: GroupVersionResource::pods(),
            forwarder,
        }
    }

    pub fn marker(&self) -> &HoldMarker {
        &self.marker
    }

    /// Admit a request, returning the decision or the error that blocks it.
    #[instrument(skip(self, request), fields(uid = %request.uid))]
    pub async fn admit(&self, request: &AdmissionRequest) -> Result<AdmissionResponse, AdmissionError> {
        if request.resource != self.expected {
            return Err(AdmissionError::TypeMismatch {
                expected: self.expected.clone(),
                actual: request.resource.clone(),
            });
        }

        if request.object.is_null() {
            return Err(AdmissionError::Decode(ResourceError::Decode(
                "request carries no object".into(),
            )));
        }
        let mut resource =
            Resource::from_value(request.object.clone()).map_err(AdmissionError::Decode)?;

        // Objects created without an explicit namespace inherit the request's.
        if resource.metadata.namespace.is_empty() {
            if let Some(ns) = &request.namespace {
                resource.metadata.namespace = ns.clone();
            }
        }

        info!(
            key = %resource.key(),
            object = %serde_json::to_string(&resource).unwrap_or_default(),
            "Decoded admission object"
        );

        self.forwarder.forward(&resource).await?;

        match attach_marker_patch(&resource, &self.marker) {
            Some(patch) => {
                info!(key = %resource.key(), marker = %self.marker, "Attaching hold marker");
                AdmissionResponse::allow(&request.uid)
                    .with_patch(&patch)
                    .map_err(AdmissionError::Encode)
            }
            None => {
                debug!(key = %resource.key(), marker = %self.marker, "Resource already held");
                Ok(AdmissionResponse::allow(&request.uid))
            }
        }
    }

    /// Admit a request, turning input errors into a denial.
    ///
    /// Forwarding and encoding failures stay errors; the caller answers them
    /// with a non-success status.
    pub async fn review(
        &self,
        request: &AdmissionRequest,
    ) -> Result<AdmissionResponse, AdmissionError> {
        match self.admit(request).await {
            Ok(response) => Ok(response),
            Err(e) if e.is_denial() => {
                warn!(uid = %request.uid, code = e.code(), error = %e, "Admission denied");
                Ok(AdmissionResponse::deny(&request.uid, e.status_code(), e.to_string()))
            }
            Err(e) => {
                warn!(uid = %request.uid, code = e.code(), error = %e, "Admission failed");
                Err(e)
            }
        }
    }
}
