//! Snapshot hand-off to the gate release service.
//!
//! Admission blocks on this call: the release path must have been notified
//! before a resource is admitted with a hold attached.

use std::time::Duration;

use async_trait::async_trait;
use holdgate_resource::Resource;
use thiserror::Error;
use tracing::{debug, error};

/// Errors from pushing a snapshot.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ForwardError {
    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The gate release service answered with a non-success status.
    #[error("gate release returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The forwarder could not be constructed.
    #[error("invalid forwarder configuration: {0}")]
    Config(String),
}

/// Pushes a full resource snapshot to the release path.
#[async_trait]
pub trait SnapshotForwarder: Send + Sync {
    async fn forward(&self, resource: &Resource) -> Result<(), ForwardError>;
}

/// HTTP forwarder posting snapshots as JSON.
pub struct HttpForwarder {
    client: reqwest::Client,
    url: String,
}

impl HttpForwarder {
    /// Create a forwarder for `url` with a whole-request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ForwardError::Config(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SnapshotForwarder for HttpForwarder {
    async fn forward(&self, resource: &Resource) -> Result<(), ForwardError> {
        debug!(url = %self.url, key = %resource.key(), "Forwarding snapshot");

        let response = self
            .client
            .post(&self.url)
            .json(resource)
            .send()
            .await
            .map_err(|e| ForwardError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read response body".to_string());
            error!(status = %status, body = %body, "Gate release rejected snapshot");
            return Err(ForwardError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}
