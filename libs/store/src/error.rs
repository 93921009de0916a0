//! Error types for store access.

use holdgate_resource::{ResourceError, ResourceKey};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by a [`crate::ResourceStore`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The resource does not exist (deleted, or not yet persisted).
    #[error("resource not found: {0}")]
    NotFound(ResourceKey),

    /// The supplied version token is stale.
    #[error("conflict updating {key}: {message}")]
    Conflict { key: ResourceKey, message: String },

    /// The resource already exists.
    #[error("resource already exists: {0}")]
    AlreadyExists(ResourceKey),

    /// Credentials were rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Unexpected response status.
    #[error("store returned {status}: {message}")]
    Status { status: u16, message: String },

    /// Connection or protocol failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The store returned a body we could not decode.
    #[error("decode error: {0}")]
    Decode(String),

    /// Client configuration is unusable.
    #[error("invalid store configuration: {0}")]
    Config(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// Conflicts, transport failures and server-side errors may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Conflict { .. } | StoreError::Transport(_) => true,
            StoreError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<ResourceError> for StoreError {
    fn from(err: ResourceError) -> Self {
        StoreError::Decode(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Transport(err.to_string())
    }
}
