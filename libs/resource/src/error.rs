//! Error types for resource decoding and patching.

use thiserror::Error;

/// Errors that can occur when decoding or editing resources.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// The payload is not a valid resource document.
    #[error("invalid resource payload: {0}")]
    Decode(String),

    /// The payload declares a different kind than expected.
    #[error("unexpected kind: expected '{expected}', got '{actual}'")]
    UnexpectedKind {
        expected: &'static str,
        actual: String,
    },

    /// The hold marker identifier is unusable.
    #[error("invalid hold marker: {0}")]
    InvalidMarker(String),

    /// A `namespace/name` key could not be parsed.
    #[error("invalid resource key '{0}': expected namespace/name")]
    InvalidKey(String),
}

impl ResourceError {
    /// Returns true if this error came from decoding a payload.
    pub fn is_decode(&self) -> bool {
        matches!(self, ResourceError::Decode(_) | ResourceError::UnexpectedKind { .. })
    }
}

impl From<serde_json::Error> for ResourceError {
    fn from(err: serde_json::Error) -> Self {
        ResourceError::Decode(err.to_string())
    }
}
