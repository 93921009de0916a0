//! JSON Patch (RFC 6902) operations produced by the admission path.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ResourceError;
use crate::types::{HoldMarker, Resource, SchedulingGate};

/// JSON pointer to the marker sequence.
pub const MARKERS_PATH: &str = "/spec/schedulingGates";

/// Patch operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Remove,
    Replace,
}

/// A single structural edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// An ordered list of edits against the original payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonPatch(pub Vec<PatchOperation>);

impl JsonPatch {
    pub fn operations(&self) -> &[PatchOperation] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, ResourceError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Build the patch that holds `resource` with `marker`.
///
/// Only a resource with no markers at all is patched; one that already
/// carries any marker, ours or a foreign one, is left alone.
pub fn attach_marker_patch(resource: &Resource, marker: &HoldMarker) -> Option<JsonPatch> {
    if resource.is_held() {
        return None;
    }

    Some(JsonPatch(vec![PatchOperation {
        op: PatchOp::Add,
        path: MARKERS_PATH.to_string(),
        value: Some(serde_json::json!([SchedulingGate::from(marker)])),
    }]))
}
