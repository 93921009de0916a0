//! # holdgate-resource
//!
//! Resource model shared by every holdgate component.
//!
//! ## Design Principles
//!
//! - The core only understands identity, the version token and the hold-marker
//!   sequence; every other field round-trips untouched
//! - A resource is schedulable if and only if its marker sequence is empty
//! - The only marker ever added is the configured [`HoldMarker`]
//!
//! ## Wire Shape
//!
//! Resources use the platform's Pod layout. Hold markers live under
//! `spec.schedulingGates` as `{"name": "<marker>"}` entries, and the version
//! token is `metadata.resourceVersion`.

mod error;
mod patch;
mod types;

pub use error::ResourceError;
pub use patch::{attach_marker_patch, JsonPatch, PatchOp, PatchOperation, MARKERS_PATH};
pub use types::*;
