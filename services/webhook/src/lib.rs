//! holdgate admission webhook library.
//!
//! This crate primarily ships a `webhook` binary, but we expose a small
//! library surface to enable integration testing and reuse.

pub mod api;
pub mod config;
pub mod forwarder;
pub mod interceptor;
pub mod review;
pub mod state;

pub use forwarder::{ForwardError, HttpForwarder, SnapshotForwarder};
pub use interceptor::{AdmissionError, Interceptor};
pub use review::{AdmissionRequest, AdmissionResponse, AdmissionReview, GroupVersionResource};
