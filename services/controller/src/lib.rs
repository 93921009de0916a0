//! holdgate controller library.
//!
//! The `controller` binary watches workloads and releases held ones after a
//! fixed delay. The library surface exists for integration tests.

pub mod config;
pub mod reconciler;

pub use reconciler::{DeferredCheck, Reconciler, ReconcilerConfig};
