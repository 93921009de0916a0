//! holdgate gate release library.
//!
//! This crate primarily ships a `gate-release` binary, but we expose a small
//! library surface to enable integration testing and reuse.

pub mod api;
pub mod config;
pub mod release;
pub mod state;

pub use release::{GateRelease, Received};
