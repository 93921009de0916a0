//! Application state shared across request handlers.

use std::sync::Arc;

use crate::release::GateRelease;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    release: GateRelease,
}

impl AppState {
    pub fn new(release: GateRelease) -> Self {
        Self {
            inner: Arc::new(AppStateInner { release }),
        }
    }

    pub fn release(&self) -> &GateRelease {
        &self.inner.release
    }
}
