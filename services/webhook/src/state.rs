//! Application state shared across request handlers.

use std::sync::Arc;

use crate::interceptor::Interceptor;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    interceptor: Interceptor,
}

impl AppState {
    /// Create a new application state.
    pub fn new(interceptor: Interceptor) -> Self {
        Self {
            inner: Arc::new(AppStateInner { interceptor }),
        }
    }

    pub fn interceptor(&self) -> &Interceptor {
        &self.inner.interceptor
    }
}
