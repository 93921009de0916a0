//! Best-effort immediate release.
//!
//! A snapshot pushed at admission time has its hold markers stripped; the
//! stripped spec is returned to the caller straight away and a detached task
//! writes the stripped resource back to the store. The write usually loses
//! the race with persistence of the admitted object and fails with
//! not-found. That is expected: the reconciler covers it.

use std::sync::Arc;

use holdgate_reconcile::ReleaseOutcome;
use holdgate_resource::{Resource, ResourceSpec};
use holdgate_store::{ResourceStore, StoreError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Result of receiving a snapshot.
pub struct Received {
    /// Spec with every hold marker removed.
    pub spec: ResourceSpec,

    /// Number of markers removed from the snapshot.
    pub stripped: usize,

    /// Background write-back. Resolves to `Cleared`, `Abandoned` (not found)
    /// or `Failed`; callers are free to drop it.
    pub write_back: JoinHandle<ReleaseOutcome>,
}

/// Strips hold markers and writes the result back without blocking the caller.
#[derive(Clone)]
pub struct GateRelease {
    store: Arc<dyn ResourceStore>,
}

impl GateRelease {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Strip markers from `snapshot` and schedule a single write-back.
    ///
    /// Must be called from within a tokio runtime.
    pub fn receive(&self, mut snapshot: Resource) -> Received {
        let key = snapshot.key();
        let stripped = snapshot.clear_markers();

        debug!(
            key = %key,
            stripped,
            object = %serde_json::to_string(&snapshot).unwrap_or_default(),
            "Stripped hold markers from snapshot"
        );

        let spec = snapshot.spec.clone();
        let store = self.store.clone();
        let span = tracing::info_span!("write_back", key = %key);

        let write_back = tokio::spawn(
            async move {
                match store.update(&key, &snapshot).await {
                    Ok(updated) => {
                        info!(version = ?updated.version(), "Wrote stripped resource back");
                        ReleaseOutcome::Cleared
                    }
                    Err(StoreError::NotFound(_)) => {
                        warn!("Resource not persisted yet; leaving release to the reconciler");
                        ReleaseOutcome::Abandoned
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to write stripped resource back");
                        ReleaseOutcome::Failed
                    }
                }
            }
            .instrument(span),
        );

        Received {
            spec,
            stripped,
            write_back,
        }
    }
}
