//! # holdgate-store
//!
//! Client interface to the versioned resource store (the cluster control
//! plane), plus two implementations:
//!
//! - [`MemoryStore`]: in-process store with optimistic concurrency and a
//!   watch feed, used by tests and local runs
//! - [`HttpStore`]: client for the platform's REST API (get, replace,
//!   list-then-watch with periodic relist)
//!
//! The core depends only on [`ResourceStore`]; convergence between the two
//! release paths rests entirely on the store rejecting stale version tokens.

mod error;
mod event;
mod http;
mod memory;

use async_trait::async_trait;
use holdgate_resource::{Resource, ResourceKey};

pub use error::{StoreError, StoreResult};
pub use event::{EventKind, WatchEvent, WatchStream};
pub use http::{HttpStore, HttpStoreConfig, DEFAULT_RESYNC_INTERVAL};
pub use memory::MemoryStore;

/// Versioned resource store.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch the current state of a resource, including its version token.
    async fn get(&self, key: &ResourceKey) -> StoreResult<Resource>;

    /// Replace a resource.
    ///
    /// When `resource` carries a version token the write succeeds only if it
    /// matches the stored version; otherwise [`StoreError::Conflict`]. Returns
    /// the stored resource with its new version.
    async fn update(&self, key: &ResourceKey, resource: &Resource) -> StoreResult<Resource>;

    /// Subscribe to change notifications.
    ///
    /// The stream is infinite and restarts itself on transport failure.
    /// Resources are periodically redelivered as [`EventKind::Sync`], so
    /// consumers must tolerate duplicates.
    async fn subscribe(&self) -> StoreResult<WatchStream>;
}
