//! In-memory resource store.
//!
//! Behaves like the cluster control plane for the operations the gate needs:
//! monotonically increasing version tokens, compare-and-swap on update, and a
//! watch feed that replays current objects on subscribe and on [`resync`].
//!
//! [`resync`]: MemoryStore::resync

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::StreamExt;
use holdgate_resource::{Resource, ResourceKey};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::event::{EventKind, WatchEvent, WatchStream};
use crate::ResourceStore;

/// In-memory [`ResourceStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<ResourceKey, Resource>,
    last_version: u64,
    subscribers: Vec<mpsc::UnboundedSender<WatchEvent>>,
    successful_updates: u64,
}

impl Inner {
    fn next_version(&mut self) -> String {
        self.last_version += 1;
        self.last_version.to_string()
    }

    fn publish(&mut self, event: WatchEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a test panicked mid-update.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Persist a new resource, as the platform does after admission.
    pub fn create(&self, resource: Resource) -> StoreResult<Resource> {
        let mut inner = self.lock();
        let key = resource.key();
        if inner.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key));
        }

        let mut stored = resource;
        stored.metadata.resource_version = Some(inner.next_version());
        inner.objects.insert(key.clone(), stored.clone());
        inner.publish(WatchEvent::new(EventKind::Added, stored.clone()));

        debug!(key = %key, version = ?stored.version(), "Created resource");
        Ok(stored)
    }

    /// Remove a resource.
    pub fn delete(&self, key: &ResourceKey) -> StoreResult<Resource> {
        let mut inner = self.lock();
        let removed = inner
            .objects
            .remove(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        inner.publish(WatchEvent::new(EventKind::Deleted, removed.clone()));
        Ok(removed)
    }

    /// Redeliver every stored resource to subscribers as [`EventKind::Sync`].
    pub fn resync(&self) {
        let mut inner = self.lock();
        let objects: Vec<Resource> = inner.objects.values().cloned().collect();
        for resource in objects {
            inner.publish(WatchEvent::new(EventKind::Sync, resource));
        }
    }

    /// Current state of a resource without going through the async trait.
    pub fn peek(&self, key: &ResourceKey) -> Option<Resource> {
        self.lock().objects.get(key).cloned()
    }

    /// Number of updates that passed the version check.
    pub fn successful_updates(&self) -> u64 {
        self.lock().successful_updates
    }

    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(|tx| !tx.is_closed());
        inner.subscribers.len()
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get(&self, key: &ResourceKey) -> StoreResult<Resource> {
        self.peek(key).ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    async fn update(&self, key: &ResourceKey, resource: &Resource) -> StoreResult<Resource> {
        let mut inner = self.lock();
        let current = inner
            .objects
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        if let Some(expected) = resource.version() {
            if current.version() != Some(expected) {
                return Err(StoreError::Conflict {
                    key: key.clone(),
                    message: format!(
                        "version {} does not match stored version {}",
                        expected,
                        current.version().unwrap_or("<none>")
                    ),
                });
            }
        }

        let mut stored = resource.clone();
        stored.metadata.namespace = key.namespace.clone();
        stored.metadata.name = key.name.clone();
        stored.metadata.resource_version = Some(inner.next_version());
        inner.objects.insert(key.clone(), stored.clone());
        inner.successful_updates += 1;
        inner.publish(WatchEvent::new(EventKind::Modified, stored.clone()));

        debug!(key = %key, version = ?stored.version(), "Updated resource");
        Ok(stored)
    }

    async fn subscribe(&self) -> StoreResult<WatchStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        for resource in inner.objects.values() {
            // The receiver is alive; it is held below.
            let _ = tx.send(WatchEvent::new(EventKind::Added, resource.clone()));
        }
        inner.subscribers.push(tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}
