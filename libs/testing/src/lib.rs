//! Test support shared across holdgate crates.
//!
//! - Resource fixtures for the common `ns/web-1` scenarios
//! - [`FaultyStore`], a wrapper that injects store errors and counts calls
//! - [`init_tracing`] to route logs through the test writer

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use holdgate_resource::{HoldMarker, Resource, ResourceKey};
use holdgate_store::{ResourceStore, StoreError, StoreResult, WatchStream};

static INIT_TRACING: Once = Once::new();

/// Install a test-friendly tracing subscriber once per process.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// The marker used throughout the test scenarios.
pub fn hold_marker() -> HoldMarker {
    HoldMarker::new("hold").expect("valid marker")
}

/// A workload with a container and no hold markers.
pub fn pod(namespace: &str, name: &str) -> Resource {
    let mut resource = Resource::new(namespace, name);
    resource.spec.extra.insert(
        "containers".into(),
        serde_json::json!([{"name": "app", "image": "nginx:1.27"}]),
    );
    resource
}

/// A workload carrying the test hold marker.
pub fn held_pod(namespace: &str, name: &str) -> Resource {
    pod(namespace, name).with_marker(&hold_marker())
}

/// `ns/web-1`.
pub fn web_1_key() -> ResourceKey {
    ResourceKey::new("ns", "web-1")
}

/// Store wrapper that fails scripted calls and counts traffic.
///
/// Queued errors are consumed in order, one per call; once a queue is empty
/// calls pass through to the inner store. [`FaultyStore::panic_next_get`]
/// makes the next `get` panic instead of returning.
pub struct FaultyStore<S> {
    inner: Arc<S>,
    get_faults: Mutex<VecDeque<StoreError>>,
    update_faults: Mutex<VecDeque<StoreError>>,
    panic_on_get: AtomicBool,
    get_calls: AtomicUsize,
    update_calls: AtomicUsize,
}

impl<S: ResourceStore> FaultyStore<S> {
    pub fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            get_faults: Mutex::new(VecDeque::new()),
            update_faults: Mutex::new(VecDeque::new()),
            panic_on_get: AtomicBool::new(false),
            get_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    pub fn fail_next_get(&self, err: StoreError) {
        self.get_faults.lock().unwrap().push_back(err);
    }

    pub fn fail_next_update(&self, err: StoreError) {
        self.update_faults.lock().unwrap().push_back(err);
    }

    pub fn panic_next_get(&self) {
        self.panic_on_get.store(true, Ordering::SeqCst);
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: ResourceStore> ResourceStore for FaultyStore<S> {
    async fn get(&self, key: &ResourceKey) -> StoreResult<Resource> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_get.swap(false, Ordering::SeqCst) {
            panic!("injected panic in get");
        }
        let fault = self.get_faults.lock().unwrap().pop_front();
        match fault {
            Some(err) => Err(err),
            None => self.inner.get(key).await,
        }
    }

    async fn update(&self, key: &ResourceKey, resource: &Resource) -> StoreResult<Resource> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let fault = self.update_faults.lock().unwrap().pop_front();
        match fault {
            Some(err) => Err(err),
            None => self.inner.update(key, resource).await,
        }
    }

    async fn subscribe(&self) -> StoreResult<WatchStream> {
        self.inner.subscribe().await
    }
}
