//! End-to-end release flow.
//!
//! Runs the webhook and gate release HTTP services on ephemeral ports
//! against an in-memory store, with the reconciler watching that store:
//!
//! 1. A workload is admitted and receives the hold marker
//! 2. The gate release write-back loses the race with persistence
//! 3. The reconciler releases the persisted workload after the delay
//!
//! ## Running
//!
//! ```bash
//! cargo test -p holdgate-e2e --test release_flow
//! ```

use std::sync::Arc;
use std::time::Duration;

use holdgate_controller::{Reconciler, ReconcilerConfig};
use holdgate_gate_release::GateRelease;
use holdgate_reconcile::ReleaseOutcome;
use holdgate_resource::Resource;
use holdgate_store::{EventKind, MemoryStore, ResourceStore, WatchEvent};
use holdgate_testing::{held_pod, hold_marker, init_tracing, pod, web_1_key};
use holdgate_webhook::{
    AdmissionRequest, AdmissionReview, GroupVersionResource, HttpForwarder, Interceptor,
};
use tokio::net::TcpListener;
use tokio::sync::watch;

const RELEASE_DELAY: Duration = Duration::from_millis(200);

async fn serve(app: axum::Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn start_gate_release(store: Arc<MemoryStore>) -> String {
    let state = holdgate_gate_release::state::AppState::new(GateRelease::new(store));
    serve(holdgate_gate_release::api::create_router(state)).await
}

async fn start_webhook(gate_release_url: &str) -> String {
    let forwarder = HttpForwarder::new(
        format!("{gate_release_url}/api/pod"),
        Duration::from_secs(2),
    )
    .unwrap();
    let interceptor = Interceptor::new(hold_marker(), Arc::new(forwarder));
    let state = holdgate_webhook::state::AppState::new(interceptor);
    serve(holdgate_webhook::api::create_router(state)).await
}

async fn admit(client: &reqwest::Client, webhook_url: &str, object: &Resource) -> AdmissionReview {
    let review = AdmissionReview::for_request(AdmissionRequest {
        uid: "e2e-uid".into(),
        resource: GroupVersionResource::pods(),
        namespace: Some(object.metadata.namespace.clone()),
        name: Some(object.metadata.name.clone()),
        operation: Some("CREATE".into()),
        object: object.to_value().unwrap(),
    });

    let resp = client
        .post(format!("{webhook_url}/mutate"))
        .json(&review)
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success(), "mutate failed: {}", resp.status());
    resp.json().await.unwrap()
}

/// Poll until `check` holds or the deadline passes.
async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn admitted_workload_is_held_then_released() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let client = reqwest::Client::new();

    let gate_release_url = start_gate_release(store.clone()).await;
    let webhook_url = start_webhook(&gate_release_url).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconciler = Reconciler::new(store.clone(), ReconcilerConfig::with_delay(RELEASE_DELAY));
    let worker = tokio::spawn(async move { reconciler.run(shutdown_rx).await });
    wait_until("reconciler subscription", || store.subscriber_count() == 1).await;

    // The snapshot is forwarded before the object exists.
    let object = pod("ns", "web-1");
    let reply = admit(&client, &webhook_url, &object).await;
    let response = reply.response.unwrap();
    assert!(response.allowed);
    assert_eq!(response.uid, "e2e-uid");

    // Persist what the platform would: the object with the patch applied.
    let mut doc = object.to_value().unwrap();
    let patch: json_patch::Patch =
        serde_json::from_slice(&response.decoded_patch().unwrap().to_vec().unwrap()).unwrap();
    json_patch::patch(&mut doc, &patch).unwrap();
    let admitted = Resource::from_value(doc).unwrap();
    assert!(admitted.has_marker(&hold_marker()));
    store.create(admitted).unwrap();

    wait_until("release", || {
        store.peek(&web_1_key()).is_some_and(|r| !r.is_held())
    })
    .await;
    assert_eq!(store.successful_updates(), 1);

    shutdown_tx.send(true).unwrap();
    worker.await.unwrap().unwrap();
}

#[tokio::test]
async fn gate_release_wins_and_reconciler_finds_clear() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let client = reqwest::Client::new();
    let gate_release_url = start_gate_release(store.clone()).await;

    // Already persisted when the snapshot arrives.
    let persisted = store.create(held_pod("ns", "web-1")).unwrap();

    let resp = client
        .post(format!("{gate_release_url}/api/pod"))
        .json(&held_pod("ns", "web-1"))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let spec: serde_json::Value = resp.json().await.unwrap();
    assert!(spec.get("schedulingGates").is_none());

    wait_until("write-back", || store.successful_updates() == 1).await;

    let reconciler = Reconciler::new(store.clone(), ReconcilerConfig::with_delay(RELEASE_DELAY));
    let outcome = reconciler
        .handle(WatchEvent::new(EventKind::Added, persisted))
        .unwrap()
        .await
        .unwrap();

    assert_eq!(outcome, ReleaseOutcome::AlreadyClear);
    assert_eq!(store.successful_updates(), 1);
}

#[tokio::test]
async fn mistyped_request_is_denied_without_forwarding() {
    let store = Arc::new(MemoryStore::new());
    let client = reqwest::Client::new();
    let gate_release_url = start_gate_release(store.clone()).await;
    let webhook_url = start_webhook(&gate_release_url).await;

    let review = AdmissionReview::for_request(AdmissionRequest {
        uid: "e2e-uid".into(),
        resource: GroupVersionResource {
            group: "apps".into(),
            version: "v1".into(),
            resource: "deployments".into(),
        },
        namespace: Some("ns".into()),
        name: Some("web".into()),
        operation: Some("CREATE".into()),
        object: serde_json::json!({"kind": "Deployment", "metadata": {"name": "web"}}),
    });

    let reply: AdmissionReview = client
        .post(format!("{webhook_url}/mutate"))
        .json(&review)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let response = reply.response.unwrap();
    assert!(!response.allowed);
    assert!(response.patch.is_none());
    assert_eq!(store.successful_updates(), 0);
}

#[tokio::test]
async fn concurrent_releases_converge() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let persisted = store.create(held_pod("ns", "web-1")).unwrap();
    let reconciler = Reconciler::new(store.clone(), ReconcilerConfig::with_delay(RELEASE_DELAY));

    // Watch replays and resyncs deliver the same object several times.
    let mut checks = Vec::new();
    for kind in [EventKind::Added, EventKind::Sync, EventKind::Sync, EventKind::Sync] {
        checks.push(reconciler.handle(WatchEvent::new(kind, persisted.clone())).unwrap());
    }
    let gate_release = GateRelease::new(store.clone()).receive(held_pod("ns", "web-1"));

    let mut outcomes = Vec::new();
    for check in checks {
        outcomes.push(check.await.unwrap());
    }
    outcomes.push(gate_release.write_back.await.unwrap());

    let current = store.get(&web_1_key()).await.unwrap();
    assert!(!current.is_held());
    assert!(outcomes.iter().any(|o| o.wrote()));
    assert!(!outcomes.contains(&ReleaseOutcome::Abandoned));
    assert_eq!(
        store.successful_updates() as usize,
        outcomes.iter().filter(|o| o.wrote()).count()
    );
}
