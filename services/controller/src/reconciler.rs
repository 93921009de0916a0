//! Watch-driven reconciler.
//!
//! The reconciler:
//! - Subscribes to the store's event stream and processes it sequentially
//! - Schedules one deferred check per qualifying event (added or resync of a
//!   held resource)
//! - Never blocks the stream on a check; each runs as its own task
//!
//! A deferred check sleeps for the release delay, re-reads the resource and
//! clears its hold markers with an optimistic write against the freshly read
//! version. Concurrent checks for one resource are safe: the store's
//! compare-and-swap admits at most one write per version.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use holdgate_reconcile::{PendingChecks, ReleaseOutcome, RetryPolicy};
use holdgate_resource::{Resource, ResourceKey};
use holdgate_store::{ResourceStore, StoreResult, WatchEvent};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn, Instrument};

/// Reconciler configuration.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Wait between observing a held resource and checking it.
    pub release_delay: Duration,

    /// Policy for the clearing write.
    pub retry: RetryPolicy,

    /// Suppress checks for a (resource, version) that already has one pending.
    pub dedup: bool,
}

impl ReconcilerConfig {
    /// Single attempt, no dedup.
    pub fn with_delay(release_delay: Duration) -> Self {
        Self {
            release_delay,
            retry: RetryPolicy::no_retry(),
            dedup: false,
        }
    }
}

/// Releases held resources observed on the watch stream.
pub struct Reconciler {
    store: Arc<dyn ResourceStore>,
    config: ReconcilerConfig,
    pending: Option<Arc<Mutex<PendingChecks>>>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ResourceStore>, config: ReconcilerConfig) -> Self {
        let pending = config
            .dedup
            .then(|| Arc::new(Mutex::new(PendingChecks::new())));
        Self {
            store,
            config,
            pending,
        }
    }

    /// Consume the event stream until shutdown or until the stream ends.
    ///
    /// Pending checks are detached and are not awaited here.
    #[instrument(name = "reconciler", skip_all)]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> StoreResult<()> {
        info!(
            release_delay_secs = self.config.release_delay.as_secs(),
            max_attempts = self.config.retry.max_attempts,
            dedup = self.config.dedup,
            "Starting reconciler"
        );

        let mut events = self.store.subscribe().await?;

        loop {
            tokio::select! {
                event = events.next() => {
                    match event {
                        Some(event) => {
                            self.handle(event);
                        }
                        None => {
                            warn!("Event stream ended");
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Reconciler shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Schedule a deferred check if `event` qualifies.
    pub fn handle(&self, event: WatchEvent) -> Option<JoinHandle<ReleaseOutcome>> {
        let key = event.resource.key();

        if !event.kind.is_add_like() {
            trace!(key = %key, kind = event.kind.as_str(), "Ignoring event");
            return None;
        }
        if !event.resource.is_held() {
            trace!(key = %key, kind = event.kind.as_str(), "Resource not held");
            return None;
        }

        debug!(
            key = %key,
            kind = event.kind.as_str(),
            version = ?event.resource.version(),
            "Scheduling deferred check"
        );

        let claim = self.pending.as_ref().map(|pending| {
            let claim_key = PendingChecks::key(&key.to_string(), event.resource.version());
            (pending.clone(), claim_key)
        });

        let check = DeferredCheck::new(self.store.clone(), key.clone(), &self.config);
        let span = tracing::info_span!("deferred_check", key = %key);

        Some(tokio::spawn(
            async move {
                let Some((pending, claim_key)) = claim else {
                    return check.run().await;
                };

                let claimed = lock(&pending).try_claim(&claim_key);
                if !claimed {
                    debug!(claim = %claim_key, "Check already pending");
                    return ReleaseOutcome::Deduplicated;
                }
                let _claim = ClaimGuard {
                    pending,
                    key: claim_key,
                };
                check.run().await
            }
            .instrument(span),
        ))
    }
}

/// Releases a dedup claim when the check finishes, panics or is aborted.
struct ClaimGuard {
    pending: Arc<Mutex<PendingChecks>>,
    key: String,
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        lock(&self.pending).release(&self.key);
    }
}

fn lock(pending: &Mutex<PendingChecks>) -> std::sync::MutexGuard<'_, PendingChecks> {
    // The set holds plain strings; a poisoned lock is still consistent.
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One delayed release attempt for a single resource.
pub struct DeferredCheck {
    store: Arc<dyn ResourceStore>,
    key: ResourceKey,
    delay: Duration,
    retry: RetryPolicy,
}

impl DeferredCheck {
    pub fn new(store: Arc<dyn ResourceStore>, key: ResourceKey, config: &ReconcilerConfig) -> Self {
        Self {
            store,
            key,
            delay: config.release_delay,
            retry: config.retry.clone(),
        }
    }

    /// Sleep, then release the resource if it is still held.
    pub async fn run(self) -> ReleaseOutcome {
        tokio::time::sleep(self.delay).await;

        let mut attempt = 1;
        loop {
            let current = match self.store.get(&self.key).await {
                Ok(current) => current,
                Err(e) => {
                    warn!(error = %e, "Abandoning check, resource could not be fetched");
                    return ReleaseOutcome::Abandoned;
                }
            };

            let (cleared, removed) = match Self::strip(current) {
                Some(stripped) => stripped,
                None => {
                    debug!("Hold markers already cleared");
                    return ReleaseOutcome::AlreadyClear;
                }
            };

            match self.store.update(&self.key, &cleared).await {
                Ok(updated) => {
                    info!(removed, version = ?updated.version(), "Released resource");
                    return ReleaseOutcome::Cleared;
                }
                Err(e) if e.is_retryable() && self.retry.should_retry(attempt) => {
                    let backoff = self.retry.backoff(attempt);
                    warn!(
                        error = %e,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "Release write rejected, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(error = %e, attempt, "Release write failed");
                    return ReleaseOutcome::Failed;
                }
            }
        }
    }

    /// Clear every marker, keeping the fetched version token for the write.
    fn strip(mut resource: Resource) -> Option<(Resource, usize)> {
        if !resource.is_held() {
            return None;
        }
        let removed = resource.clear_markers();
        Some((resource, removed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use holdgate_store::{EventKind, MemoryStore, StoreError};
    use holdgate_testing::{held_pod, init_tracing, pod, web_1_key, FaultyStore};
    use rstest::rstest;
    use serde_json::json;

    const DELAY: Duration = Duration::from_secs(10);

    fn reconciler(store: Arc<dyn ResourceStore>) -> Reconciler {
        Reconciler::new(store, ReconcilerConfig::with_delay(DELAY))
    }

    fn added(resource: Resource) -> WatchEvent {
        WatchEvent::new(EventKind::Added, resource)
    }

    #[tokio::test(start_paused = true)]
    async fn test_held_resource_is_cleared_after_delay() {
        init_tracing();
        let memory = Arc::new(MemoryStore::new());
        let stored = memory.create(held_pod("ns", "web-1")).unwrap();

        let handle = reconciler(memory.clone()).handle(added(stored)).unwrap();
        tokio::task::yield_now().await;

        tokio::time::advance(DELAY - Duration::from_secs(1)).await;
        tokio::task::yield_now().await;
        assert!(memory.peek(&web_1_key()).unwrap().is_held());

        assert_eq!(handle.await.unwrap(), ReleaseOutcome::Cleared);
        assert!(!memory.peek(&web_1_key()).unwrap().is_held());
        assert_eq!(memory.successful_updates(), 1);
    }

    #[rstest]
    #[case::modified(EventKind::Modified)]
    #[case::deleted(EventKind::Deleted)]
    #[tokio::test]
    async fn test_non_add_events_are_ignored(#[case] kind: EventKind) {
        let reconciler = reconciler(Arc::new(MemoryStore::new()));
        assert!(reconciler
            .handle(WatchEvent::new(kind, held_pod("ns", "web-1")))
            .is_none());
    }

    #[rstest]
    #[case::added(EventKind::Added)]
    #[case::sync(EventKind::Sync)]
    #[tokio::test]
    async fn test_unheld_resources_are_ignored(#[case] kind: EventKind) {
        let reconciler = reconciler(Arc::new(MemoryStore::new()));
        assert!(reconciler
            .handle(WatchEvent::new(kind, pod("ns", "web-1")))
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_clear_resource_is_not_written() {
        let memory = Arc::new(MemoryStore::new());
        let stored = memory.create(held_pod("ns", "web-1")).unwrap();
        let handle = reconciler(memory.clone()).handle(added(stored.clone())).unwrap();

        // Someone else releases it during the wait.
        let mut released = stored;
        released.clear_markers();
        memory.update(&web_1_key(), &released).await.unwrap();

        assert_eq!(handle.await.unwrap(), ReleaseOutcome::AlreadyClear);
        assert_eq!(memory.successful_updates(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleted_resource_is_abandoned() {
        let memory = Arc::new(MemoryStore::new());
        let stored = memory.create(held_pod("ns", "web-1")).unwrap();
        let handle = reconciler(memory.clone()).handle(added(stored)).unwrap();

        memory.delete(&web_1_key()).unwrap();

        assert_eq!(handle.await.unwrap(), ReleaseOutcome::Abandoned);
        assert_eq!(memory.successful_updates(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_writes_from_fresh_read() {
        let memory = Arc::new(MemoryStore::new());
        let stored = memory.create(held_pod("ns", "web-1")).unwrap();
        let handle = reconciler(memory.clone()).handle(added(stored.clone())).unwrap();

        // A label lands after the event was observed.
        let mut labelled = stored;
        labelled
            .metadata
            .extra
            .insert("labels".into(), json!({"app": "web"}));
        memory.update(&web_1_key(), &labelled).await.unwrap();

        assert_eq!(handle.await.unwrap(), ReleaseOutcome::Cleared);
        let current = memory.peek(&web_1_key()).unwrap();
        assert!(!current.is_held());
        assert_eq!(current.metadata.extra["labels"]["app"], "web");
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_fails_without_retry_by_default() {
        let memory = Arc::new(MemoryStore::new());
        let stored = memory.create(held_pod("ns", "web-1")).unwrap();
        let store = Arc::new(FaultyStore::new(memory.clone()));
        store.fail_next_update(StoreError::Conflict {
            key: web_1_key(),
            message: "stale".into(),
        });

        let outcome = reconciler(store.clone()).handle(added(stored)).unwrap().await.unwrap();

        assert_eq!(outcome, ReleaseOutcome::Failed);
        assert_eq!(store.update_calls(), 1);
        assert!(memory.peek(&web_1_key()).unwrap().is_held());
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_refetches_and_retries_when_enabled() {
        let memory = Arc::new(MemoryStore::new());
        let stored = memory.create(held_pod("ns", "web-1")).unwrap();
        let store = Arc::new(FaultyStore::new(memory.clone()));
        store.fail_next_update(StoreError::Conflict {
            key: web_1_key(),
            message: "stale".into(),
        });
        let config = ReconcilerConfig {
            retry: RetryPolicy::bounded(3, Duration::from_millis(100), Duration::from_secs(1)),
            ..ReconcilerConfig::with_delay(DELAY)
        };

        let outcome = Reconciler::new(store.clone(), config)
            .handle(added(stored))
            .unwrap()
            .await
            .unwrap();

        assert_eq!(outcome, ReleaseOutcome::Cleared);
        assert_eq!(store.update_calls(), 2);
        assert_eq!(store.get_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_is_not_retried() {
        let memory = Arc::new(MemoryStore::new());
        let stored = memory.create(held_pod("ns", "web-1")).unwrap();
        let store = Arc::new(FaultyStore::new(memory));
        store.fail_next_update(StoreError::Unauthorized("forbidden".into()));
        let config = ReconcilerConfig {
            retry: RetryPolicy::bounded(3, Duration::from_millis(100), Duration::from_secs(1)),
            ..ReconcilerConfig::with_delay(DELAY)
        };

        let outcome = Reconciler::new(store.clone(), config)
            .handle(added(stored))
            .unwrap()
            .await
            .unwrap();

        assert_eq!(outcome, ReleaseOutcome::Failed);
        assert_eq!(store.update_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_events_each_schedule_a_check() {
        let memory = Arc::new(MemoryStore::new());
        let stored = memory.create(held_pod("ns", "web-1")).unwrap();
        let reconciler = reconciler(memory.clone());

        let first = reconciler.handle(added(stored.clone())).unwrap();
        let second = reconciler
            .handle(WatchEvent::new(EventKind::Sync, stored))
            .unwrap();

        let outcomes = [first.await.unwrap(), second.await.unwrap()];

        // One write wins; the other sees a clear resource or loses the race.
        assert!(outcomes.contains(&ReleaseOutcome::Cleared));
        assert!(!outcomes.contains(&ReleaseOutcome::Abandoned));
        assert_eq!(memory.successful_updates(), 1);
        assert!(!memory.peek(&web_1_key()).unwrap().is_held());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dedup_suppresses_duplicate_versions() {
        let memory = Arc::new(MemoryStore::new());
        let stored = memory.create(held_pod("ns", "web-1")).unwrap();
        let config = ReconcilerConfig {
            dedup: true,
            ..ReconcilerConfig::with_delay(DELAY)
        };
        let reconciler = Reconciler::new(memory.clone(), config);

        let first = reconciler.handle(added(stored.clone())).unwrap();
        tokio::task::yield_now().await;
        let second = reconciler
            .handle(WatchEvent::new(EventKind::Sync, stored))
            .unwrap();

        assert_eq!(second.await.unwrap(), ReleaseOutcome::Deduplicated);
        assert_eq!(first.await.unwrap(), ReleaseOutcome::Cleared);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_check_releases_its_claim() {
        let memory = Arc::new(MemoryStore::new());
        let stored = memory.create(held_pod("ns", "web-1")).unwrap();
        let store = Arc::new(FaultyStore::new(memory.clone()));
        store.panic_next_get();
        let config = ReconcilerConfig {
            dedup: true,
            ..ReconcilerConfig::with_delay(DELAY)
        };
        let reconciler = Reconciler::new(store.clone(), config);

        let first = reconciler.handle(added(stored.clone())).unwrap();
        assert!(first.await.unwrap_err().is_panic());

        let second = reconciler
            .handle(WatchEvent::new(EventKind::Sync, stored))
            .unwrap();
        assert_eq!(second.await.unwrap(), ReleaseOutcome::Cleared);
        assert!(!memory.peek(&web_1_key()).unwrap().is_held());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_releases_until_shutdown() {
        let memory = Arc::new(MemoryStore::new());
        memory.create(held_pod("ns", "web-1")).unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let reconciler = reconciler(memory.clone());
        let worker = tokio::spawn(async move { reconciler.run(shutdown_rx).await });

        for _ in 0..100 {
            if !memory.peek(&web_1_key()).unwrap().is_held() {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        assert!(!memory.peek(&web_1_key()).unwrap().is_held());

        shutdown_tx.send(true).unwrap();
        worker.await.unwrap().unwrap();
    }
}
