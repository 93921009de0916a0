//! HTTP client for the platform's resource API.
//!
//! Provides:
//! - `get` / `update` against `/api/v1/namespaces/{ns}/pods/{name}`
//! - `subscribe` as a list-then-watch loop. Every relist replays all objects
//!   (the first as `Added`, later ones as `Sync`), and the watch is opened
//!   with `timeoutSeconds` equal to the resync interval so the loop relists
//!   on that cadence.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use holdgate_resource::{Resource, ResourceKey};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::event::{EventKind, WatchEvent, WatchStream};
use crate::ResourceStore;

/// Minimum spacing between two relists.
const RELIST_BACKOFF: Duration = Duration::from_secs(1);

/// Default interval between full relists.
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(5 * 60); // 5 minutes

/// HTTP store client configuration.
#[derive(Debug, Clone)]
pub struct HttpStoreConfig {
    /// API server base URL, e.g. `https://kubernetes.default.svc`.
    pub base_url: String,

    /// Bearer token.
    pub token: Option<String>,

    /// PEM bundle trusted in addition to the system roots.
    pub ca_pem: Option<Vec<u8>>,

    /// Restrict watches to one namespace.
    pub namespace: Option<String>,

    /// Interval between full relists.
    pub resync_interval: Duration,

    /// Timeout for get/update/list requests.
    pub request_timeout: Duration,
}

impl HttpStoreConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            ca_pem: None,
            namespace: None,
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Load store settings from `HOLDGATE_STORE_*` environment variables.
    pub fn from_env() -> StoreResult<Self> {
        let base_url = std::env::var("HOLDGATE_STORE_URL")
            .unwrap_or_else(|_| "https://kubernetes.default.svc".to_string());
        let mut config = Self::new(base_url);

        if let Ok(path) = std::env::var("HOLDGATE_STORE_TOKEN_FILE") {
            let token = std::fs::read_to_string(&path)
                .map_err(|e| StoreError::Config(format!("failed to read token file {path}: {e}")))?;
            config.token = Some(token);
        }

        if let Ok(path) = std::env::var("HOLDGATE_STORE_CA_FILE") {
            let pem = std::fs::read(&path)
                .map_err(|e| StoreError::Config(format!("failed to read CA file {path}: {e}")))?;
            config.ca_pem = Some(pem);
        }

        config.namespace = std::env::var("HOLDGATE_WATCH_NAMESPACE")
            .ok()
            .filter(|ns| !ns.is_empty());

        if let Ok(raw) = std::env::var("HOLDGATE_RESYNC_INTERVAL_SECS") {
            let secs: u64 = raw
                .parse()
                .map_err(|e| StoreError::Config(format!("invalid HOLDGATE_RESYNC_INTERVAL_SECS: {e}")))?;
            config.resync_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

/// [`crate::ResourceStore`] backed by the platform REST API.
#[derive(Clone)]
pub struct HttpStore {
    client: reqwest::Client,
    config: Arc<HttpStoreConfig>,
}

#[derive(Debug, Deserialize)]
struct ResourceList {
    #[serde(default)]
    metadata: ListMeta,
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ListMeta {
    #[serde(default, rename = "resourceVersion")]
    resource_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawWatchEvent {
    #[serde(rename = "type")]
    kind: String,
    object: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
}

impl HttpStore {
    /// Create a new HTTP store client.
    pub fn new(config: HttpStoreConfig) -> StoreResult<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                .map_err(|e| StoreError::Config(format!("invalid bearer token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(pem) = &config.ca_pem {
            let cert = reqwest::Certificate::from_pem(pem)
                .map_err(|e| StoreError::Config(format!("invalid CA bundle: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }

        let client = builder
            .build()
            .map_err(|e| StoreError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn object_url(&self, key: &ResourceKey) -> String {
        format!(
            "{}/api/v1/namespaces/{}/pods/{}",
            self.base(),
            key.namespace,
            key.name
        )
    }

    fn collection_url(&self) -> String {
        match &self.config.namespace {
            Some(ns) => format!("{}/api/v1/namespaces/{}/pods", self.base(), ns),
            None => format!("{}/api/v1/pods", self.base()),
        }
    }

    /// List all resources and the collection version to watch from.
    async fn list(&self) -> StoreResult<(Vec<Resource>, Option<String>)> {
        let url = self.collection_url();
        debug!(url = %url, "Listing resources");

        let response = self
            .client
            .get(&url)
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        let response = check_status(response, None).await?;
        let list: ResourceList = response.json().await?;

        let mut resources = Vec::with_capacity(list.items.len());
        for item in list.items {
            match Resource::from_value(item) {
                Ok(resource) => resources.push(resource),
                Err(e) => warn!(error = %e, "Skipping undecodable list item"),
            }
        }

        Ok((resources, list.metadata.resource_version))
    }

    /// Stream watch events until the server closes the watch.
    ///
    /// Returns `Ok(false)` when the subscriber has gone away.
    async fn watch_once(
        &self,
        resource_version: Option<&str>,
        tx: &mpsc::UnboundedSender<WatchEvent>,
    ) -> StoreResult<bool> {
        let timeout_secs = self.config.resync_interval.as_secs().max(1);
        let mut request = self.client.get(self.collection_url()).query(&[
            ("watch", "true".to_string()),
            ("timeoutSeconds", timeout_secs.to_string()),
        ]);
        if let Some(rv) = resource_version {
            request = request.query(&[("resourceVersion", rv)]);
        }

        let response = request
            .timeout(Duration::from_secs(timeout_secs) + self.config.request_timeout)
            .send()
            .await?;
        let response = check_status(response, None).await?;

        let mut body = response.bytes_stream();
        let mut lines = LineBuffer::default();

        while let Some(chunk) = body.next().await {
            lines.push(&chunk?);

            while let Some(line) = lines.next_line() {
                let Some(event) = parse_watch_line(line)? else {
                    continue;
                };
                if tx.send(event).is_err() {
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }

    async fn run_watch(self, tx: mpsc::UnboundedSender<WatchEvent>) {
        info!(
            url = %self.collection_url(),
            resync_interval_secs = self.config.resync_interval.as_secs(),
            "Starting resource watch"
        );

        let mut replay_kind = EventKind::Added;
        while !tx.is_closed() {
            let started = Instant::now();

            match self.list().await {
                Ok((resources, resource_version)) => {
                    debug!(count = resources.len(), kind = replay_kind.as_str(), "Replaying list");
                    for resource in resources {
                        if tx.send(WatchEvent::new(replay_kind, resource)).is_err() {
                            return;
                        }
                    }
                    replay_kind = EventKind::Sync;

                    match self.watch_once(resource_version.as_deref(), &tx).await {
                        Ok(true) => debug!("Watch closed by server, relisting"),
                        Ok(false) => break,
                        Err(e) => warn!(error = %e, "Watch failed, relisting"),
                    }
                }
                Err(e) => warn!(error = %e, "Failed to list resources, will retry"),
            }

            let elapsed = started.elapsed();
            if elapsed < RELIST_BACKOFF {
                tokio::time::sleep(RELIST_BACKOFF - elapsed).await;
            }
        }

        info!("Resource watch stopped");
    }
}

/// Splits a chunked body into newline-terminated lines.
///
/// Bytes already searched for a newline are not searched again, and consumed
/// lines are only compacted away on the next push.
#[derive(Debug, Default)]
struct LineBuffer {
    buf: Vec<u8>,
    start: usize,
    scanned: usize,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) {
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.scanned -= self.start;
            self.start = 0;
        }
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete line, including its newline.
    fn next_line(&mut self) -> Option<&[u8]> {
        match self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            Some(offset) => {
                let end = self.scanned + offset + 1;
                let line = &self.buf[self.start..end];
                self.start = end;
                self.scanned = end;
                Some(line)
            }
            None => {
                self.scanned = self.buf.len();
                None
            }
        }
    }
}

/// Decode one line of a watch response. Bookmarks and blank lines yield `None`.
fn parse_watch_line(line: &[u8]) -> StoreResult<Option<WatchEvent>> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    let raw: RawWatchEvent = serde_json::from_slice(line)?;
    let kind = match raw.kind.as_str() {
        "ADDED" => EventKind::Added,
        "MODIFIED" => EventKind::Modified,
        "DELETED" => EventKind::Deleted,
        "BOOKMARK" => return Ok(None),
        "ERROR" => {
            let status: ApiStatus = serde_json::from_value(raw.object).unwrap_or_default();
            return Err(StoreError::Status {
                status: status.code,
                message: status.message,
            });
        }
        other => {
            warn!(event_type = %other, "Ignoring unknown watch event type");
            return Ok(None);
        }
    };

    match Resource::from_value(raw.object) {
        Ok(resource) => Ok(Some(WatchEvent::new(kind, resource))),
        Err(e) => {
            warn!(error = %e, "Skipping undecodable watch object");
            Ok(None)
        }
    }
}

/// Map non-success responses onto [`StoreError`].
async fn check_status(response: Response, key: Option<&ResourceKey>) -> StoreResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiStatus>(&body)
        .map(|s| s.message)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or(body);

    Err(match (status, key) {
        (StatusCode::NOT_FOUND, Some(key)) => StoreError::NotFound(key.clone()),
        (StatusCode::CONFLICT, Some(key)) => StoreError::Conflict {
            key: key.clone(),
            message,
        },
        (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => StoreError::Unauthorized(message),
        _ => StoreError::Status {
            status: status.as_u16(),
            message,
        },
    })
}

#[async_trait]
impl ResourceStore for HttpStore {
    async fn get(&self, key: &ResourceKey) -> StoreResult<Resource> {
        let response = self
            .client
            .get(self.object_url(key))
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        let response = check_status(response, Some(key)).await?;
        let body = response.bytes().await?;
        Ok(Resource::from_slice(&body)?)
    }

    async fn update(&self, key: &ResourceKey, resource: &Resource) -> StoreResult<Resource> {
        let response = self
            .client
            .put(self.object_url(key))
            .json(resource)
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        let response = check_status(response, Some(key)).await?;
        let body = response.bytes().await?;
        Ok(Resource::from_slice(&body)?)
    }

    async fn subscribe(&self) -> StoreResult<WatchStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(self.clone().run_watch(tx));
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use holdgate_resource::HoldMarker;
    use rstest::rstest;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pod_json(name: &str, version: &str, gates: serde_json::Value) -> serde_json::Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": name, "namespace": "ns", "resourceVersion": version},
            "spec": {"containers": [{"name": "app"}], "schedulingGates": gates}
        })
    }

    fn store_for(server: &MockServer) -> HttpStore {
        let mut config = HttpStoreConfig::new(server.uri());
        config.token = Some("secret-token\n".into());
        config.resync_interval = Duration::from_secs(1);
        HttpStore::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_get_decodes_resource_and_sends_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/ns/pods/web-1"))
            .and(header("authorization", "Bearer secret-token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(pod_json("web-1", "7", json!([{"name": "hold"}]))),
            )
            .mount(&server)
            .await;

        let store = store_for(&server);
        let resource = store.get(&ResourceKey::new("ns", "web-1")).await.unwrap();

        assert_eq!(resource.version(), Some("7"));
        assert!(resource.has_marker(&HoldMarker::new("hold").unwrap()));
    }

    #[rstest]
    #[case(404, "not_found")]
    #[case(409, "conflict")]
    #[case(403, "unauthorized")]
    #[case(500, "status")]
    #[tokio::test]
    async fn test_update_maps_error_statuses(#[case] status: u16, #[case] expected: &str) {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/v1/namespaces/ns/pods/web-1"))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "kind": "Status",
                "code": status,
                "message": "the object has been modified"
            })))
            .mount(&server)
            .await;

        let store = store_for(&server);
        let key = ResourceKey::new("ns", "web-1");
        let err = store
            .update(&key, &Resource::new("ns", "web-1").with_version("3"))
            .await
            .unwrap_err();

        let actual = match err {
            StoreError::NotFound(_) => "not_found",
            StoreError::Conflict { .. } => "conflict",
            StoreError::Unauthorized(_) => "unauthorized",
            StoreError::Status { .. } => "status",
            other => panic!("unexpected error: {other:?}"),
        };
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn test_update_sends_version_token_and_omits_cleared_markers() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/v1/namespaces/ns/pods/web-1"))
            .and(body_partial_json(json!({"metadata": {"resourceVersion": "3"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(pod_json("web-1", "4", json!(null))))
            .expect(1)
            .mount(&server)
            .await;

        let store = store_for(&server);
        let mut resource = Resource::new("ns", "web-1")
            .with_marker(&HoldMarker::new("hold").unwrap())
            .with_version("3");
        resource.clear_markers();

        let stored = store.update(&resource.key(), &resource).await.unwrap();
        assert_eq!(stored.version(), Some("4"));
        assert!(!stored.is_held());

        let requests = server.received_requests().await.unwrap();
        let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert!(sent["spec"].get("schedulingGates").is_none());
    }

    #[tokio::test]
    async fn test_subscribe_lists_watches_and_relists() {
        let server = MockServer::start().await;

        let watch_body = format!(
            "{}\n{}\n",
            json!({"type": "MODIFIED", "object": pod_json("a", "11", json!([]))}),
            json!({"type": "BOOKMARK", "object": {"metadata": {"resourceVersion": "12"}}}),
        );
        Mock::given(method("GET"))
            .and(path("/api/v1/pods"))
            .and(query_param("watch", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_string(watch_body))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/pods"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "kind": "PodList",
                "metadata": {"resourceVersion": "10"},
                "items": [pod_json("a", "10", json!([{"name": "hold"}]))]
            })))
            .mount(&server)
            .await;

        let store = store_for(&server);
        let events = store.subscribe().await.unwrap();
        let events: Vec<WatchEvent> = tokio::time::timeout(
            Duration::from_secs(10),
            events.take(3).collect::<Vec<_>>(),
        )
        .await
        .unwrap();

        let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Added, EventKind::Modified, EventKind::Sync]);
        assert!(events[0].resource.is_held());
        assert!(!events[1].resource.is_held());
    }

    #[test]
    fn test_watch_error_line_is_an_error() {
        let line = json!({
            "type": "ERROR",
            "object": {"kind": "Status", "code": 410, "message": "too old resource version"}
        })
        .to_string();

        let err = parse_watch_line(line.as_bytes()).unwrap_err();
        assert_eq!(
            err,
            StoreError::Status {
                status: 410,
                message: "too old resource version".into()
            }
        );
    }

    #[test]
    fn test_blank_watch_line_is_skipped() {
        assert!(parse_watch_line(b"\n").unwrap().is_none());
    }

    #[test]
    fn test_line_buffer_joins_lines_split_across_chunks() {
        let mut lines = LineBuffer::default();
        let mut seen: Vec<Vec<u8>> = Vec::new();

        let chunks: [&[u8]; 4] = [b"{\"a\"", b":1}\n{\"b\"", b":2}\n\n{\"c", b"\":3}\n"];
        for chunk in chunks {
            lines.push(chunk);
            while let Some(line) = lines.next_line() {
                seen.push(line.to_vec());
            }
        }

        assert_eq!(
            seen,
            vec![
                b"{\"a\":1}\n".to_vec(),
                b"{\"b\":2}\n".to_vec(),
                b"\n".to_vec(),
                b"{\"c\":3}\n".to_vec(),
            ]
        );
        assert!(lines.next_line().is_none());
    }

    #[test]
    fn test_line_buffer_holds_partial_line() {
        let mut lines = LineBuffer::default();
        lines.push(b"{\"partial\"");
        assert!(lines.next_line().is_none());
        assert_eq!(lines.scanned, lines.buf.len());

        lines.push(b": true}\n");
        assert_eq!(lines.next_line(), Some(&b"{\"partial\": true}\n"[..]));
        assert_eq!(lines.start, lines.buf.len());
    }
}
