//! HTTP transport implementation.
//!
//! This module provides an HTTP-based transport for the sync engine.
//! The actual HTTP client is abstracted via a trait to allow different
//! implementations (reqwest, hyper, ureq, etc.). Bodies are JSON.

use crate::config::EndpointConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use fieldsync_protocol::{
    ChangeSetItem, ErrorBody, GenericSyncRequest, PullRequest, PullResponse, PushResponse,
};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::warn;

/// Header carrying the actor identity on changeset pushes.
pub const USER_ID_HEADER: &str = "X-User-ID";
/// Header carrying the tenant on generic pushes.
pub const TENANT_ID_HEADER: &str = "X-Tenant-ID";

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    /// Status code.
    pub status: u16,
    /// Body bytes.
    pub body: Vec<u8>,
}

impl HttpReply {
    /// Creates a reply.
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    /// Returns true for 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport. An `Err` means
/// the server could not be reached; any answer, error statuses included, is an
/// `Ok` reply.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request.
    fn post(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: Vec<u8>,
        timeout: Duration,
    ) -> Result<HttpReply, String>;

    /// Sends a GET request.
    fn get(&self, url: &str, headers: &[(&str, &str)], timeout: Duration) -> Result<HttpReply, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// HTTP-based sync transport.
pub struct HttpTransport<C: HttpClient> {
    client: C,
    timeout: Duration,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(client: C) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(30),
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn send<Res: DeserializeOwned>(
        &self,
        request: impl FnOnce(&C) -> Result<HttpReply, String>,
    ) -> SyncResult<Res> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let reply = request(&self.client).map_err(|e| {
            *self.last_error.write() = Some(e.clone());
            SyncError::transport_retryable(e)
        })?;

        if !reply.is_success() {
            let err = decode_error(&reply);
            warn!(status = reply.status, error = %err, "sync request rejected");
            *self.last_error.write() = Some(err.to_string());
            return Err(err);
        }

        *self.last_error.write() = None;
        serde_json::from_slice(&reply.body).map_err(SyncError::from)
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn push_changeset(
        &self,
        endpoint: &EndpointConfig,
        actor_id: &str,
        items: &[ChangeSetItem],
    ) -> SyncResult<PushResponse> {
        let body = serde_json::to_vec(items)?;
        let url = endpoint.sync_url();
        self.send(|client| {
            client.post(
                &url,
                &[
                    (USER_ID_HEADER, actor_id),
                    (TENANT_ID_HEADER, endpoint.tenant_id.as_str()),
                ],
                body,
                self.timeout,
            )
        })
    }

    fn push_generic(
        &self,
        endpoint: &EndpointConfig,
        request: &GenericSyncRequest,
    ) -> SyncResult<PushResponse> {
        let body = serde_json::to_vec(request)?;
        let url = endpoint.sync_url();
        self.send(|client| {
            client.post(
                &url,
                &[(TENANT_ID_HEADER, endpoint.tenant_id.as_str())],
                body,
                self.timeout,
            )
        })
    }

    fn pull(&self, endpoint: &EndpointConfig, request: &PullRequest) -> SyncResult<PullResponse> {
        let url = format!("{}?{}", endpoint.sync_url(), request.to_query());
        self.send(|client| client.get(&url, &[], self.timeout))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

fn decode_error(reply: &HttpReply) -> SyncError {
    match serde_json::from_slice::<ErrorBody>(&reply.body) {
        Ok(body) => SyncError::Server {
            status: reply.status,
            code: body.error.code,
            message: body.error.message,
        },
        Err(_) => SyncError::Server {
            status: reply.status,
            code: "unknown".into(),
            message: String::from_utf8_lossy(&reply.body).into_owned(),
        },
    }
}

/// A request routed by [`LoopbackClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackRequest {
    /// `GET` or `POST`.
    pub method: &'static str,
    /// Path without query, e.g. `/sync`.
    pub path: String,
    /// Query string without `?`.
    pub query: String,
    /// Request headers.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Vec<u8>,
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles a request and returns the response.
    fn handle(&self, request: LoopbackRequest) -> HttpReply;
}

/// A loopback HTTP client that routes requests directly to a sync server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
    reachable: AtomicBool,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self {
            server,
            reachable: AtomicBool::new(true),
        }
    }

    /// Simulates losing or regaining the network.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    fn route(
        &self,
        method: &'static str,
        url: &str,
        headers: &[(&str, &str)],
        body: Vec<u8>,
    ) -> Result<HttpReply, String> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err("network unreachable".into());
        }
        let (path, query) = split_url(url);
        Ok(self.server.handle(LoopbackRequest {
            method,
            path: path.to_string(),
            query: query.to_string(),
            headers: headers
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            body,
        }))
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: Vec<u8>,
        _timeout: Duration,
    ) -> Result<HttpReply, String> {
        self.route("POST", url, headers, body)
    }

    fn get(&self, url: &str, headers: &[(&str, &str)], _timeout: Duration) -> Result<HttpReply, String> {
        self.route("GET", url, headers, Vec::new())
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

/// Splits an absolute or relative URL into path and query.
fn split_url(url: &str) -> (&str, &str) {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let path_and_query = if url.contains("://") {
        without_scheme
            .find('/')
            .map_or("/", |i| &without_scheme[i..])
    } else {
        without_scheme
    };
    path_and_query.split_once('?').unwrap_or((path_and_query, ""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_protocol::{PullMeta, SyncSummary};
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct TestClient {
        reply: RwLock<Option<Result<HttpReply, String>>>,
        sent: Mutex<Vec<(String, Vec<(String, String)>)>>,
        unhealthy: AtomicBool,
    }

    impl TestClient {
        fn reply_with(&self, reply: Result<HttpReply, String>) {
            *self.reply.write() = Some(reply);
        }

        fn record(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpReply, String> {
            self.sent.lock().push((
                url.to_string(),
                headers
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            ));
            self.reply
                .read()
                .clone()
                .unwrap_or_else(|| Err("No response set".into()))
        }
    }

    impl HttpClient for TestClient {
        fn post(
            &self,
            url: &str,
            headers: &[(&str, &str)],
            _body: Vec<u8>,
            _timeout: Duration,
        ) -> Result<HttpReply, String> {
            self.record(url, headers)
        }

        fn get(&self, url: &str, headers: &[(&str, &str)], _timeout: Duration) -> Result<HttpReply, String> {
            self.record(url, headers)
        }

        fn is_healthy(&self) -> bool {
            !self.unhealthy.load(Ordering::SeqCst)
        }
    }

    fn endpoint() -> EndpointConfig {
        EndpointConfig::new("https://sync.example.com", "tenant-a")
    }

    fn push_ok() -> Vec<u8> {
        serde_json::to_vec(&PushResponse {
            summary: SyncSummary {
                applied_changes: 0,
                pending_changes: 0,
                last_synced_at: "2024-05-01T12:00:00.000Z".into(),
            },
            conflicts: Vec::new(),
        })
        .unwrap()
    }

    #[test]
    fn transport_disconnect() {
        let transport = HttpTransport::new(TestClient::default());
        assert!(transport.is_connected());
        transport.close().unwrap();
        assert!(!transport.is_connected());

        let result = transport.pull(&endpoint(), &PullRequest::new("tenant-a", None));
        assert!(matches!(result, Err(SyncError::NotConnected)));
    }

    #[test]
    fn transport_unhealthy_client() {
        let client = TestClient::default();
        client.unhealthy.store(true, Ordering::SeqCst);
        let transport = HttpTransport::new(client);
        assert!(!transport.is_connected());
    }

    #[test]
    fn changeset_push_sends_identity_headers() {
        let transport = HttpTransport::new(TestClient::default());
        transport.client().reply_with(Ok(HttpReply::new(200, push_ok())));

        let response = transport
            .push_changeset(&endpoint(), "user-1", &[])
            .unwrap();
        assert!(response.is_clean());

        let sent = transport.client().sent.lock().clone();
        assert_eq!(sent[0].0, "https://sync.example.com/sync");
        assert!(sent[0].1.contains(&("X-User-ID".into(), "user-1".into())));
        assert!(sent[0].1.contains(&("X-Tenant-ID".into(), "tenant-a".into())));
    }

    #[test]
    fn pull_encodes_query() {
        let transport = HttpTransport::new(TestClient::default());
        let response = PullResponse {
            meta: PullMeta {
                server_time: "2024-05-01T12:00:00.000Z".into(),
                since: "2024-05-01T11:00:00.000Z".into(),
                chain_head: None,
            },
            data: BTreeMap::new(),
        };
        transport
            .client()
            .reply_with(Ok(HttpReply::new(200, serde_json::to_vec(&response).unwrap())));

        let request = PullRequest::new("tenant-a", Some("2024-05-01T11:00:00.000Z".into()));
        assert_eq!(transport.pull(&endpoint(), &request).unwrap(), response);

        let url = transport.client().sent.lock()[0].0.clone();
        assert_eq!(
            url,
            format!("https://sync.example.com/sync?{}", request.to_query())
        );
    }

    #[test]
    fn error_body_becomes_server_error() {
        let transport = HttpTransport::new(TestClient::default());
        let body = serde_json::to_vec(&ErrorBody::new("unknown_tenant", "unknown tenant: x")).unwrap();
        transport.client().reply_with(Ok(HttpReply::new(403, body)));

        let err = transport
            .push_changeset(&endpoint(), "user-1", &[])
            .unwrap_err();
        assert_eq!(
            err,
            SyncError::Server {
                status: 403,
                code: "unknown_tenant".into(),
                message: "unknown tenant: x".into(),
            }
        );
        assert!(!err.is_retryable());
        assert!(transport.last_error().is_some());
    }

    #[test]
    fn unreachable_is_retryable() {
        let transport = HttpTransport::new(TestClient::default());
        transport.client().reply_with(Err("connection refused".into()));
        let err = transport
            .pull(&endpoint(), &PullRequest::new("tenant-a", None))
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(transport.last_error().as_deref(), Some("connection refused"));
    }

    #[test]
    fn url_splitting() {
        assert_eq!(split_url("http://host:80/sync?a=1"), ("/sync", "a=1"));
        assert_eq!(split_url("https://host/sync"), ("/sync", ""));
        assert_eq!(split_url("https://host"), ("/", ""));
        assert_eq!(split_url("/sync?x"), ("/sync", "x"));
    }
}
