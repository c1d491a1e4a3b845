//! Main sync server.

use crate::clock::{Clock, SystemClock};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use crate::store::{ChangeLogEntry, StoredRow, TenantArena};
use fieldsync_protocol::{ErrorBody, PullRequest, PullResponse, PushBody, PushResponse};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error};

/// Header carrying the actor identity for changeset hashing.
pub const ACTOR_HEADER: &str = "x-user-id";
/// Header scoping a generic push to a tenant.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// A transport-agnostic HTTP request.
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    /// `GET`, `POST`, ...
    pub method: String,
    /// Path without query.
    pub path: String,
    /// Raw query string.
    pub query: String,
    /// Headers, keys lowercased.
    pub headers: BTreeMap<String, String>,
    /// Request body.
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Creates a `GET` request.
    pub fn get(path: &str, query: impl Into<String>) -> Self {
        Self {
            method: "GET".into(),
            path: path.into(),
            query: query.into(),
            ..Self::default()
        }
    }

    /// Creates a `POST` request.
    pub fn post(path: &str, body: Vec<u8>) -> Self {
        Self {
            method: "POST".into(),
            path: path.into(),
            body,
            ..Self::default()
        }
    }

    /// Adds a header.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Looks up a header case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// A transport-agnostic HTTP response with a JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// JSON body.
    pub body: Vec<u8>,
}

/// The sync server.
///
/// Handles `POST /sync` and `GET /sync` without binding to an HTTP framework.
///
/// # Example
///
/// ```
/// use fieldsync_server::{HttpRequest, ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default());
/// server.register_tenant("tenant-a");
///
/// let response = server.handle(HttpRequest::get("/sync", "tenant_id=tenant-a"));
/// assert_eq!(response.status, 200);
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl SyncServer {
    /// Creates a sync server on the system clock.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Creates a sync server with an explicit clock.
    pub fn with_clock(config: ServerConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_store(config, Arc::new(TenantArena::new()), clock)
    }

    /// Creates a sync server over an existing tenant arena.
    pub fn with_store(config: ServerConfig, store: Arc<TenantArena>, clock: Arc<dyn Clock>) -> Self {
        let context = Arc::new(HandlerContext::new(config, store, clock));
        let handler = RequestHandler::new(Arc::clone(&context));
        Self { handler, context }
    }

    /// Registers a tenant.
    pub fn register_tenant(&self, tenant_id: &str) {
        self.context.store.register_tenant(tenant_id);
    }

    /// Registers an actor for a tenant.
    pub fn register_actor(&self, tenant_id: &str, actor_id: &str) -> ServerResult<()> {
        self.context.store.register_actor(tenant_id, actor_id)
    }

    /// Routes a request.
    pub fn handle(&self, request: HttpRequest) -> HttpResponse {
        debug!(method = %request.method, path = %request.path, "request");
        let result = match (request.method.as_str(), request.path.as_str()) {
            ("POST", "/sync") => self.post_sync(&request).and_then(|r| encode(200, &r)),
            ("GET", "/sync") => self
                .handle_pull(&PullRequest::from_query(&request.query))
                .and_then(|r| encode(200, &r)),
            (_, "/sync") => Err(ServerError::MethodNotAllowed(request.method.clone())),
            (_, path) => Err(ServerError::NotFound(path.to_string())),
        };
        result.unwrap_or_else(|err| error_response(&err))
    }

    fn post_sync(&self, request: &HttpRequest) -> ServerResult<PushResponse> {
        let body = PushBody::decode(&request.body)?;
        self.handler.handle_push(
            request.header(ACTOR_HEADER),
            request.header(TENANT_HEADER),
            &body,
        )
    }

    /// Handles a decoded push.
    pub fn handle_push(
        &self,
        actor_id: Option<&str>,
        tenant_id: Option<&str>,
        body: &PushBody,
    ) -> ServerResult<PushResponse> {
        self.handler.handle_push(actor_id, tenant_id, body)
    }

    /// Handles a pull.
    pub fn handle_pull(&self, request: &PullRequest) -> ServerResult<PullResponse> {
        self.handler.handle_pull(request)
    }

    /// Current chain head of a tenant.
    pub fn chain_head(&self, tenant_id: &str) -> ServerResult<String> {
        self.context.store.chain_head(tenant_id)
    }

    /// Accepted changeset log of a tenant.
    pub fn change_log(&self, tenant_id: &str) -> ServerResult<Vec<ChangeLogEntry>> {
        self.context.store.log(tenant_id)
    }

    /// A stored row.
    pub fn row(&self, tenant_id: &str, table: &str, id: &str) -> ServerResult<Option<StoredRow>> {
        self.context.store.row(tenant_id, table, id)
    }
}

fn encode<T: serde::Serialize>(status: u16, value: &T) -> ServerResult<HttpResponse> {
    let body = serde_json::to_vec(value).map_err(|e| ServerError::Internal(e.to_string()))?;
    Ok(HttpResponse { status, body })
}

fn error_response(err: &ServerError) -> HttpResponse {
    if err.is_server_error() {
        error!(error = %err, "request failed");
    } else {
        debug!(error = %err, code = err.code(), "request rejected");
    }
    let body = serde_json::to_vec(&ErrorBody::new(err.code(), err.to_string()))
        .unwrap_or_else(|_| br#"{"error":{"code":"internal_error","message":""}}"#.to_vec());
    HttpResponse {
        status: err.status_code(),
        body,
    }
}
