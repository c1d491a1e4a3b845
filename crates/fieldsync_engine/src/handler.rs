//! Client-side effect execution.

use crate::config::{EndpointConfig, SyncConfig};
use crate::effect::EffectHandler;
use crate::error::{SyncError, SyncResult};
use crate::state::{Effect, ResyncFailure, ResyncPayload, SyncEvent};
use crate::store::{LocalStore, MetadataStore, PendingChangeStore};
use crate::transport::SyncTransport;
use fieldsync_protocol::{ChangesetBuilder, PullRequest, GENESIS_HASH};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The live-update socket.
pub trait LiveConnection: Send + Sync {
    /// Opens the connection.
    fn open(&self, endpoint: &EndpointConfig) -> impl Future<Output = SyncResult<()>> + Send;

    /// Sends a ping and waits for the answer.
    fn ping(&self) -> impl Future<Output = SyncResult<()>> + Send;

    /// Closes the connection.
    fn close(&self) -> impl Future<Output = SyncResult<()>> + Send;
}

/// An in-process [`LiveConnection`] that can be told to fail.
#[derive(Debug, Default)]
pub struct SimulatedConnection {
    open: AtomicBool,
    refuse: AtomicBool,
    drop_pings: AtomicBool,
}

impl SimulatedConnection {
    /// Creates a closed connection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `open` fail while set.
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Makes `ping` fail while set.
    pub fn set_drop_pings(&self, drop_pings: bool) {
        self.drop_pings.store(drop_pings, Ordering::SeqCst);
    }

    /// Returns true while open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl LiveConnection for SimulatedConnection {
    async fn open(&self, _endpoint: &EndpointConfig) -> SyncResult<()> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(SyncError::Connection("connection refused".into()));
        }
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&self) -> SyncResult<()> {
        if !self.is_open() {
            return Err(SyncError::NotConnected);
        }
        if self.drop_pings.load(Ordering::SeqCst) {
            return Err(SyncError::Timeout);
        }
        Ok(())
    }

    async fn close(&self) -> SyncResult<()> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Err(SyncError::NotConnected);
        }
        Ok(())
    }
}

impl<L: LiveConnection> LiveConnection for Arc<L> {
    fn open(&self, endpoint: &EndpointConfig) -> impl Future<Output = SyncResult<()>> + Send {
        (**self).open(endpoint)
    }

    fn ping(&self) -> impl Future<Output = SyncResult<()>> + Send {
        (**self).ping()
    }

    fn close(&self) -> impl Future<Output = SyncResult<()>> + Send {
        (**self).close()
    }
}

/// Local collaborators the handler reads and writes.
#[derive(Clone)]
pub struct ClientStores {
    /// Authoritative records.
    pub local: Arc<dyn LocalStore>,
    /// Checkpoint, endpoint and chain head.
    pub metadata: Arc<dyn MetadataStore>,
    /// Edits awaiting acknowledgement.
    pub pending: Arc<dyn PendingChangeStore>,
}

/// Executes effects against a transport, a live connection and local stores.
///
/// `Resync` pushes the pending changeset, built from the last known chain
/// head, then pulls since the checkpoint. Blocking transport calls run on
/// tokio's blocking pool, one resync at a time. Pending edits and the chain
/// head change only when the resync reports success.
pub struct ClientEffectHandler<T: SyncTransport, C: LiveConnection> {
    config: SyncConfig,
    transport: Arc<T>,
    connection: C,
    stores: ClientStores,
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl<T: SyncTransport + 'static, C: LiveConnection> ClientEffectHandler<T, C> {
    /// Creates a handler.
    pub fn new(config: SyncConfig, transport: Arc<T>, connection: C, stores: ClientStores) -> Self {
        Self {
            config,
            transport,
            connection,
            stores,
            gate: Arc::default(),
        }
    }

    /// The transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// The live connection.
    pub fn connection(&self) -> &C {
        &self.connection
    }

    async fn resync(&self, since: Option<String>) -> SyncEvent {
        let endpoint = match self.stores.metadata.endpoint() {
            Ok(Some(endpoint)) => endpoint,
            Ok(None) => {
                warn!("no sync endpoint configured");
                return SyncEvent::ResyncFailed(ResyncFailure::MissingConfig);
            }
            Err(err) => return SyncEvent::ResyncFailed(failure(err)),
        };

        let transport = Arc::clone(&self.transport);
        let stores = self.stores.clone();
        let config = self.config.clone();
        let gate = Arc::clone(&self.gate);
        let exchange = async move {
            // The blocking job owns the permit, so a job abandoned on timeout
            // still holds off the next resync until it returns.
            let permit = gate.lock_owned().await;
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                push_and_pull(&config, transport.as_ref(), &stores, &endpoint, since)
            })
            .await
        };

        let outcome = match tokio::time::timeout(self.config.timeout, exchange).await {
            Err(_) => Err(SyncError::Timeout),
            Ok(Err(join)) => Err(SyncError::transport_retryable(join.to_string())),
            Ok(Ok(result)) => result.and_then(|exchange| self.commit(exchange)),
        };
        match outcome {
            Ok(payload) => SyncEvent::ResyncOk(payload),
            Err(err) => {
                warn!(error = %err, "resync failed");
                SyncEvent::ResyncFailed(failure(err))
            }
        }
    }

    /// Records what the server acknowledged. Runs only once the exchange has
    /// returned to the caller that reports its outcome.
    fn commit(&self, exchange: Exchange) -> SyncResult<ResyncPayload> {
        if !exchange.acknowledged.is_empty() {
            self.stores.pending.acknowledge(&exchange.acknowledged)?;
        }
        if let Some(head) = &exchange.head {
            self.stores.metadata.set_chain_head(head)?;
        }
        Ok(exchange.payload)
    }

    fn persist(&self, payload: &ResyncPayload) -> SyncResult<usize> {
        let mut written = 0;
        for (table, rows) in &payload.pull.data {
            for row in rows {
                let Some(id) = row.get("id").and_then(Value::as_str) else {
                    warn!(table = %table, "pulled row without id skipped");
                    continue;
                };
                if row.get("deleted").and_then(Value::as_bool) == Some(true) {
                    self.stores.local.delete(table, id)?;
                } else {
                    self.stores.local.save(table, id, row.clone())?;
                }
                written += 1;
            }
        }
        self.stores
            .metadata
            .set_checkpoint(&payload.pull.meta.server_time)?;
        if let Some(head) = &payload.pull.meta.chain_head {
            self.stores.metadata.set_chain_head(head)?;
        }
        Ok(written)
    }

    async fn open_connection(&self) -> SyncResult<()> {
        let endpoint = self
            .stores
            .metadata
            .endpoint()?
            .ok_or_else(|| SyncError::Configuration("no sync endpoint configured".into()))?;
        self.connection.open(&endpoint).await
    }
}

impl<T: SyncTransport + 'static, C: LiveConnection> EffectHandler for ClientEffectHandler<T, C> {
    async fn execute(&self, effect: Effect) -> SyncEvent {
        debug!(effect = effect.name(), "executing effect");
        match effect {
            Effect::None => std::future::pending().await,
            Effect::Sleep(seconds) => {
                tokio::time::sleep(Duration::from_secs(seconds)).await;
                SyncEvent::SleepOk
            }
            Effect::ReadCheckpoint => match self.stores.metadata.checkpoint() {
                Ok(checkpoint) => SyncEvent::CheckpointRead(checkpoint),
                Err(err) => SyncEvent::CheckpointReadFailed(err.to_string()),
            },
            Effect::Resync(since) => self.resync(since).await,
            Effect::Persist(payload) => match self.persist(&payload) {
                Ok(rows) => {
                    info!(rows, checkpoint = %payload.pull.meta.server_time, "pulled rows persisted");
                    SyncEvent::PersistOk
                }
                Err(err) => {
                    warn!(error = %err, "persist failed");
                    SyncEvent::PersistFailed(err.to_string())
                }
            },
            Effect::OpenConnection => match self.open_connection().await {
                Ok(()) => SyncEvent::OpenOk,
                Err(err) => SyncEvent::OpenFailed(err.to_string()),
            },
            Effect::SendPing => match self.connection.ping().await {
                Ok(()) => SyncEvent::PingOk,
                Err(err) => SyncEvent::PingFailed(err.to_string()),
            },
            Effect::CloseConnection => match self.connection.close().await {
                Ok(()) => SyncEvent::CloseOk,
                Err(err) => SyncEvent::CloseFailed(err.to_string()),
            },
        }
    }
}

fn failure(err: SyncError) -> ResyncFailure {
    match err {
        SyncError::Configuration(_) => ResyncFailure::MissingConfig,
        SyncError::Server { code, .. } if code == UNKNOWN_TENANT => {
            warn!("tenant is not provisioned on the server");
            ResyncFailure::MissingConfig
        }
        SyncError::Server { status, code, .. } => ResyncFailure::Api(format!("{status} {code}")),
        other => ResyncFailure::Transport(other.to_string()),
    }
}

/// Server error code for a tenant it does not know.
const UNKNOWN_TENANT: &str = "unknown_tenant";

/// Outcome of one push/pull exchange, not yet recorded locally.
struct Exchange {
    payload: ResyncPayload,
    /// Pending change ids the server holds.
    acknowledged: Vec<String>,
    /// Head after the accepted push.
    head: Option<String>,
}

/// Pushes the pending changeset, then pulls.
fn push_and_pull<T: SyncTransport + ?Sized>(
    config: &SyncConfig,
    transport: &T,
    stores: &ClientStores,
    endpoint: &EndpointConfig,
    since: Option<String>,
) -> SyncResult<Exchange> {
    let mut pending = stores.pending.pending(&endpoint.tenant_id)?;
    pending.truncate(config.push_batch_size);

    let mut pushed = 0;
    let mut conflicts = Vec::new();
    let mut acknowledged = Vec::new();
    let mut new_head = None;
    if !pending.is_empty() {
        let head = stores
            .metadata
            .chain_head()?
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        let items = ChangesetBuilder::new(config.actor_id.as_str()).build(&pending, &head);
        let response = transport.push_changeset(endpoint, &config.actor_id, &items)?;

        if response.is_clean() {
            acknowledged = pending.iter().map(|c| c.id.clone()).collect();
            new_head = items.last().map(|item| item.state_hash.clone());
            pushed = response.summary.applied_changes;
            info!(pushed, head = %head, "changeset accepted");
        } else {
            acknowledged = response
                .conflicts
                .iter()
                .filter(|conflict| conflict.is_already_applied())
                .filter_map(|conflict| conflict.change_id.clone())
                .collect();
            warn!(
                conflicts = response.conflicts.len(),
                already_applied = acknowledged.len(),
                head = %head,
                "changeset not applied, keeping edits pending"
            );
            conflicts = response.conflicts;
        }
    }

    let pull = transport.pull(endpoint, &PullRequest::new(endpoint.tenant_id.clone(), since))?;
    debug!(rows = pull.row_count(), "pull complete");
    Ok(Exchange {
        payload: ResyncPayload {
            pull,
            pushed,
            conflicts,
        },
        acknowledged,
        head: new_head,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryLocalStore, MemoryMetadataStore, MemoryPendingStore};
    use crate::transport::{MockTransport, SyncRequest};
    use chrono::{TimeZone, Utc};
    use fieldsync_protocol::{
        Conflict, ConflictReason, FieldPatch, PatchPayload, PendingChange, PullMeta, PullResponse,
        PushResponse, SyncSummary,
    };
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU64, AtomicUsize};

    struct Fixture {
        handler: ClientEffectHandler<MockTransport, Arc<SimulatedConnection>>,
        transport: Arc<MockTransport>,
        connection: Arc<SimulatedConnection>,
        local: Arc<MemoryLocalStore>,
        metadata: Arc<MemoryMetadataStore>,
        pending: Arc<MemoryPendingStore>,
    }

    fn fixture(configured: bool) -> Fixture {
        let transport = Arc::new(MockTransport::new());
        let connection = Arc::new(SimulatedConnection::new());
        let local = Arc::new(MemoryLocalStore::new());
        let metadata = Arc::new(if configured {
            MemoryMetadataStore::with_endpoint(EndpointConfig::new("http://sync", "tenant-a"))
        } else {
            MemoryMetadataStore::new()
        });
        let pending = Arc::new(MemoryPendingStore::new());
        let handler = ClientEffectHandler::new(
            SyncConfig::new("tenant-a", "user-1", "http://sync"),
            Arc::clone(&transport),
            Arc::clone(&connection),
            ClientStores {
                local: local.clone(),
                metadata: metadata.clone(),
                pending: pending.clone(),
            },
        );
        Fixture {
            handler,
            transport,
            connection,
            local,
            metadata,
            pending,
        }
    }

    fn pull_response(rows: Vec<Value>, head: Option<&str>) -> PullResponse {
        let mut data = BTreeMap::new();
        data.insert("jobs".to_string(), rows);
        PullResponse {
            meta: PullMeta {
                server_time: "2024-05-01T12:10:00.000Z".into(),
                since: "1970-01-01T00:00:00.000Z".into(),
                chain_head: head.map(str::to_string),
            },
            data,
        }
    }

    fn push_response(applied: usize, conflicts: Vec<Conflict>) -> PushResponse {
        PushResponse {
            summary: SyncSummary {
                applied_changes: applied,
                pending_changes: conflicts.len(),
                last_synced_at: "2024-05-01T12:10:00.000Z".into(),
            },
            conflicts,
        }
    }

    fn edit(id: &str, minute: u32) -> PendingChange {
        let mut patch = PatchPayload::new();
        patch.insert("status_note".into(), FieldPatch::Updated(json!(id)));
        PendingChange {
            id: id.into(),
            tenant_id: "tenant-a".into(),
            object_id: "job-1".into(),
            object_name: "job".into(),
            patch,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn resync_without_endpoint_is_missing_config() {
        let f = fixture(false);
        let event = f.handler.execute(Effect::Resync(None)).await;
        assert_eq!(event, SyncEvent::ResyncFailed(ResyncFailure::MissingConfig));
        assert!(f.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn resync_pushes_then_pulls() {
        let f = fixture(true);
        f.pending.append(edit("c-1", 0)).unwrap();
        f.pending.append(edit("c-2", 1)).unwrap();
        f.transport.push_response(Ok(push_response(2, Vec::new())));
        f.transport.pull_response(Ok(pull_response(Vec::new(), None)));

        let event = f
            .handler
            .execute(Effect::Resync(Some("2024-05-01T11:00:00.000Z".into())))
            .await;
        let SyncEvent::ResyncOk(payload) = event else {
            panic!("expected resync ok, got {event:?}");
        };
        assert_eq!(payload.pushed, 2);

        let requests = f.transport.requests();
        let SyncRequest::Changeset { actor_id, items } = &requests[0] else {
            panic!("expected a changeset push first");
        };
        assert_eq!(actor_id, "user-1");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].previous_state_hash, GENESIS_HASH);
        assert_eq!(items[1].previous_state_hash, items[0].state_hash);
        assert_eq!(
            requests[1],
            SyncRequest::Pull(PullRequest::new(
                "tenant-a",
                Some("2024-05-01T11:00:00.000Z".into())
            ))
        );

        assert!(f.pending.pending("tenant-a").unwrap().is_empty());
        assert_eq!(
            f.metadata.chain_head().unwrap().as_deref(),
            Some(items[1].state_hash.as_str())
        );
    }

    #[tokio::test]
    async fn diverged_push_keeps_edits() {
        let f = fixture(true);
        f.pending.append(edit("c-1", 0)).unwrap();
        let conflict = Conflict::new(
            "job",
            "job-1",
            &ConflictReason::ChainDivergence {
                expected: "a".repeat(64),
                actual: GENESIS_HASH.into(),
            },
        );
        f.transport.push_response(Ok(push_response(0, vec![conflict])));
        f.transport
            .pull_response(Ok(pull_response(Vec::new(), Some(&"a".repeat(64)))));

        let SyncEvent::ResyncOk(payload) = f.handler.execute(Effect::Resync(None)).await else {
            panic!("expected resync ok");
        };
        assert_eq!(payload.pushed, 0);
        assert_eq!(payload.conflicts.len(), 1);
        assert_eq!(f.pending.pending("tenant-a").unwrap().len(), 1);
        assert_eq!(f.metadata.chain_head().unwrap(), None);
    }

    #[tokio::test]
    async fn transport_and_api_failures() {
        let f = fixture(true);
        f.transport.pull_response(Err(SyncError::transport_retryable("offline")));
        let event = f.handler.execute(Effect::Resync(None)).await;
        assert!(matches!(
            event,
            SyncEvent::ResyncFailed(ResyncFailure::Transport(_))
        ));

        let f = fixture(true);
        f.transport.pull_response(Err(SyncError::Server {
            status: 500,
            code: "internal_error".into(),
            message: String::new(),
        }));
        let event = f.handler.execute(Effect::Resync(None)).await;
        assert_eq!(
            event,
            SyncEvent::ResyncFailed(ResyncFailure::Api("500 internal_error".into()))
        );
    }

    #[tokio::test]
    async fn unknown_tenant_is_missing_config() {
        let f = fixture(true);
        f.transport.pull_response(Err(SyncError::Server {
            status: 403,
            code: "unknown_tenant".into(),
            message: "unknown tenant tenant-a".into(),
        }));
        let event = f.handler.execute(Effect::Resync(None)).await;
        assert_eq!(event, SyncEvent::ResyncFailed(ResyncFailure::MissingConfig));
    }

    #[tokio::test]
    async fn already_applied_items_are_acknowledged() {
        let f = fixture(true);
        f.pending.append(edit("c-1", 0)).unwrap();
        f.pending.append(edit("c-2", 1)).unwrap();
        let conflict = Conflict::new(
            "job",
            "job-1",
            &ConflictReason::AlreadyApplied {
                item_id: "c-1".into(),
            },
        )
        .with_change_id("c-1");
        f.transport.push_response(Ok(push_response(0, vec![conflict])));
        f.transport.pull_response(Ok(pull_response(Vec::new(), None)));

        let SyncEvent::ResyncOk(payload) = f.handler.execute(Effect::Resync(None)).await else {
            panic!("expected resync ok");
        };
        assert_eq!(payload.pushed, 0);
        let left: Vec<_> = f
            .pending
            .pending("tenant-a")
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(left, ["c-2"]);
        assert_eq!(f.metadata.chain_head().unwrap(), None);
    }

    /// Delays every call and tracks how many run at once.
    struct SlowTransport {
        inner: MockTransport,
        delay_ms: AtomicU64,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl SlowTransport {
        fn call<R>(&self, f: impl FnOnce(&MockTransport) -> R) -> R {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(self.delay_ms.load(Ordering::SeqCst)));
            let result = f(&self.inner);
            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    impl SyncTransport for SlowTransport {
        fn push_changeset(
            &self,
            endpoint: &EndpointConfig,
            actor_id: &str,
            items: &[fieldsync_protocol::ChangeSetItem],
        ) -> SyncResult<PushResponse> {
            self.call(|inner| inner.push_changeset(endpoint, actor_id, items))
        }

        fn push_generic(
            &self,
            endpoint: &EndpointConfig,
            request: &fieldsync_protocol::GenericSyncRequest,
        ) -> SyncResult<PushResponse> {
            self.call(|inner| inner.push_generic(endpoint, request))
        }

        fn pull(&self, endpoint: &EndpointConfig, request: &PullRequest) -> SyncResult<PullResponse> {
            self.call(|inner| inner.pull(endpoint, request))
        }

        fn is_connected(&self) -> bool {
            self.inner.is_connected()
        }

        fn close(&self) -> SyncResult<()> {
            self.inner.close()
        }
    }

    #[tokio::test]
    async fn timed_out_resyncs_commit_nothing_and_never_overlap() {
        let transport = Arc::new(SlowTransport {
            inner: MockTransport::new(),
            delay_ms: AtomicU64::new(300),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        transport.inner.push_response(Ok(push_response(1, Vec::new())));
        transport
            .inner
            .pull_response(Ok(pull_response(Vec::new(), None)));
        let metadata = Arc::new(MemoryMetadataStore::with_endpoint(EndpointConfig::new(
            "http://sync",
            "tenant-a",
        )));
        let pending = Arc::new(MemoryPendingStore::new());
        pending.append(edit("c-1", 0)).unwrap();
        let handler = ClientEffectHandler::new(
            SyncConfig::new("tenant-a", "user-1", "http://sync")
                .with_timeout(Duration::from_millis(100)),
            Arc::clone(&transport),
            SimulatedConnection::new(),
            ClientStores {
                local: Arc::new(MemoryLocalStore::new()),
                metadata: metadata.clone(),
                pending: pending.clone(),
            },
        );

        for _ in 0..2 {
            let event = handler.execute(Effect::Resync(None)).await;
            assert!(
                matches!(event, SyncEvent::ResyncFailed(ResyncFailure::Transport(_))),
                "{event:?}"
            );
        }
        // Let the abandoned exchange run to completion.
        tokio::time::sleep(Duration::from_millis(1000)).await;

        assert_eq!(transport.peak.load(Ordering::SeqCst), 1);
        assert_eq!(transport.inner.requests().len(), 2);
        assert_eq!(pending.pending("tenant-a").unwrap().len(), 1);
        assert_eq!(metadata.chain_head().unwrap(), None);

        transport.delay_ms.store(0, Ordering::SeqCst);
        let event = handler.execute(Effect::Resync(None)).await;
        assert!(matches!(event, SyncEvent::ResyncOk(_)), "{event:?}");
        assert!(pending.pending("tenant-a").unwrap().is_empty());
        assert!(metadata.chain_head().unwrap().is_some());
    }

    #[tokio::test]
    async fn persist_writes_rows_and_checkpoint() {
        let f = fixture(true);
        f.local.save("jobs", "job-9", json!({"id": "job-9"})).unwrap();
        let payload = ResyncPayload {
            pull: pull_response(
                vec![
                    json!({"id": "job-1", "status": "open", "version": 1}),
                    json!({"id": "job-9", "deleted": true, "version": 4}),
                    json!({"status": "orphan"}),
                ],
                Some(&"b".repeat(64)),
            ),
            pushed: 0,
            conflicts: Vec::new(),
        };

        assert_eq!(f.handler.execute(Effect::Persist(payload)).await, SyncEvent::PersistOk);
        assert_eq!(f.local.get("jobs", "job-1").unwrap().unwrap()["status"], "open");
        assert_eq!(f.local.get("jobs", "job-9").unwrap(), None);
        let meta = f.metadata.snapshot();
        assert_eq!(meta.checkpoint.as_deref(), Some("2024-05-01T12:10:00.000Z"));
        assert_eq!(meta.chain_head, Some("b".repeat(64)));
    }

    #[tokio::test]
    async fn checkpoint_and_connection_effects() {
        let f = fixture(true);
        assert_eq!(
            f.handler.execute(Effect::ReadCheckpoint).await,
            SyncEvent::CheckpointRead(None)
        );

        assert!(matches!(
            f.handler.execute(Effect::SendPing).await,
            SyncEvent::PingFailed(_)
        ));
        assert_eq!(f.handler.execute(Effect::OpenConnection).await, SyncEvent::OpenOk);
        assert!(f.connection.is_open());
        assert_eq!(f.handler.execute(Effect::SendPing).await, SyncEvent::PingOk);

        f.connection.set_drop_pings(true);
        assert!(matches!(
            f.handler.execute(Effect::SendPing).await,
            SyncEvent::PingFailed(_)
        ));
        assert_eq!(f.handler.execute(Effect::CloseConnection).await, SyncEvent::CloseOk);
        assert!(matches!(
            f.handler.execute(Effect::CloseConnection).await,
            SyncEvent::CloseFailed(_)
        ));
    }

    #[tokio::test]
    async fn open_without_endpoint_fails() {
        let f = fixture(false);
        assert!(matches!(
            f.handler.execute(Effect::OpenConnection).await,
            SyncEvent::OpenFailed(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_effect() {
        let f = fixture(true);
        let start = tokio::time::Instant::now();
        assert_eq!(f.handler.execute(Effect::Sleep(30)).await, SyncEvent::SleepOk);
        assert!(start.elapsed() >= Duration::from_secs(30));
    }
}
