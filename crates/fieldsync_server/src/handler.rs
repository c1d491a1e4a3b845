//! Request handlers for sync endpoints.

use crate::acceptance::{ChainAcceptor, ChainOutcome};
use crate::clock::Clock;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::generic::VersionedApplier;
use crate::pull::PullService;
use crate::store::TenantArena;
use fieldsync_protocol::{
    format_timestamp, ChangeSetItem, GenericSyncRequest, PullRequest, PullResponse, PushBody,
    PushResponse, SyncSummary,
};
use std::sync::Arc;

/// Shared state for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Tenant arena (shared across all handlers).
    pub store: Arc<TenantArena>,
    /// Server time source.
    pub clock: Arc<dyn Clock>,
}

impl HandlerContext {
    /// Creates a handler context.
    pub fn new(config: ServerConfig, store: Arc<TenantArena>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            store,
            clock,
        }
    }
}

/// Handler for sync requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
    chain: ChainAcceptor,
    generic: VersionedApplier,
    pull: PullService,
}

impl RequestHandler {
    /// Creates a request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        let chain = ChainAcceptor::new(
            context.config.clone(),
            Arc::clone(&context.store),
            Arc::clone(&context.clock),
        );
        let generic = VersionedApplier::new(
            context.config.clone(),
            Arc::clone(&context.store),
            Arc::clone(&context.clock),
        );
        let pull = PullService::new(
            context.config.clone(),
            Arc::clone(&context.store),
            Arc::clone(&context.clock),
        );
        Self {
            context,
            chain,
            generic,
            pull,
        }
    }

    /// Handles a decoded `POST /sync` body.
    pub fn handle_push(
        &self,
        actor_id: Option<&str>,
        tenant_id: Option<&str>,
        body: &PushBody,
    ) -> ServerResult<PushResponse> {
        match body {
            PushBody::Changeset(items) => {
                let actor = non_empty(actor_id).ok_or(ServerError::MissingHeader("X-User-ID"))?;
                self.handle_changeset(actor, items)
            }
            PushBody::Generic(request) => {
                let tenant =
                    non_empty(tenant_id).ok_or(ServerError::MissingHeader("X-Tenant-ID"))?;
                self.handle_generic(tenant, request)
            }
        }
    }

    /// Handles a job-scoped hash-chained changeset.
    pub fn handle_changeset(
        &self,
        actor_id: &str,
        items: &[ChangeSetItem],
    ) -> ServerResult<PushResponse> {
        let (applied, pending, conflicts) = match self.chain.accept(actor_id, items)? {
            ChainOutcome::Applied { applied, .. } => (applied, 0, Vec::new()),
            ChainOutcome::Diverged { conflict, .. }
            | ChainOutcome::AlreadyApplied { conflict, .. } => (0, items.len(), vec![conflict]),
        };
        Ok(self.push_response(applied, pending, conflicts))
    }

    /// Handles a generic versioned batch.
    pub fn handle_generic(
        &self,
        tenant_id: &str,
        request: &GenericSyncRequest,
    ) -> ServerResult<PushResponse> {
        let outcome = self.generic.apply(tenant_id, request)?;
        let pending = outcome.conflicts.len();
        Ok(self.push_response(outcome.applied, pending, outcome.conflicts))
    }

    /// Handles `GET /sync`.
    pub fn handle_pull(&self, request: &PullRequest) -> ServerResult<PullResponse> {
        self.pull.pull(request)
    }

    fn push_response(
        &self,
        applied: usize,
        pending: usize,
        conflicts: Vec<fieldsync_protocol::Conflict>,
    ) -> PushResponse {
        PushResponse {
            summary: SyncSummary {
                applied_changes: applied,
                pending_changes: pending,
                last_synced_at: format_timestamp(self.context.clock.now()),
            },
            conflicts,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
