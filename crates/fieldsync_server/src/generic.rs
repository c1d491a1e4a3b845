//! Generic multi-entity push with per-row optimistic concurrency.
//!
//! A change is applied only if the client's version is at least the stored
//! version. Stale changes become conflicts and the rest of the batch carries on.
//! This path never touches the hash chain.

use crate::clock::Clock;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::{StoredRow, TenantArena};
use fieldsync_protocol::{
    apply_merge_patch, Conflict, ConflictReason, GenericChange, GenericSyncRequest, SyncAction,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a generic push.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericOutcome {
    /// Number of changes written.
    pub applied: usize,
    /// Changes rejected as stale.
    pub conflicts: Vec<Conflict>,
}

/// Applies versioned row changes.
pub struct VersionedApplier {
    config: ServerConfig,
    store: Arc<TenantArena>,
    clock: Arc<dyn Clock>,
}

impl VersionedApplier {
    /// Creates an applier.
    pub fn new(config: ServerConfig, store: Arc<TenantArena>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            store,
            clock,
        }
    }

    /// Applies `request` for `tenant_id`.
    ///
    /// Malformed changes reject the whole request before anything is written.
    pub fn apply(&self, tenant_id: &str, request: &GenericSyncRequest) -> ServerResult<GenericOutcome> {
        if request.changes.len() > self.config.max_push_batch {
            return Err(ServerError::BatchTooLarge {
                size: request.changes.len(),
                max: self.config.max_push_batch,
            });
        }
        let actions = request
            .changes
            .iter()
            .enumerate()
            .map(|(index, change)| self.validate(index, change))
            .collect::<ServerResult<Vec<_>>>()?;

        let outcome = self.store.transaction::<_, ServerError>(tenant_id, |txn| {
            let mut outcome = GenericOutcome {
                applied: 0,
                conflicts: Vec::new(),
            };

            for (change, action) in request.changes.iter().zip(actions) {
                let stored = txn.row(&change.table, &change.primary_key);
                let stored_version = stored.map_or(0, |row| row.version);

                if change.version < stored_version {
                    let reason = ConflictReason::StaleVersion {
                        client_version: change.version,
                        stored_version,
                    };
                    warn!(
                        tenant = tenant_id,
                        table = %change.table,
                        id = %change.primary_key,
                        client_version = change.version,
                        stored_version,
                        "stale row change"
                    );
                    outcome
                        .conflicts
                        .push(Conflict::new(&change.table, &change.primary_key, &reason));
                    continue;
                }

                if action == SyncAction::Delete && stored.is_none() {
                    debug!(
                        table = %change.table,
                        id = %change.primary_key,
                        "delete of unknown row skipped"
                    );
                    continue;
                }

                let mut data = stored
                    .map(|row| row.data.clone())
                    .unwrap_or_else(|| Value::Object(Map::new()));
                let deleted = match action {
                    SyncAction::Create | SyncAction::Update => {
                        apply_merge_patch(&mut data, &change.data);
                        false
                    }
                    SyncAction::Delete => true,
                };
                if let Value::Object(fields) = &mut data {
                    fields.insert("id".into(), Value::String(change.primary_key.clone()));
                    fields.insert("tenant_id".into(), Value::String(tenant_id.to_string()));
                }

                let version = stored_version.max(change.version) + 1;
                debug!(
                    table = %change.table,
                    id = %change.primary_key,
                    action = action.as_str(),
                    version,
                    "row change applied"
                );
                txn.put_row(
                    &change.table,
                    &change.primary_key,
                    StoredRow {
                        data,
                        version,
                        updated_at: self.clock.now(),
                        deleted,
                    },
                );
                outcome.applied += 1;
            }

            Ok(outcome)
        })?;

        info!(
            tenant = tenant_id,
            device = %request.device_id,
            applied = outcome.applied,
            conflicts = outcome.conflicts.len(),
            "generic push processed"
        );
        Ok(outcome)
    }

    fn validate(&self, index: usize, change: &GenericChange) -> ServerResult<SyncAction> {
        if self.config.kind_for_table(&change.table).is_none() {
            return Err(ServerError::UnsupportedTable(change.table.clone()));
        }
        let action = change
            .sync_action()
            .ok_or_else(|| ServerError::UnsupportedAction(change.action.clone()))?;
        if change.primary_key.is_empty() {
            return Err(ServerError::MissingField {
                index,
                field: "primaryKey",
            });
        }
        if action != SyncAction::Delete && !change.data.is_object() {
            return Err(ServerError::MissingField {
                index,
                field: "data",
            });
        }
        Ok(action)
    }
}
