//! Hash-chained changeset acceptance.
//!
//! A batch is all-or-nothing. Inside one tenant transaction every item must
//! extend the current head and carry a state hash that matches its own
//! contents; any break aborts the whole batch. An item id is applied at most
//! once per tenant.

use crate::clock::Clock;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::{ChangeLogEntry, StoredRow, TenantArena, Transaction};
use fieldsync_protocol::{
    apply_merge_patch, is_valid_hash, parse_timestamp, ChangeSetItem, Conflict, ConflictReason,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of a changeset push that did not fail outright.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainOutcome {
    /// Every item was applied.
    Applied {
        /// Number of items applied.
        applied: usize,
        /// New chain head.
        head: String,
    },
    /// The batch does not extend the current head. Nothing was applied.
    Diverged {
        /// The first diverging item.
        conflict: Conflict,
        /// Server head at the time of the check.
        head: String,
    },
    /// An item id is already in the tenant's log. Nothing was applied.
    AlreadyApplied {
        /// The first repeated item, with its change id.
        conflict: Conflict,
        /// Server head at the time of the check.
        head: String,
    },
}

impl ChainOutcome {
    /// The conflict that stopped the batch, if any.
    pub fn conflict(&self) -> Option<&Conflict> {
        match self {
            ChainOutcome::Applied { .. } => None,
            ChainOutcome::Diverged { conflict, .. }
            | ChainOutcome::AlreadyApplied { conflict, .. } => Some(conflict),
        }
    }
}

enum Abort {
    Diverged { conflict: Conflict, head: String },
    Duplicate { conflict: Conflict, head: String },
    Failed(ServerError),
}

impl From<ServerError> for Abort {
    fn from(err: ServerError) -> Self {
        Abort::Failed(err)
    }
}

/// Verifies and applies hash-chained changesets.
pub struct ChainAcceptor {
    config: ServerConfig,
    store: Arc<TenantArena>,
    clock: Arc<dyn Clock>,
}

impl ChainAcceptor {
    /// Creates an acceptor.
    pub fn new(config: ServerConfig, store: Arc<TenantArena>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            store,
            clock,
        }
    }

    /// Accepts a batch pushed by `actor_id`.
    pub fn accept(&self, actor_id: &str, items: &[ChangeSetItem]) -> ServerResult<ChainOutcome> {
        let tenant_id = self.validate_shape(items)?;

        let result = self.store.transaction(tenant_id, |txn| {
            if self.config.require_registered_actors && !txn.has_actor(actor_id) {
                return Err(Abort::Failed(ServerError::UnknownActor {
                    tenant: tenant_id.to_string(),
                    actor: actor_id.to_string(),
                }));
            }
            for (index, item) in items.iter().enumerate() {
                self.apply_item(txn, actor_id, index, item)?;
            }
            Ok(txn.chain_head().to_string())
        });

        match result {
            Ok(head) => {
                info!(
                    tenant = tenant_id,
                    actor = actor_id,
                    applied = items.len(),
                    head = %head,
                    "changeset accepted"
                );
                Ok(ChainOutcome::Applied {
                    applied: items.len(),
                    head,
                })
            }
            Err(Abort::Diverged { conflict, head }) => {
                warn!(
                    tenant = tenant_id,
                    actor = actor_id,
                    entity_id = %conflict.entity_id,
                    "changeset diverges from chain head"
                );
                Ok(ChainOutcome::Diverged { conflict, head })
            }
            Err(Abort::Duplicate { conflict, head }) => {
                warn!(
                    tenant = tenant_id,
                    actor = actor_id,
                    change_id = conflict.change_id.as_deref().unwrap_or_default(),
                    "changeset repeats an accepted item"
                );
                Ok(ChainOutcome::AlreadyApplied { conflict, head })
            }
            Err(Abort::Failed(err)) => {
                warn!(tenant = tenant_id, actor = actor_id, error = %err, "changeset rejected");
                Err(err)
            }
        }
    }

    /// Checks everything that does not need the tenant lock.
    fn validate_shape<'a>(&self, items: &'a [ChangeSetItem]) -> ServerResult<&'a str> {
        let first = items
            .first()
            .ok_or_else(|| ServerError::InvalidRequest("empty changeset".into()))?;
        if items.len() > self.config.max_push_batch {
            return Err(ServerError::BatchTooLarge {
                size: items.len(),
                max: self.config.max_push_batch,
            });
        }

        for (index, item) in items.iter().enumerate() {
            if item.tenant_id != first.tenant_id {
                return Err(ServerError::TenantMismatch {
                    expected: first.tenant_id.clone(),
                    actual: item.tenant_id.clone(),
                    index,
                });
            }
            if item.id.is_empty() {
                return Err(ServerError::MissingField { index, field: "id" });
            }
            if item.object_id.is_empty() {
                return Err(ServerError::MissingField {
                    index,
                    field: "object_id",
                });
            }
            if self.config.kind_for_object(&item.object_name).is_none() {
                return Err(ServerError::UnsupportedObject(item.object_name.clone()));
            }
            if !item.changes.is_object() {
                return Err(ServerError::InvalidRequest(format!(
                    "item {index}: changes must be an object"
                )));
            }
            parse_timestamp(&item.created_at)?;
            if !is_valid_hash(&item.state_hash) || !is_valid_hash(&item.previous_state_hash) {
                return Err(ServerError::InvalidRequest(format!(
                    "item {index}: malformed hash"
                )));
            }
        }

        Ok(&first.tenant_id)
    }

    fn apply_item(
        &self,
        txn: &mut Transaction<'_>,
        actor_id: &str,
        index: usize,
        item: &ChangeSetItem,
    ) -> Result<(), Abort> {
        let head = txn.chain_head().to_string();
        if item.previous_state_hash != head {
            let reason = ConflictReason::ChainDivergence {
                expected: head.clone(),
                actual: item.previous_state_hash.clone(),
            };
            return Err(Abort::Diverged {
                conflict: Conflict::new(&item.object_name, &item.object_id, &reason),
                head,
            });
        }

        if !item.verify(actor_id) {
            return Err(Abort::Failed(ServerError::StateHashMismatch {
                index,
                item_id: item.id.clone(),
            }));
        }

        if txn.is_logged(&item.id) {
            let reason = ConflictReason::AlreadyApplied {
                item_id: item.id.clone(),
            };
            return Err(Abort::Duplicate {
                conflict: Conflict::new(&item.object_name, &item.object_id, &reason)
                    .with_change_id(&item.id),
                head,
            });
        }

        let now = self.clock.now();
        let table = self
            .config
            .kind_for_object(&item.object_name)
            .map(|kind| kind.table.clone())
            .ok_or_else(|| ServerError::UnsupportedObject(item.object_name.clone()))?;

        let (mut data, version) = match txn.row(&table, &item.object_id) {
            Some(existing) => (existing.data.clone(), existing.version),
            None => (Value::Object(Map::new()), 0),
        };
        apply_merge_patch(&mut data, &item.changes);
        if let Value::Object(fields) = &mut data {
            fields.insert("id".into(), Value::String(item.object_id.clone()));
            fields.insert("tenant_id".into(), Value::String(txn.tenant_id().to_string()));
        }

        txn.put_row(
            &table,
            &item.object_id,
            StoredRow {
                data,
                version: version + 1,
                updated_at: now,
                deleted: false,
            },
        );
        txn.append_log(ChangeLogEntry {
            item: item.clone(),
            actor_id: actor_id.to_string(),
            accepted_at: now,
        });
        txn.set_chain_head(item.state_hash.clone());
        Ok(())
    }
}
