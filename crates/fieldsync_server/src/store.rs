//! Per-tenant server state.
//!
//! Tenants live in an append-only arena. Each slot owns one authoritative
//! chain head, the hash-chained change log and the entity tables, all behind
//! a single mutex. Every batch runs as a [`Transaction`] against a locked slot,
//! so the head read-compare-advance for one tenant is serialized while other
//! tenants proceed in parallel.

use crate::error::{ServerError, ServerResult};
use chrono::{DateTime, Utc};
use fieldsync_protocol::{ChangeSetItem, GENESIS_HASH};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// A stored entity row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    /// Row fields.
    pub data: Value,
    /// Bumped on every accepted write.
    pub version: u64,
    /// Server time of the last write.
    pub updated_at: DateTime<Utc>,
    /// Tombstone flag set by deletes.
    pub deleted: bool,
}

/// An accepted changeset item in the tenant's append-only log.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeLogEntry {
    /// The item as received.
    pub item: ChangeSetItem,
    /// Actor the hash was verified against.
    pub actor_id: String,
    /// Server time of acceptance.
    pub accepted_at: DateTime<Utc>,
}

/// Position of a tenant in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TenantIndex(usize);

#[derive(Debug)]
pub(crate) struct TenantState {
    chain_head: String,
    log: Vec<ChangeLogEntry>,
    logged_ids: HashSet<String>,
    tables: BTreeMap<String, BTreeMap<String, StoredRow>>,
    actors: HashSet<String>,
}

impl TenantState {
    fn new() -> Self {
        Self {
            chain_head: GENESIS_HASH.to_string(),
            log: Vec::new(),
            logged_ids: HashSet::new(),
            tables: BTreeMap::new(),
            actors: HashSet::new(),
        }
    }

    pub(crate) fn chain_head(&self) -> &str {
        &self.chain_head
    }

    pub(crate) fn rows(&self, table: &str) -> impl Iterator<Item = (&String, &StoredRow)> {
        self.tables.get(table).into_iter().flat_map(|rows| rows.iter())
    }

    fn commit(&mut self, staged: Staged) {
        if let Some(head) = staged.chain_head {
            self.chain_head = head;
        }
        self.logged_ids
            .extend(staged.log.iter().map(|entry| entry.item.id.clone()));
        self.log.extend(staged.log);
        for ((table, id), row) in staged.rows {
            self.tables.entry(table).or_default().insert(id, row);
        }
    }
}

#[derive(Debug)]
struct TenantSlot {
    tenant_id: String,
    state: Mutex<TenantState>,
}

#[derive(Debug, Default)]
struct Staged {
    chain_head: Option<String>,
    log: Vec<ChangeLogEntry>,
    rows: BTreeMap<(String, String), StoredRow>,
}

/// Writes staged against a locked tenant. Dropped without effect on failure.
pub struct Transaction<'a> {
    tenant_id: &'a str,
    base: &'a TenantState,
    staged: Staged,
}

impl<'a> Transaction<'a> {
    /// Tenant this transaction is scoped to.
    pub fn tenant_id(&self) -> &str {
        self.tenant_id
    }

    /// Current chain head, including staged advances.
    pub fn chain_head(&self) -> &str {
        self.staged
            .chain_head
            .as_deref()
            .unwrap_or(&self.base.chain_head)
    }

    /// Stages a new chain head.
    pub fn set_chain_head(&mut self, head: String) {
        self.staged.chain_head = Some(head);
    }

    /// Stages a log append.
    pub fn append_log(&mut self, entry: ChangeLogEntry) {
        self.staged.log.push(entry);
    }

    /// Returns true if an item with this id is logged or staged.
    pub fn is_logged(&self, item_id: &str) -> bool {
        self.base.logged_ids.contains(item_id)
            || self.staged.log.iter().any(|entry| entry.item.id == item_id)
    }

    /// Returns true if `actor_id` is registered for the tenant.
    pub fn has_actor(&self, actor_id: &str) -> bool {
        self.base.actors.contains(actor_id)
    }

    /// Reads a row, staged writes first.
    pub fn row(&self, table: &str, id: &str) -> Option<&StoredRow> {
        self.staged
            .rows
            .get(&(table.to_string(), id.to_string()))
            .or_else(|| self.base.tables.get(table).and_then(|rows| rows.get(id)))
    }

    /// Stages a row write.
    pub fn put_row(&mut self, table: &str, id: &str, row: StoredRow) {
        self.staged
            .rows
            .insert((table.to_string(), id.to_string()), row);
    }
}

/// Arena of tenant slots.
#[derive(Debug, Default)]
pub struct TenantArena {
    index: RwLock<HashMap<String, TenantIndex>>,
    slots: RwLock<Vec<Arc<TenantSlot>>>,
}

impl TenantArena {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tenant; returns the existing index if already present.
    pub fn register_tenant(&self, tenant_id: &str) -> TenantIndex {
        let mut index = self.index.write();
        if let Some(existing) = index.get(tenant_id) {
            return *existing;
        }
        let mut slots = self.slots.write();
        let idx = TenantIndex(slots.len());
        slots.push(Arc::new(TenantSlot {
            tenant_id: tenant_id.to_string(),
            state: Mutex::new(TenantState::new()),
        }));
        index.insert(tenant_id.to_string(), idx);
        idx
    }

    /// Registers an actor for a tenant.
    pub fn register_actor(&self, tenant_id: &str, actor_id: &str) -> ServerResult<()> {
        let slot = self.slot(tenant_id)?;
        slot.state.lock().actors.insert(actor_id.to_string());
        Ok(())
    }

    /// Looks up a tenant's index.
    pub fn lookup(&self, tenant_id: &str) -> Option<TenantIndex> {
        self.index.read().get(tenant_id).copied()
    }

    /// Number of registered tenants.
    pub fn tenant_count(&self) -> usize {
        self.slots.read().len()
    }

    fn slot(&self, tenant_id: &str) -> ServerResult<Arc<TenantSlot>> {
        let idx = self
            .lookup(tenant_id)
            .ok_or_else(|| ServerError::UnknownTenant(tenant_id.to_string()))?;
        self.slots
            .read()
            .get(idx.0)
            .cloned()
            .ok_or_else(|| ServerError::Internal(format!("tenant slot {} missing", idx.0)))
    }

    /// Runs `f` inside a transaction on the tenant's slot.
    ///
    /// The slot stays locked for the whole call. Staged writes are committed
    /// only if `f` returns `Ok`.
    pub fn transaction<R, E>(
        &self,
        tenant_id: &str,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<ServerError>,
    {
        let slot = self.slot(tenant_id)?;
        let mut state = slot.state.lock();

        let (result, staged) = {
            let mut txn = Transaction {
                tenant_id: &slot.tenant_id,
                base: &state,
                staged: Staged::default(),
            };
            let result = f(&mut txn);
            (result, txn.staged)
        };

        if result.is_ok() {
            state.commit(staged);
        }
        result
    }

    /// Runs `f` against a consistent read of the tenant.
    pub(crate) fn read<R>(
        &self,
        tenant_id: &str,
        f: impl FnOnce(&TenantState) -> R,
    ) -> ServerResult<R> {
        let slot = self.slot(tenant_id)?;
        let state = slot.state.lock();
        Ok(f(&state))
    }

    /// The tenant's current chain head.
    pub fn chain_head(&self, tenant_id: &str) -> ServerResult<String> {
        self.read(tenant_id, |state| state.chain_head.clone())
    }

    /// A copy of the tenant's change log.
    pub fn log(&self, tenant_id: &str) -> ServerResult<Vec<ChangeLogEntry>> {
        self.read(tenant_id, |state| state.log.clone())
    }

    /// A copy of one row.
    pub fn row(&self, tenant_id: &str, table: &str, id: &str) -> ServerResult<Option<StoredRow>> {
        self.read(tenant_id, |state| {
            state.tables.get(table).and_then(|rows| rows.get(id)).cloned()
        })
    }
}
