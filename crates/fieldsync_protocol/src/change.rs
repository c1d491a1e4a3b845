//! Pending local edits and transmittable changeset items.

use crate::canonical::canonical_json;
use crate::error::{ProtocolError, ProtocolResult};
use crate::hash::{change_hash, state_hash};
use crate::patch::{payload_to_document, PatchPayload};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Formats a timestamp as ISO-8601 UTC with millisecond precision.
///
/// This string, not the time value, is hashed, so the format is fixed.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses an ISO-8601 / RFC 3339 timestamp into UTC.
pub fn parse_timestamp(value: &str) -> ProtocolResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| ProtocolError::InvalidTimestamp {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// A local edit waiting to be pushed.
///
/// Immutable once recorded. Pending changes are read, never mutated, when a
/// changeset is built and are kept until the server acknowledges them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
    /// Change identifier.
    pub id: String,
    /// Tenant the target object belongs to.
    pub tenant_id: String,
    /// Target object identifier.
    pub object_id: String,
    /// Target object kind ("job", "customer", ...).
    pub object_name: String,
    /// Field name to patch.
    pub patch: PatchPayload,
    /// When the edit was made.
    pub created_at: DateTime<Utc>,
}

impl PendingChange {
    /// The merge-patch document for this change (updated fields only).
    pub fn document(&self) -> Value {
        payload_to_document(&self.patch)
    }
}

/// One link of a tenant's hash chain, as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSetItem {
    /// Change identifier.
    pub id: String,
    /// Tenant identifier.
    pub tenant_id: String,
    /// Target object identifier.
    pub object_id: String,
    /// Target object kind.
    pub object_name: String,
    /// JSON merge-patch fragment.
    pub changes: Value,
    /// ISO-8601 creation time, kept as a string so the hash input is byte-stable.
    pub created_at: String,
    /// `SHA256(change_hash ‖ previous_state_hash)`.
    pub state_hash: String,
    /// Head of the chain this item extends.
    pub previous_state_hash: String,
}

impl ChangeSetItem {
    /// Canonical serialization of `changes`.
    pub fn canonical_changes(&self) -> String {
        canonical_json(&self.changes)
    }

    /// Recomputes the content hash from the item's own fields.
    ///
    /// The actor is not part of the wire item; it is supplied out of band.
    pub fn compute_change_hash(&self, actor_id: &str) -> String {
        change_hash(
            &self.id,
            &self.tenant_id,
            actor_id,
            &self.created_at,
            &self.object_name,
            &self.object_id,
            &self.canonical_changes(),
        )
    }

    /// Recomputes the state hash against the item's own `previous_state_hash`.
    pub fn compute_state_hash(&self, actor_id: &str) -> String {
        state_hash(&self.compute_change_hash(actor_id), &self.previous_state_hash)
    }

    /// Returns true if `state_hash` matches the recomputed value.
    pub fn verify(&self, actor_id: &str) -> bool {
        self.compute_state_hash(actor_id) == self.state_hash
    }
}
