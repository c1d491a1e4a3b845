//! Domain entities with pending overlays.

use crate::error::{SyncError, SyncResult};
use fieldsync_protocol::{
    apply_merge_patch, merge_payloads, payload_to_document, FieldPatch, PatchPayload,
    PendingChange,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// An authoritative record with local edits layered on top.
///
/// Overlays are kept in creation order. Nothing is folded into the base until
/// the server acknowledges it.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlaidEntity {
    object_name: String,
    object_id: String,
    base: Value,
    overlays: Vec<PendingChange>,
}

impl OverlaidEntity {
    /// Wraps a base record. Anything but an object is replaced by `{}`.
    pub fn new(object_name: impl Into<String>, object_id: impl Into<String>, base: Value) -> Self {
        let base = if base.is_object() {
            base
        } else {
            Value::Object(Map::new())
        };
        Self {
            object_name: object_name.into(),
            object_id: object_id.into(),
            base,
            overlays: Vec::new(),
        }
    }

    /// Object kind.
    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    /// Object identifier.
    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    /// The authoritative record.
    pub fn base(&self) -> &Value {
        &self.base
    }

    /// Pending overlays, oldest first.
    pub fn overlays(&self) -> &[PendingChange] {
        &self.overlays
    }

    /// Layers a pending change on top. Changes targeting another object are
    /// rejected.
    pub fn overlay(&mut self, change: PendingChange) -> SyncResult<()> {
        if change.object_id != self.object_id || change.object_name != self.object_name {
            return Err(SyncError::Validation(format!(
                "change {} targets {}/{}, not {}/{}",
                change.id, change.object_name, change.object_id, self.object_name, self.object_id
            )));
        }
        let at = self
            .overlays
            .partition_point(|existing| existing.created_at <= change.created_at);
        self.overlays.insert(at, change);
        Ok(())
    }

    /// All overlays merged into one payload, later edits winning per field.
    pub fn merged_patch(&self) -> PatchPayload {
        self.overlays
            .iter()
            .fold(PatchPayload::new(), |merged, change| {
                merge_payloads(&merged, &change.patch)
            })
    }

    /// The base with every overlay applied.
    pub fn effective(&self) -> Value {
        let mut value = self.base.clone();
        apply_merge_patch(&mut value, &payload_to_document(&self.merged_patch()));
        value
    }

    /// Replaces the base with a newer authoritative record, keeping overlays.
    pub fn rebase(&mut self, base: Value) {
        if base.is_object() {
            self.base = base;
        }
    }

    /// Folds acknowledged overlays into the base and drops them.
    ///
    /// Returns how many overlays were folded.
    pub fn acknowledge(&mut self, ids: &[String]) -> usize {
        let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let (acked, remaining): (Vec<_>, Vec<_>) = self
            .overlays
            .drain(..)
            .partition(|change| ids.contains(change.id.as_str()));
        for change in &acked {
            apply_merge_patch(&mut self.base, &change.document());
        }
        self.overlays = remaining;
        acked.len()
    }
}

/// A field-service job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Job identifier.
    pub id: String,
    /// Owning tenant.
    #[serde(default)]
    pub tenant_id: String,
    /// Workflow status ("scheduled", "en_route", "on_site", "completed", ...).
    #[serde(default)]
    pub status: String,
    /// Free-text note shown to dispatch.
    #[serde(default)]
    pub status_note: Option<String>,
    /// Scheduled start, ISO-8601.
    #[serde(default)]
    pub scheduled_at: Option<String>,
    /// Assigned technician.
    #[serde(default)]
    pub technician_id: Option<String>,
    /// Server row version.
    #[serde(default)]
    pub version: u64,
}

impl Job {
    /// Object name used in changesets.
    pub const OBJECT_NAME: &'static str = "job";
    /// Table name used in pulls.
    pub const TABLE: &'static str = "jobs";

    /// Reads a job out of a JSON record.
    pub fn from_value(value: Value) -> SyncResult<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// The effective job of an overlaid record.
    pub fn from_entity(entity: &OverlaidEntity) -> SyncResult<Self> {
        Self::from_value(entity.effective())
    }
}

/// Typed edits to a [`Job`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobPatch {
    /// New status.
    pub status: FieldPatch<String>,
    /// New note; `Updated(None)` clears it.
    pub status_note: FieldPatch<Option<String>>,
    /// New scheduled start; `Updated(None)` unschedules.
    pub scheduled_at: FieldPatch<Option<String>>,
    /// New technician; `Updated(None)` unassigns.
    pub technician_id: FieldPatch<Option<String>>,
}

impl JobPatch {
    /// Returns true if no field is updated.
    pub fn is_empty(&self) -> bool {
        !(self.status.is_updated()
            || self.status_note.is_updated()
            || self.scheduled_at.is_updated()
            || self.technician_id.is_updated())
    }

    /// Field-by-field right-biased merge.
    pub fn merge(self, newer: JobPatch) -> JobPatch {
        JobPatch {
            status: self.status.merge(newer.status),
            status_note: self.status_note.merge(newer.status_note),
            scheduled_at: self.scheduled_at.merge(newer.scheduled_at),
            technician_id: self.technician_id.merge(newer.technician_id),
        }
    }

    /// Writes updated fields into `job`.
    pub fn apply_to(self, job: &mut Job) {
        self.status.apply_to(&mut job.status);
        self.status_note.apply_to(&mut job.status_note);
        self.scheduled_at.apply_to(&mut job.scheduled_at);
        self.technician_id.apply_to(&mut job.technician_id);
    }

    /// The untyped payload recorded in a pending change.
    pub fn to_payload(&self) -> PatchPayload {
        let optional = |patch: &FieldPatch<Option<String>>| {
            patch
                .clone()
                .map(|value| value.map_or(Value::Null, Value::String))
        };
        let mut payload = PatchPayload::new();
        payload.insert("status".into(), self.status.clone().map(Value::String));
        payload.insert("status_note".into(), optional(&self.status_note));
        payload.insert("scheduled_at".into(), optional(&self.scheduled_at));
        payload.insert("technician_id".into(), optional(&self.technician_id));
        payload
    }
}
