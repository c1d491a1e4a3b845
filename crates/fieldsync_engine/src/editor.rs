//! Recording local edits.

use crate::entity::{Job, JobPatch, OverlaidEntity};
use crate::error::{SyncError, SyncResult};
use crate::store::{LocalStore, PendingChangeStore};
use chrono::{DateTime, Utc};
use fieldsync_protocol::{PatchPayload, PendingChange};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Source of edit timestamps.
pub type EditClock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Records field edits as pending changes and presents overlaid entities.
pub struct LocalEditor {
    tenant_id: String,
    local: Arc<dyn LocalStore>,
    pending: Arc<dyn PendingChangeStore>,
    clock: EditClock,
}

impl LocalEditor {
    /// Creates an editor for `tenant_id`.
    pub fn new(
        tenant_id: impl Into<String>,
        local: Arc<dyn LocalStore>,
        pending: Arc<dyn PendingChangeStore>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            local,
            pending,
            clock: Arc::new(Utc::now),
        }
    }

    /// Uses `clock` for edit timestamps.
    pub fn with_clock(mut self, clock: EditClock) -> Self {
        self.clock = clock;
        self
    }

    /// Records an edit to `object_name`/`object_id`.
    ///
    /// The timestamp is truncated to milliseconds, the precision it is hashed at.
    pub fn edit(
        &self,
        object_name: &str,
        object_id: &str,
        patch: PatchPayload,
    ) -> SyncResult<PendingChange> {
        if !patch.values().any(|p| p.is_updated()) {
            return Err(SyncError::Validation(format!(
                "edit to {object_name}/{object_id} updates no field"
            )));
        }
        let now = (self.clock)();
        let created_at = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
        let change = PendingChange {
            id: Uuid::new_v4().to_string(),
            tenant_id: self.tenant_id.clone(),
            object_id: object_id.to_string(),
            object_name: object_name.to_string(),
            patch,
            created_at,
        };
        self.pending.append(change.clone())?;
        debug!(change = %change.id, object_name, object_id, "local edit recorded");
        Ok(change)
    }

    /// Records a typed job edit.
    pub fn edit_job(&self, job_id: &str, patch: &JobPatch) -> SyncResult<PendingChange> {
        self.edit(Job::OBJECT_NAME, job_id, patch.to_payload())
    }

    /// The stored record of `table`/`object_id` with pending edits layered on.
    pub fn view(&self, table: &str, object_name: &str, object_id: &str) -> SyncResult<OverlaidEntity> {
        let base = self
            .local
            .get(table, object_id)?
            .unwrap_or_else(|| Value::Object(Default::default()));
        let mut entity = OverlaidEntity::new(object_name, object_id, base);
        for change in self.pending.pending(&self.tenant_id)? {
            if change.object_name == object_name && change.object_id == object_id {
                entity.overlay(change)?;
            }
        }
        Ok(entity)
    }

    /// The effective job.
    pub fn job(&self, job_id: &str) -> SyncResult<Job> {
        Job::from_entity(&self.view(Job::TABLE, Job::OBJECT_NAME, job_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryLocalStore, MemoryPendingStore};
    use chrono::{Duration, TimeZone};
    use fieldsync_protocol::FieldPatch;
    use parking_lot::Mutex;
    use serde_json::json;

    fn editor() -> (LocalEditor, Arc<MemoryLocalStore>, Arc<MemoryPendingStore>) {
        let local = Arc::new(MemoryLocalStore::new());
        let pending = Arc::new(MemoryPendingStore::new());
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
            + Duration::microseconds(1_500);
        let tick = Arc::new(Mutex::new(start));
        let clock: EditClock = Arc::new(move || {
            let mut now = tick.lock();
            let current = *now;
            *now = current + Duration::seconds(1);
            current
        });
        let editor = LocalEditor::new(
            "tenant-a",
            Arc::clone(&local) as Arc<dyn LocalStore>,
            Arc::clone(&pending) as Arc<dyn PendingChangeStore>,
        )
        .with_clock(clock);
        (editor, local, pending)
    }

    fn note(text: &str) -> JobPatch {
        JobPatch {
            status_note: FieldPatch::Updated(Some(text.into())),
            ..JobPatch::default()
        }
    }

    #[test]
    fn edits_become_pending_changes() {
        let (editor, _, pending) = editor();
        let first = editor.edit_job("job-1", &note("en route")).unwrap();
        let second = editor.edit_job("job-1", &note("arrived")).unwrap();

        assert_ne!(first.id, second.id);
        assert!(Uuid::parse_str(&first.id).is_ok());
        assert_eq!(first.created_at.timestamp_subsec_micros(), 1_000);
        assert_eq!(second.created_at - first.created_at, Duration::seconds(1));
        assert_eq!(pending.pending("tenant-a").unwrap(), vec![first, second]);
    }

    #[test]
    fn empty_edit_rejected() {
        let (editor, _, pending) = editor();
        let err = editor.edit_job("job-1", &JobPatch::default()).unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert!(pending.is_empty());
    }

    #[test]
    fn job_view_overlays_pending_edits() {
        let (editor, local, _) = editor();
        local
            .save(
                "jobs",
                "job-1",
                json!({"id": "job-1", "tenant_id": "tenant-a", "status": "scheduled", "version": 2}),
            )
            .unwrap();
        editor.edit_job("job-1", &note("en route")).unwrap();
        editor.edit_job("job-1", &note("arrived")).unwrap();
        editor.edit_job("job-2", &note("elsewhere")).unwrap();

        let job = editor.job("job-1").unwrap();
        assert_eq!(job.status, "scheduled");
        assert_eq!(job.status_note.as_deref(), Some("arrived"));
        assert_eq!(job.version, 2);

        let view = editor.view("jobs", "job", "job-1").unwrap();
        assert_eq!(view.overlays().len(), 2);
    }
}
