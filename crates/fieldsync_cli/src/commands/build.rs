//! Build command implementation.

use fieldsync_protocol::{ensure_valid_hash, ChangeSetItem, ChangesetBuilder, PendingChange};
use std::path::Path;
use tracing::info;

/// Builds a changeset from pending changes, oldest first.
pub fn build_changeset(
    mut pending: Vec<PendingChange>,
    actor_id: &str,
    head: &str,
) -> Result<Vec<ChangeSetItem>, Box<dyn std::error::Error>> {
    ensure_valid_hash(head)?;
    pending.sort_by_key(|change| change.created_at);
    Ok(ChangesetBuilder::new(actor_id).build(&pending, head))
}

/// Runs the build command.
pub fn run(
    path: &Path,
    actor_id: &str,
    head: &str,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let pending: Vec<PendingChange> = super::read_json(path)?;
    let items = build_changeset(pending, actor_id, head)?;
    let data = serde_json::to_string_pretty(&items)?;

    match output {
        Some(out) => {
            std::fs::write(out, data)?;
            info!(items = items.len(), path = %out.display(), "changeset written");
        }
        None => println!("{data}"),
    }
    if let Some(last) = items.last() {
        info!(head = %last.state_hash, "new chain head");
    }
    Ok(())
}
