//! Hash command implementation.

use fieldsync_protocol::ChangeSetItem;
use serde::Serialize;
use std::path::Path;

/// Recomputed hashes of one item.
#[derive(Debug, Serialize)]
pub struct ItemHashes {
    /// Item id.
    pub id: String,
    /// Content hash.
    pub change_hash: String,
    /// State hash recomputed against the item's own previous hash.
    pub computed_state_hash: String,
    /// State hash the item carries.
    pub carried_state_hash: String,
    /// Whether the two state hashes agree.
    pub matches: bool,
}

/// Recomputes hashes for every item.
pub fn hash_items(items: &[ChangeSetItem], actor_id: &str) -> Vec<ItemHashes> {
    items
        .iter()
        .map(|item| {
            let computed = item.compute_state_hash(actor_id);
            ItemHashes {
                id: item.id.clone(),
                change_hash: item.compute_change_hash(actor_id),
                matches: computed == item.state_hash,
                computed_state_hash: computed,
                carried_state_hash: item.state_hash.clone(),
            }
        })
        .collect()
}

/// Runs the hash command.
pub fn run(path: &Path, actor_id: &str, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let items: Vec<ChangeSetItem> = super::read_json(path)?;
    let hashes = hash_items(&items, actor_id);

    if json {
        println!("{}", serde_json::to_string_pretty(&hashes)?);
        return Ok(());
    }

    for (index, h) in hashes.iter().enumerate() {
        let mark = if h.matches { "ok" } else { "MISMATCH" };
        println!("[{index}] {} {mark}", h.id);
        println!("    change_hash: {}", h.change_hash);
        println!("    state_hash:  {}", h.computed_state_hash);
        if !h.matches {
            println!("    carried:     {}", h.carried_state_hash);
        }
    }
    Ok(())
}
