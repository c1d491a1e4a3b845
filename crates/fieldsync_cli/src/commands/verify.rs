//! Verify command implementation.

use fieldsync_protocol::{ensure_valid_hash, verify_chain, ChainBreak, ChangeSetItem};
use serde::Serialize;
use std::path::Path;

/// Verification result.
#[derive(Debug, Serialize)]
pub struct VerifyResult {
    /// Number of items in the changeset.
    pub items: usize,
    /// Items that verified before the first break.
    pub valid_items: usize,
    /// Head after the last valid item.
    pub head: String,
    /// First break, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Walks `items` from `head`.
pub fn verify_items(items: &[ChangeSetItem], head: &str, actor_id: &str) -> VerifyResult {
    match verify_chain(items, head, actor_id) {
        Ok(head) => VerifyResult {
            items: items.len(),
            valid_items: items.len(),
            head,
            error: None,
        },
        Err(err) => {
            let index = err.index();
            let head = match (&err, index) {
                (ChainBreak::Divergence { expected, .. }, _) => expected.clone(),
                (ChainBreak::HashMismatch { .. }, 0) => head.to_string(),
                (ChainBreak::HashMismatch { .. }, i) => items[i - 1].state_hash.clone(),
            };
            VerifyResult {
                items: items.len(),
                valid_items: index,
                head,
                error: Some(err.to_string()),
            }
        }
    }
}

/// Runs the verify command.
pub fn run(
    path: &Path,
    actor_id: &str,
    head: &str,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    ensure_valid_hash(head)?;
    let items: Vec<ChangeSetItem> = super::read_json(path)?;
    let result = verify_items(&items, head, actor_id);

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("Verifying {} item(s) from {}", result.items, head);
        println!("  Valid items: {}", result.valid_items);
        println!("  Head:        {}", result.head);
        if let Some(error) = &result.error {
            println!("  Error:       {error}");
        }
        println!();
    }

    if result.is_ok() {
        if !json {
            println!("✓ Changeset verification passed");
        }
        Ok(())
    } else {
        if !json {
            println!("✗ Changeset verification failed");
        }
        Err("Verification failed".into())
    }
}
