//! Changeset construction and verification.

use crate::change::{format_timestamp, ChangeSetItem, PendingChange};
use crate::hash::{change_hash, state_hash};
use thiserror::Error;

/// Turns pending local edits into a linked chain of [`ChangeSetItem`]s.
///
/// The builder is deterministic and side-effect free: identical inputs
/// produce byte-identical output.
#[derive(Debug, Clone)]
pub struct ChangesetBuilder {
    actor_id: String,
}

impl ChangesetBuilder {
    /// Creates a builder that hashes on behalf of `actor_id`.
    pub fn new(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
        }
    }

    /// Returns the actor identity used in hashes.
    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    /// Builds a changeset starting from `previous_state_hash`.
    ///
    /// `pending` must be sorted ascending by `created_at`; the builder does not
    /// reorder. Each item links to the one before it, the first to
    /// `previous_state_hash`.
    pub fn build(&self, pending: &[PendingChange], previous_state_hash: &str) -> Vec<ChangeSetItem> {
        let mut head = previous_state_hash.to_string();
        let mut items = Vec::with_capacity(pending.len());

        for change in pending {
            let changes = change.document();
            let created_at = format_timestamp(change.created_at);
            let content = change_hash(
                &change.id,
                &change.tenant_id,
                &self.actor_id,
                &created_at,
                &change.object_name,
                &change.object_id,
                &crate::canonical_json(&changes),
            );
            let next = state_hash(&content, &head);

            items.push(ChangeSetItem {
                id: change.id.clone(),
                tenant_id: change.tenant_id.clone(),
                object_id: change.object_id.clone(),
                object_name: change.object_name.clone(),
                changes,
                created_at,
                state_hash: next.clone(),
                previous_state_hash: std::mem::replace(&mut head, next),
            });
        }

        items
    }
}

/// The first point where a changeset stops forming a valid chain.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainBreak {
    /// The item does not extend the current head.
    #[error("item {index} diverges: expected previous hash {expected}, got {actual}")]
    Divergence {
        /// Position in the batch.
        index: usize,
        /// Head the item should have extended.
        expected: String,
        /// `previous_state_hash` the item carries.
        actual: String,
    },

    /// The item's hash does not match its contents.
    #[error("item {index} hash mismatch: computed {computed}, carried {carried}")]
    HashMismatch {
        /// Position in the batch.
        index: usize,
        /// Recomputed state hash.
        computed: String,
        /// `state_hash` the item carries.
        carried: String,
    },
}

impl ChainBreak {
    /// Position of the offending item.
    pub fn index(&self) -> usize {
        match self {
            ChainBreak::Divergence { index, .. } | ChainBreak::HashMismatch { index, .. } => *index,
        }
    }
}

/// Walks `items` from `head` and returns the resulting head.
pub fn verify_chain(
    items: &[ChangeSetItem],
    head: &str,
    actor_id: &str,
) -> Result<String, ChainBreak> {
    let mut current = head.to_string();
    for (index, item) in items.iter().enumerate() {
        if item.previous_state_hash != current {
            return Err(ChainBreak::Divergence {
                index,
                expected: current,
                actual: item.previous_state_hash.clone(),
            });
        }
        let computed = item.compute_state_hash(actor_id);
        if computed != item.state_hash {
            return Err(ChainBreak::HashMismatch {
                index,
                computed,
                carried: item.state_hash.clone(),
            });
        }
        current = computed;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::GENESIS_HASH;
    use crate::patch::{FieldPatch, PatchPayload};
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;
    use serde_json::json;

    fn pending(id: &str, note: &str, offset_secs: i64) -> PendingChange {
        let mut patch = PatchPayload::new();
        patch.insert("status_note".into(), FieldPatch::Updated(json!(note)));
        patch.insert("status".into(), FieldPatch::NoUpdate);
        PendingChange {
            id: id.into(),
            tenant_id: "tenant-a".into(),
            object_id: "job-1".into(),
            object_name: "job".into(),
            patch,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
                + Duration::seconds(offset_secs),
        }
    }

    #[test]
    fn empty_input_builds_nothing() {
        let builder = ChangesetBuilder::new("user-1");
        assert!(builder.build(&[], GENESIS_HASH).is_empty());
        assert_eq!(verify_chain(&[], GENESIS_HASH, "user-1").unwrap(), GENESIS_HASH);
    }

    #[test]
    fn two_edits_form_a_chain() {
        let builder = ChangesetBuilder::new("user-1");
        let items = builder.build(
            &[pending("c-1", "en route", 0), pending("c-2", "arrived", 1)],
            GENESIS_HASH,
        );

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].previous_state_hash, GENESIS_HASH);
        assert_eq!(items[1].previous_state_hash, items[0].state_hash);
        assert_eq!(items[0].created_at, "2024-05-01T12:00:00.000Z");
        assert_eq!(items[1].created_at, "2024-05-01T12:00:01.000Z");
        // No-update fields are not transmitted.
        assert_eq!(items[1].changes, json!({"status_note": "arrived"}));

        let head = verify_chain(&items, GENESIS_HASH, "user-1").unwrap();
        assert_eq!(head, items[1].state_hash);
    }

    #[test]
    fn build_is_deterministic() {
        let builder = ChangesetBuilder::new("user-1");
        let input = [pending("c-1", "en route", 0), pending("c-2", "arrived", 1)];
        let first = serde_json::to_string(&builder.build(&input, GENESIS_HASH)).unwrap();
        let second = serde_json::to_string(&builder.build(&input, GENESIS_HASH)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn verify_reports_divergence() {
        let builder = ChangesetBuilder::new("user-1");
        let items = builder.build(&[pending("c-1", "a", 0)], GENESIS_HASH);

        let err = verify_chain(&items, &items[0].state_hash, "user-1").unwrap_err();
        assert!(matches!(err, ChainBreak::Divergence { index: 0, .. }));
    }

    #[test]
    fn verify_reports_tampering() {
        let builder = ChangesetBuilder::new("user-1");
        let mut items = builder.build(
            &[pending("c-1", "a", 0), pending("c-2", "b", 1)],
            GENESIS_HASH,
        );
        items[1].changes = json!({"status_note": "c"});

        let err = verify_chain(&items, GENESIS_HASH, "user-1").unwrap_err();
        assert_eq!(err.index(), 1);
        assert!(matches!(err, ChainBreak::HashMismatch { .. }));
    }

    #[test]
    fn actor_is_part_of_the_hash() {
        let input = [pending("c-1", "a", 0)];
        let a = ChangesetBuilder::new("user-1").build(&input, GENESIS_HASH);
        let b = ChangesetBuilder::new("user-2").build(&input, GENESIS_HASH);
        assert_ne!(a[0].state_hash, b[0].state_hash);
        assert!(verify_chain(&a, GENESIS_HASH, "user-2").is_err());
    }

    proptest! {
        #[test]
        fn output_is_linear(notes in proptest::collection::vec("[a-z ]{0,12}", 1..8)) {
            let input: Vec<_> = notes
                .iter()
                .enumerate()
                .map(|(i, note)| pending(&format!("c-{i}"), note, i as i64))
                .collect();
            let items = ChangesetBuilder::new("user-1").build(&input, GENESIS_HASH);

            prop_assert_eq!(items.len(), input.len());
            for i in 0..items.len() {
                let expected = if i == 0 { GENESIS_HASH.to_string() } else { items[i - 1].state_hash.clone() };
                prop_assert_eq!(&items[i].previous_state_hash, &expected);
            }
            prop_assert!(verify_chain(&items, GENESIS_HASH, "user-1").is_ok());
        }

        #[test]
        fn any_note_change_alters_state_hash(a in "[a-z]{1,8}", b in "[a-z]{1,8}") {
            prop_assume!(a != b);
            let builder = ChangesetBuilder::new("user-1");
            let left = builder.build(&[pending("c-1", &a, 0)], GENESIS_HASH);
            let right = builder.build(&[pending("c-1", &b, 0)], GENESIS_HASH);
            prop_assert_ne!(&left[0].state_hash, &right[0].state_hash);
        }
    }
}
