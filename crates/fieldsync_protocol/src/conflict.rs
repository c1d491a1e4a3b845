//! Conflict results shared by both acceptance paths.
//!
//! A conflict is an outcome, not an error: it is reported back to the client
//! so it can re-pull, overwrite, or ask the user.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a change was not applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    /// Per-row optimistic concurrency: the client edited an older version.
    StaleVersion {
        /// Version the client based its change on.
        client_version: u64,
        /// Version currently stored.
        stored_version: u64,
    },
    /// Hash chain: the batch does not extend the tenant's current head.
    ChainDivergence {
        /// Current server head.
        expected: String,
        /// `previous_state_hash` carried by the item.
        actual: String,
    },
    /// Hash chain: an item with this id is already in the tenant's log.
    AlreadyApplied {
        /// The logged item id.
        item_id: String,
    },
}

impl ConflictReason {
    /// Machine-readable code, used as the prefix of the wire `reason`.
    pub fn code(&self) -> &'static str {
        match self {
            ConflictReason::StaleVersion { .. } => "stale_version",
            ConflictReason::ChainDivergence { .. } => "chain_divergence",
            ConflictReason::AlreadyApplied { .. } => "already_applied",
        }
    }
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::StaleVersion {
                client_version,
                stored_version,
            } => write!(
                f,
                "{}: client version {} is older than stored version {}",
                self.code(),
                client_version,
                stored_version
            ),
            ConflictReason::ChainDivergence { expected, actual } => write!(
                f,
                "{}: expected previous hash {}, got {}",
                self.code(),
                expected,
                actual
            ),
            ConflictReason::AlreadyApplied { item_id } => {
                write!(f, "{}: item {} was accepted earlier", self.code(), item_id)
            }
        }
    }
}

/// A conflict as reported on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    /// Entity kind or table.
    pub entity: String,
    /// Entity identifier.
    pub entity_id: String,
    /// `"<code>: <detail>"`.
    pub reason: String,
    /// Changeset item the conflict refers to, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_id: Option<String>,
}

impl Conflict {
    /// Creates a conflict from a structured reason.
    pub fn new(
        entity: impl Into<String>,
        entity_id: impl Into<String>,
        reason: &ConflictReason,
    ) -> Self {
        Self {
            entity: entity.into(),
            entity_id: entity_id.into(),
            reason: reason.to_string(),
            change_id: None,
        }
    }

    /// Attaches the changeset item id.
    pub fn with_change_id(mut self, change_id: impl Into<String>) -> Self {
        self.change_id = Some(change_id.into());
        self
    }

    /// The code part of `reason`.
    pub fn code(&self) -> &str {
        self.reason
            .split_once(':')
            .map(|(code, _)| code)
            .unwrap_or(&self.reason)
    }

    /// Returns true for a per-row version conflict.
    pub fn is_stale_version(&self) -> bool {
        self.code() == "stale_version"
    }

    /// Returns true for a hash-chain divergence.
    pub fn is_chain_divergence(&self) -> bool {
        self.code() == "chain_divergence"
    }

    /// Returns true when the server already holds the item.
    pub fn is_already_applied(&self) -> bool {
        self.code() == "already_applied"
    }
}
