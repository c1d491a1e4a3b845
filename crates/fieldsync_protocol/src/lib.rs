//! # Fieldsync Protocol
//!
//! Changeset types, hash chaining and wire messages for fieldsync.
//!
//! This crate provides:
//! - `change_hash` / `state_hash` for the per-tenant hash chain
//! - `canonical_json` for byte-stable hash input
//! - `FieldPatch` for per-field "no update" vs "set to value" edits
//! - `ChangesetBuilder` for turning pending edits into a linked changeset
//! - `verify_chain` for checking a changeset against a known head
//! - Push/pull wire messages and the shared `Conflict` type
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod builder;
mod canonical;
mod change;
mod conflict;
mod error;
mod hash;
mod merge_patch;
mod messages;
mod patch;

pub use builder::{verify_chain, ChainBreak, ChangesetBuilder};
pub use canonical::canonical_json;
pub use change::{format_timestamp, parse_timestamp, ChangeSetItem, PendingChange};
pub use conflict::{Conflict, ConflictReason};
pub use error::{ProtocolError, ProtocolResult};
pub use hash::{change_hash, ensure_valid_hash, is_valid_hash, state_hash, GENESIS_HASH};
pub use merge_patch::apply_merge_patch;
pub use messages::{
    ErrorBody, ErrorDetail, GenericChange, GenericSyncRequest, PullMeta, PullRequest,
    PullResponse, PushBody, PushResponse, SyncAction, SyncSummary,
};
pub use patch::{merge_payloads, payload_to_document, FieldPatch, PatchPayload};
