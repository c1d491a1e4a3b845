//! Wire messages for `POST /sync` and `GET /sync`.

use crate::change::ChangeSetItem;
use crate::conflict::Conflict;
use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Body of `POST /sync`.
///
/// A JSON array is the job-scoped hash-chained path; an object is the generic
/// multi-entity path.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PushBody {
    /// Ordered hash-chained changeset.
    Changeset(Vec<ChangeSetItem>),
    /// Versioned row changes.
    Generic(GenericSyncRequest),
}

impl PushBody {
    /// Decodes a request body, choosing the path by its top-level shape.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        match value {
            Value::Array(_) => Ok(PushBody::Changeset(serde_json::from_value(value)?)),
            Value::Object(_) => Ok(PushBody::Generic(serde_json::from_value(value)?)),
            other => Err(ProtocolError::Decode(serde::de::Error::custom(format!(
                "expected array or object, found {}",
                json_kind(&other)
            )))),
        }
    }

    /// Encodes to JSON bytes.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Generic multi-entity push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericSyncRequest {
    /// Pushing device.
    pub device_id: String,
    /// Client's last pull checkpoint.
    #[serde(default)]
    pub checkpoint: Option<String>,
    /// Row changes, applied in order.
    pub changes: Vec<GenericChange>,
}

/// One versioned row change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericChange {
    /// Target table.
    pub table: String,
    /// `create`, `update` or `delete`.
    pub action: String,
    /// Row fields (merge-patch fragment for updates).
    #[serde(default)]
    pub data: Value,
    /// Row identifier.
    #[serde(default)]
    pub primary_key: String,
    /// Version the client last saw.
    pub version: u64,
}

impl GenericChange {
    /// Parses `action`.
    pub fn sync_action(&self) -> Option<SyncAction> {
        SyncAction::parse(&self.action)
    }
}

/// Generic path actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// Insert a row (merged if it already exists).
    Create,
    /// Merge into an existing row (inserted if absent).
    Update,
    /// Tombstone a row.
    Delete,
}

impl SyncAction {
    /// Parses the wire name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(SyncAction::Create),
            "update" => Some(SyncAction::Update),
            "delete" => Some(SyncAction::Delete),
            _ => None,
        }
    }

    /// The wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Create => "create",
            SyncAction::Update => "update",
            SyncAction::Delete => "delete",
        }
    }
}

/// Response to `POST /sync`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushResponse {
    /// Counts and time.
    pub summary: SyncSummary,
    /// Changes that were not applied.
    pub conflicts: Vec<Conflict>,
}

impl PushResponse {
    /// Returns true if nothing conflicted.
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Summary block of a push response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    /// Changes written.
    pub applied_changes: usize,
    /// Changes left for the client to resolve.
    pub pending_changes: usize,
    /// Server time of this push.
    pub last_synced_at: String,
}

/// Query for `GET /sync`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PullRequest {
    /// Tenant to pull.
    pub tenant_id: String,
    /// Only rows updated strictly after this time. Defaults to the epoch.
    pub since: Option<String>,
}

impl PullRequest {
    /// Creates a pull request.
    pub fn new(tenant_id: impl Into<String>, since: Option<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            since,
        }
    }

    /// Encodes as a URL query string (without the leading `?`).
    pub fn to_query(&self) -> String {
        let mut query = format!("tenant_id={}", percent_encode(&self.tenant_id));
        if let Some(since) = &self.since {
            query.push_str("&since=");
            query.push_str(&percent_encode(since));
        }
        query
    }

    /// Parses a URL query string. Unknown parameters are ignored.
    pub fn from_query(query: &str) -> Self {
        let mut request = PullRequest::default();
        for pair in query.trim_start_matches('?').split('&') {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "tenant_id" => request.tenant_id = percent_decode(value),
                "since" if !value.is_empty() => request.since = Some(percent_decode(value)),
                _ => {}
            }
        }
        request
    }
}

fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => match (hex_digit(bytes[i + 1]), hex_digit(bytes[i + 2])) {
                (Some(hi), Some(lo)) => {
                    out.push((hi << 4) | lo);
                    i += 3;
                    continue;
                }
                _ => out.push(b'%'),
            },
            b'+' => out.push(b' '),
            other => out.push(other),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_digit(byte: u8) -> Option<u8> {
    (byte as char).to_digit(16).map(|d| d as u8)
}

/// Response to `GET /sync`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    /// Timing information.
    pub meta: PullMeta,
    /// Table name to rows updated after `since`.
    pub data: BTreeMap<String, Vec<Value>>,
}

impl PullResponse {
    /// Total number of rows across all tables.
    pub fn row_count(&self) -> usize {
        self.data.values().map(Vec::len).sum()
    }
}

/// Meta block of a pull response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullMeta {
    /// Server time the snapshot was taken; the client's next checkpoint.
    pub server_time: String,
    /// Effective lower bound used for filtering.
    pub since: String,
    /// Tenant's current hash-chain head.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_head: Option<String>,
}

/// Error response body for 4xx/5xx replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// The error.
    pub error: ErrorDetail,
}

/// Machine-readable error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Stable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ErrorBody {
    /// Creates an error body.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}
