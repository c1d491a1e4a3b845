//! Error types for the sync server.

use fieldsync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
///
/// Conflicts are not errors; they are returned in the push response.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Body did not parse into a known shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// A required header was absent.
    #[error("missing header {0}")]
    MissingHeader(&'static str),

    /// A required field was absent or empty.
    #[error("change {index} is missing {field}")]
    MissingField {
        /// Position in the batch.
        index: usize,
        /// Field name.
        field: &'static str,
    },

    /// Tenant is not registered.
    #[error("unknown tenant: {0}")]
    UnknownTenant(String),

    /// Actor is not registered for the tenant.
    #[error("unknown actor {actor} for tenant {tenant}")]
    UnknownActor {
        /// Tenant identifier.
        tenant: String,
        /// Actor identifier.
        actor: String,
    },

    /// A batch mixes tenants.
    #[error("tenant mismatch: batch is for {expected}, item {index} is for {actual}")]
    TenantMismatch {
        /// Tenant of the first item.
        expected: String,
        /// Tenant of the offending item.
        actual: String,
        /// Position in the batch.
        index: usize,
    },

    /// Batch exceeds the configured limit.
    #[error("batch too large: {size} > {max}")]
    BatchTooLarge {
        /// Items in the batch.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Generic change names a table the server does not serve.
    #[error("unsupported table: {0}")]
    UnsupportedTable(String),

    /// Generic change names an unknown action.
    #[error("unsupported action: {0}")]
    UnsupportedAction(String),

    /// Changeset item names an unknown object kind.
    #[error("unsupported object: {0}")]
    UnsupportedObject(String),

    /// Recomputed state hash differs from the carried one.
    #[error("state hash mismatch at item {index} ({item_id})")]
    StateHashMismatch {
        /// Position in the batch.
        index: usize,
        /// Item identifier.
        item_id: String,
    },

    /// No route for the request.
    #[error("not found: {0}")]
    NotFound(String),

    /// Route exists but not for this method.
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::InvalidRequest(_) => "invalid_request",
            ServerError::Decode(_) => "decode_error",
            ServerError::MissingHeader(_) => "missing_header",
            ServerError::MissingField { .. } => "missing_field",
            ServerError::UnknownTenant(_) => "unknown_tenant",
            ServerError::UnknownActor { .. } => "unknown_actor",
            ServerError::TenantMismatch { .. } => "tenant_mismatch",
            ServerError::BatchTooLarge { .. } => "batch_too_large",
            ServerError::UnsupportedTable(_) => "unsupported_table",
            ServerError::UnsupportedAction(_) => "unsupported_action",
            ServerError::UnsupportedObject(_) => "unsupported_object",
            ServerError::StateHashMismatch { .. } => "state_hash_mismatch",
            ServerError::NotFound(_) => "not_found",
            ServerError::MethodNotAllowed(_) => "method_not_allowed",
            ServerError::Internal(_) => "internal_error",
        }
    }

    /// HTTP status for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::UnknownTenant(_) | ServerError::UnknownActor { .. } => 403,
            ServerError::NotFound(_) => 404,
            ServerError::MethodNotAllowed(_) => 405,
            ServerError::BatchTooLarge { .. } => 413,
            ServerError::StateHashMismatch { .. } => 422,
            ServerError::Internal(_) => 500,
            _ => 400,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Decode(e) => ServerError::Decode(e.to_string()),
            other => ServerError::InvalidRequest(other.to_string()),
        }
    }
}
