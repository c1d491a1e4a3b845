//! Configuration for the sync engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a client sync session.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Tenant this client syncs.
    pub tenant_id: String,
    /// Actor identity used for hash computation and the `X-User-ID` header.
    pub actor_id: String,
    /// Device identifier sent on the generic path.
    pub device_id: String,
    /// Server URL used when seeding the endpoint configuration.
    pub server_url: String,
    /// Maximum number of pending changes pushed per resync.
    pub push_batch_size: usize,
    /// Request timeout.
    pub timeout: Duration,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(
        tenant_id: impl Into<String>,
        actor_id: impl Into<String>,
        server_url: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            actor_id: actor_id.into(),
            device_id: "default".into(),
            server_url: server_url.into(),
            push_batch_size: 100,
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the device identifier.
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    /// Sets the push batch size.
    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The endpoint this configuration points at.
    pub fn endpoint(&self) -> EndpointConfig {
        EndpointConfig::new(self.server_url.clone(), self.tenant_id.clone())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("", "", "")
    }
}

/// Where to sync, as persisted in the metadata store.
///
/// A missing endpoint disables sync instead of retrying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Base URL of the sync server (e.g. "https://sync.example.com").
    pub server_url: String,
    /// Tenant scope for generic pushes and pulls.
    pub tenant_id: String,
}

impl EndpointConfig {
    /// Creates an endpoint configuration.
    pub fn new(server_url: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            tenant_id: tenant_id.into(),
        }
    }

    /// URL of the sync endpoint.
    pub fn sync_url(&self) -> String {
        format!("{}/sync", self.server_url.trim_end_matches('/'))
    }
}
