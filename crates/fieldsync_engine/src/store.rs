//! Local collaborators: entity store, sync metadata and pending changes.

use crate::config::EndpointConfig;
use crate::error::{SyncError, SyncResult};
use fieldsync_protocol::PendingChange;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::debug;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// What happened to a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Inserted or replaced.
    Saved,
    /// Removed.
    Deleted,
}

/// A change notification from a [`LocalStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    /// Object kind or table the record belongs to.
    pub collection: String,
    /// Record identifier.
    pub id: String,
    /// What happened.
    pub kind: ChangeKind,
}

/// Key-value store of authoritative records, keyed by collection and id.
pub trait LocalStore: Send + Sync {
    /// Reads a record.
    fn get(&self, collection: &str, id: &str) -> SyncResult<Option<Value>>;

    /// Inserts or replaces a record.
    fn save(&self, collection: &str, id: &str, value: Value) -> SyncResult<()>;

    /// Removes a record. Returns true if it existed.
    fn delete(&self, collection: &str, id: &str) -> SyncResult<bool>;

    /// All records of a collection, ordered by id.
    fn list(&self, collection: &str) -> SyncResult<Vec<(String, Value)>>;

    /// Observes every subsequent save and delete.
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

/// Sync bookkeeping: checkpoint, endpoint and last known chain head.
pub trait MetadataStore: Send + Sync {
    /// Server time of the last successful pull.
    fn checkpoint(&self) -> SyncResult<Option<String>>;

    /// Records the server time of a successful pull.
    fn set_checkpoint(&self, checkpoint: &str) -> SyncResult<()>;

    /// Where to sync. `None` means sync is not configured.
    fn endpoint(&self) -> SyncResult<Option<EndpointConfig>>;

    /// Sets where to sync.
    fn set_endpoint(&self, endpoint: &EndpointConfig) -> SyncResult<()>;

    /// Last chain head the server is known to have accepted.
    fn chain_head(&self) -> SyncResult<Option<String>>;

    /// Records the last accepted chain head.
    fn set_chain_head(&self, head: &str) -> SyncResult<()>;
}

/// Append-only queue of local edits awaiting acknowledgement.
pub trait PendingChangeStore: Send + Sync {
    /// Records a new edit.
    fn append(&self, change: PendingChange) -> SyncResult<()>;

    /// Unacknowledged edits of a tenant, ascending by creation time.
    ///
    /// Edits with equal timestamps keep their arrival order.
    fn pending(&self, tenant_id: &str) -> SyncResult<Vec<PendingChange>>;

    /// Marks edits as acknowledged by the server. Returns how many were newly
    /// acknowledged.
    fn acknowledge(&self, ids: &[String]) -> SyncResult<usize>;

    /// Drops acknowledged edits. Returns how many were removed.
    fn prune(&self) -> SyncResult<usize>;
}

/// In-memory [`LocalStore`].
pub struct MemoryLocalStore {
    records: RwLock<BTreeMap<(String, String), Value>>,
    changes: broadcast::Sender<StoreChange>,
}

impl MemoryLocalStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            records: RwLock::new(BTreeMap::new()),
            changes,
        }
    }

    /// Number of records across all collections.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn notify(&self, collection: &str, id: &str, kind: ChangeKind) {
        // No subscribers is fine.
        let _ = self.changes.send(StoreChange {
            collection: collection.to_string(),
            id: id.to_string(),
            kind,
        });
    }
}

impl Default for MemoryLocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStore for MemoryLocalStore {
    fn get(&self, collection: &str, id: &str) -> SyncResult<Option<Value>> {
        Ok(self
            .records
            .read()
            .get(&(collection.to_string(), id.to_string()))
            .cloned())
    }

    fn save(&self, collection: &str, id: &str, value: Value) -> SyncResult<()> {
        self.records
            .write()
            .insert((collection.to_string(), id.to_string()), value);
        self.notify(collection, id, ChangeKind::Saved);
        Ok(())
    }

    fn delete(&self, collection: &str, id: &str) -> SyncResult<bool> {
        let existed = self
            .records
            .write()
            .remove(&(collection.to_string(), id.to_string()))
            .is_some();
        if existed {
            self.notify(collection, id, ChangeKind::Deleted);
        }
        Ok(existed)
    }

    fn list(&self, collection: &str) -> SyncResult<Vec<(String, Value)>> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|((c, _), _)| c == collection)
            .map(|((_, id), value)| (id.clone(), value.clone()))
            .collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

/// Serialized form of the sync metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    /// Server time of the last successful pull.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
    /// Where to sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<EndpointConfig>,
    /// Last accepted chain head.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_head: Option<String>,
}

/// In-memory [`MetadataStore`].
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    inner: Mutex<SyncMetadata>,
}

impl MemoryMetadataStore {
    /// Creates empty metadata (no endpoint configured).
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates metadata with an endpoint configured.
    pub fn with_endpoint(endpoint: EndpointConfig) -> Self {
        Self {
            inner: Mutex::new(SyncMetadata {
                endpoint: Some(endpoint),
                ..SyncMetadata::default()
            }),
        }
    }

    /// A copy of the current metadata.
    pub fn snapshot(&self) -> SyncMetadata {
        self.inner.lock().clone()
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn checkpoint(&self) -> SyncResult<Option<String>> {
        Ok(self.inner.lock().checkpoint.clone())
    }

    fn set_checkpoint(&self, checkpoint: &str) -> SyncResult<()> {
        self.inner.lock().checkpoint = Some(checkpoint.to_string());
        Ok(())
    }

    fn endpoint(&self) -> SyncResult<Option<EndpointConfig>> {
        Ok(self.inner.lock().endpoint.clone())
    }

    fn set_endpoint(&self, endpoint: &EndpointConfig) -> SyncResult<()> {
        self.inner.lock().endpoint = Some(endpoint.clone());
        Ok(())
    }

    fn chain_head(&self) -> SyncResult<Option<String>> {
        Ok(self.inner.lock().chain_head.clone())
    }

    fn set_chain_head(&self, head: &str) -> SyncResult<()> {
        self.inner.lock().chain_head = Some(head.to_string());
        Ok(())
    }
}

/// [`MetadataStore`] persisted as a JSON file.
///
/// Every write replaces the file through a temporary sibling and a rename.
#[derive(Debug)]
pub struct FileMetadataStore {
    path: PathBuf,
    cached: Mutex<SyncMetadata>,
}

impl FileMetadataStore {
    /// Opens the store at `path`, starting empty if the file does not exist.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref().to_path_buf();
        let cached = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => SyncMetadata::default(),
            Err(err) => return Err(err.into()),
        };
        debug!(path = %path.display(), "metadata store opened");
        Ok(Self {
            path,
            cached: Mutex::new(cached),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(&self, f: impl FnOnce(&mut SyncMetadata)) -> SyncResult<()> {
        let mut cached = self.cached.lock();
        let mut next = cached.clone();
        f(&mut next);
        let bytes = serde_json::to_vec_pretty(&next)
            .map_err(|e| SyncError::Persistence(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        *cached = next;
        Ok(())
    }
}

impl MetadataStore for FileMetadataStore {
    fn checkpoint(&self) -> SyncResult<Option<String>> {
        Ok(self.cached.lock().checkpoint.clone())
    }

    fn set_checkpoint(&self, checkpoint: &str) -> SyncResult<()> {
        self.update(|m| m.checkpoint = Some(checkpoint.to_string()))
    }

    fn endpoint(&self) -> SyncResult<Option<EndpointConfig>> {
        Ok(self.cached.lock().endpoint.clone())
    }

    fn set_endpoint(&self, endpoint: &EndpointConfig) -> SyncResult<()> {
        self.update(|m| m.endpoint = Some(endpoint.clone()))
    }

    fn chain_head(&self) -> SyncResult<Option<String>> {
        Ok(self.cached.lock().chain_head.clone())
    }

    fn set_chain_head(&self, head: &str) -> SyncResult<()> {
        self.update(|m| m.chain_head = Some(head.to_string()))
    }
}

#[derive(Debug)]
struct QueuedChange {
    change: PendingChange,
    acknowledged: bool,
}

/// In-memory [`PendingChangeStore`].
#[derive(Debug, Default)]
pub struct MemoryPendingStore {
    queue: Mutex<Vec<QueuedChange>>,
}

impl MemoryPendingStore {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total queued edits, acknowledged or not.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl PendingChangeStore for MemoryPendingStore {
    fn append(&self, change: PendingChange) -> SyncResult<()> {
        let mut queue = self.queue.lock();
        if queue.iter().any(|q| q.change.id == change.id) {
            return Err(SyncError::Validation(format!(
                "duplicate pending change id: {}",
                change.id
            )));
        }
        queue.push(QueuedChange {
            change,
            acknowledged: false,
        });
        Ok(())
    }

    fn pending(&self, tenant_id: &str) -> SyncResult<Vec<PendingChange>> {
        let mut pending: Vec<PendingChange> = self
            .queue
            .lock()
            .iter()
            .filter(|q| !q.acknowledged && q.change.tenant_id == tenant_id)
            .map(|q| q.change.clone())
            .collect();
        pending.sort_by_key(|c| c.created_at);
        Ok(pending)
    }

    fn acknowledge(&self, ids: &[String]) -> SyncResult<usize> {
        let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut count = 0;
        for queued in self.queue.lock().iter_mut() {
            if !queued.acknowledged && ids.contains(queued.change.id.as_str()) {
                queued.acknowledged = true;
                count += 1;
            }
        }
        Ok(count)
    }

    fn prune(&self) -> SyncResult<usize> {
        let mut queue = self.queue.lock();
        let before = queue.len();
        queue.retain(|q| !q.acknowledged);
        Ok(before - queue.len())
    }
}
