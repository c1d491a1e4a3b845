//! Transport layer abstraction for sync operations.

use crate::config::EndpointConfig;
use crate::error::{SyncError, SyncResult};
use fieldsync_protocol::{
    ChangeSetItem, GenericSyncRequest, PullRequest, PullResponse, PushResponse,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// A sync transport handles network communication with the sync server.
///
/// This trait abstracts the network layer, allowing for different implementations
/// (HTTP, in-process loopback, mock for testing).
pub trait SyncTransport: Send + Sync {
    /// Pushes a hash-chained changeset on behalf of `actor_id`.
    fn push_changeset(
        &self,
        endpoint: &EndpointConfig,
        actor_id: &str,
        items: &[ChangeSetItem],
    ) -> SyncResult<PushResponse>;

    /// Pushes a generic versioned batch scoped to the endpoint's tenant.
    fn push_generic(
        &self,
        endpoint: &EndpointConfig,
        request: &GenericSyncRequest,
    ) -> SyncResult<PushResponse>;

    /// Pulls rows updated since a checkpoint.
    fn pull(&self, endpoint: &EndpointConfig, request: &PullRequest) -> SyncResult<PullResponse>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the transport connection.
    fn close(&self) -> SyncResult<()>;
}

/// A request recorded by [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub enum SyncRequest {
    /// Changeset push.
    Changeset {
        /// Actor header.
        actor_id: String,
        /// Pushed items.
        items: Vec<ChangeSetItem>,
    },
    /// Generic push.
    Generic(GenericSyncRequest),
    /// Pull.
    Pull(PullRequest),
}

/// A mock transport for testing.
///
/// Responses are queued per operation; the last queued response repeats once
/// the queue has a single entry left.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    push_responses: Mutex<VecDeque<SyncResult<PushResponse>>>,
    pull_responses: Mutex<VecDeque<SyncResult<PullResponse>>>,
    requests: Mutex<Vec<SyncRequest>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            push_responses: Mutex::new(VecDeque::new()),
            pull_responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queues a push outcome.
    pub fn push_response(&self, response: SyncResult<PushResponse>) {
        self.push_responses.lock().push_back(response);
    }

    /// Queues a pull outcome.
    pub fn pull_response(&self, response: SyncResult<PullResponse>) {
        self.pull_responses.lock().push_back(response);
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<SyncRequest> {
        self.requests.lock().clone()
    }

    fn next<T: Clone>(queue: &Mutex<VecDeque<SyncResult<T>>>, what: &str) -> SyncResult<T> {
        let mut queue = queue.lock();
        let response = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        response.unwrap_or_else(|| Err(SyncError::Decode(format!("no mock {what} response set"))))
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncTransport for MockTransport {
    fn push_changeset(
        &self,
        _endpoint: &EndpointConfig,
        actor_id: &str,
        items: &[ChangeSetItem],
    ) -> SyncResult<PushResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.requests.lock().push(SyncRequest::Changeset {
            actor_id: actor_id.to_string(),
            items: items.to_vec(),
        });
        Self::next(&self.push_responses, "push")
    }

    fn push_generic(
        &self,
        _endpoint: &EndpointConfig,
        request: &GenericSyncRequest,
    ) -> SyncResult<PushResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.requests
            .lock()
            .push(SyncRequest::Generic(request.clone()));
        Self::next(&self.push_responses, "push")
    }

    fn pull(&self, _endpoint: &EndpointConfig, request: &PullRequest) -> SyncResult<PullResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.requests.lock().push(SyncRequest::Pull(request.clone()));
        Self::next(&self.pull_responses, "pull")
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
