//! # Fieldsync Engine
//!
//! Client side of fieldsync.
//!
//! This crate provides:
//! - A pure sync state machine ([`reduce`]) with exponential backoff
//! - A tokio driver that executes effects and serializes lifecycle events
//! - Effect execution against a transport, a live connection and local stores
//! - Pending-change recording and overlaid entity views
//! - HTTP transport abstraction
//!
//! ## Architecture
//!
//! The state machine never performs I/O. Every transition returns the next
//! [`Effect`]; an [`EffectHandler`] runs it and answers with exactly one
//! [`SyncEvent`]. The driver owns the state and feeds events back in:
//!
//! 1. `disconnected` → sleep, read the checkpoint, resync
//! 2. `upserting` → persist the pulled rows and checkpoint
//! 3. `initialize_connection` → open the live connection
//! 4. `connected` → ping every 30 seconds
//!
//! Any failure lands in `resync(n)` and retries after `n` seconds, `n`
//! doubling each time.
//!
//! ## Key Invariants
//!
//! - Local edits stay pending until the server acknowledges them
//! - A changeset always extends the last known chain head
//! - Lifecycle events never interrupt a persist or a connection open

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod driver;
mod editor;
mod effect;
mod entity;
mod error;
mod handler;
mod http;
mod state;
mod store;
mod transport;

pub use config::{EndpointConfig, SyncConfig};
pub use driver::{Lifecycle, SyncDriver, SyncHandle};
pub use editor::{EditClock, LocalEditor};
pub use effect::{EffectHandler, ScriptedHandler};
pub use entity::{Job, JobPatch, OverlaidEntity};
pub use error::{SyncError, SyncResult};
pub use handler::{ClientEffectHandler, ClientStores, LiveConnection, SimulatedConnection};
pub use http::{
    HttpClient, HttpReply, HttpTransport, LoopbackClient, LoopbackRequest, LoopbackServer,
    TENANT_ID_HEADER, USER_ID_HEADER,
};
pub use state::{
    interruptible, next_backoff, reduce, Effect, ResyncFailure, ResyncPayload, SyncEvent,
    SyncState, FAILURE_BACKOFF_SECONDS, MAX_BACKOFF_SECONDS, PING_INTERVAL_SECONDS,
};
pub use store::{
    ChangeKind, FileMetadataStore, LocalStore, MemoryLocalStore, MemoryMetadataStore,
    MemoryPendingStore, MetadataStore, PendingChangeStore, StoreChange, SyncMetadata,
};
pub use transport::{MockTransport, SyncRequest, SyncTransport};
