//! # Fieldsync Server
//!
//! Server side of fieldsync: verifies and applies pushed changes, serves pulls.
//!
//! This crate provides:
//! - Hash-chained changeset acceptance (job-scoped path)
//! - Per-row optimistic concurrency (generic multi-entity path)
//! - Pull of rows updated since a checkpoint
//! - A per-tenant arena store with serialized transactions
//!
//! # Two conflict models
//!
//! The changeset path protects a total order: a batch either extends the
//! tenant's chain head exactly, or nothing is applied. The generic path protects
//! per-row freshness: stale rows become conflicts and the rest of the batch is
//! applied. Both report conflicts with the same [`fieldsync_protocol::Conflict`]
//! type but are kept as separate code paths.
//!
//! # Protocol
//!
//! 1. `POST /sync` with a JSON array of changeset items and `X-User-ID`
//! 2. `POST /sync` with `{ deviceId, checkpoint, changes }` and `X-Tenant-ID`
//! 3. `GET /sync?tenant_id=..&since=..`

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod acceptance;
mod clock;
mod config;
mod error;
mod generic;
mod handler;
mod pull;
mod server;
mod store;

pub use acceptance::{ChainAcceptor, ChainOutcome};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EntityKind, ServerConfig};
pub use error::{ServerError, ServerResult};
pub use generic::{GenericOutcome, VersionedApplier};
pub use handler::{HandlerContext, RequestHandler};
pub use pull::PullService;
pub use server::{HttpRequest, HttpResponse, SyncServer, ACTOR_HEADER, TENANT_HEADER};
pub use store::{ChangeLogEntry, StoredRow, TenantArena, TenantIndex, Transaction};
