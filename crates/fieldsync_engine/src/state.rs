//! Sync lifecycle state machine.
//!
//! [`reduce`] is a pure, total function over `(state, event)`. It performs no
//! I/O; every side effect is described by the returned [`Effect`] and executed
//! elsewhere (see [`crate::EffectHandler`] and [`crate::SyncDriver`]). The
//! result of executing an effect comes back as exactly one [`SyncEvent`].

use fieldsync_protocol::{Conflict, PullResponse};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Backoff after a persist, connection or ping failure.
pub const FAILURE_BACKOFF_SECONDS: u64 = 5;

/// Interval between pings on a live connection.
pub const PING_INTERVAL_SECONDS: u64 = 30;

/// Upper bound on the doubling resync backoff.
pub const MAX_BACKOFF_SECONDS: u64 = 3600;

/// The current state of a client sync session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncState {
    /// Not syncing yet.
    Disconnected {
        /// Why the session is disconnected.
        reason: String,
    },
    /// Pushing local changes and pulling since the checkpoint, then waiting
    /// `wait_seconds` before retrying on failure.
    Resync {
        /// Current backoff.
        wait_seconds: u64,
    },
    /// Writing pulled rows into the local store.
    Upserting,
    /// Opening the live-update connection.
    InitializeConnection,
    /// Live-update connection established.
    Connected,
    /// Sync is off until the next foreground.
    Disabled,
}

impl SyncState {
    /// The state of a fresh session.
    pub fn initial() -> Self {
        SyncState::Disconnected {
            reason: "not started".into(),
        }
    }

    /// The resync backoff, if resyncing.
    pub fn wait_seconds(&self) -> Option<u64> {
        match self {
            SyncState::Resync { wait_seconds } => Some(*wait_seconds),
            _ => None,
        }
    }

    /// Returns true if the session is connected for live updates.
    pub fn is_connected(&self) -> bool {
        matches!(self, SyncState::Connected)
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::initial()
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Disconnected { reason } => write!(f, "disconnected({reason})"),
            SyncState::Resync { wait_seconds } => write!(f, "resync({wait_seconds})"),
            SyncState::Upserting => f.write_str("upserting"),
            SyncState::InitializeConnection => f.write_str("initialize_connection"),
            SyncState::Connected => f.write_str("connected"),
            SyncState::Disabled => f.write_str("disabled"),
        }
    }
}

/// Why a resync attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ResyncFailure {
    /// No endpoint is configured. Terminal until reconfigured.
    MissingConfig,
    /// The server could not be reached, or a local read failed on the way.
    Transport(String),
    /// The server answered with an error.
    Api(String),
}

impl ResyncFailure {
    /// Returns true if retrying could succeed without reconfiguration.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ResyncFailure::MissingConfig)
    }
}

/// What a successful resync brought back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResyncPayload {
    /// Rows pulled since the checkpoint.
    pub pull: PullResponse,
    /// Pending changes the server applied during this resync.
    pub pushed: usize,
    /// Conflicts reported for the push.
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
}

/// An input to the state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SyncEvent {
    /// The app moved to the foreground.
    Foreground,
    /// The app moved to the background.
    Background,
    /// A sleep finished.
    SleepOk,
    /// The last-sync checkpoint was read (absent on first sync).
    CheckpointRead(Option<String>),
    /// The checkpoint could not be read.
    CheckpointReadFailed(String),
    /// Push and pull succeeded.
    ResyncOk(ResyncPayload),
    /// Push or pull failed.
    ResyncFailed(ResyncFailure),
    /// Pulled rows were persisted.
    PersistOk,
    /// Persisting pulled rows failed.
    PersistFailed(String),
    /// The live connection opened.
    OpenOk,
    /// The live connection could not be opened.
    OpenFailed(String),
    /// A ping was answered.
    PingOk,
    /// A ping failed.
    PingFailed(String),
    /// The live connection closed.
    CloseOk,
    /// Closing the live connection failed.
    CloseFailed(String),
}

impl SyncEvent {
    /// Returns true for foreground/background, which may arrive at any time.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, SyncEvent::Foreground | SyncEvent::Background)
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            SyncEvent::Foreground => "foreground",
            SyncEvent::Background => "background",
            SyncEvent::SleepOk => "sleep_ok",
            SyncEvent::CheckpointRead(_) => "checkpoint_read",
            SyncEvent::CheckpointReadFailed(_) => "checkpoint_read_failed",
            SyncEvent::ResyncOk(_) => "resync_ok",
            SyncEvent::ResyncFailed(_) => "resync_failed",
            SyncEvent::PersistOk => "persist_ok",
            SyncEvent::PersistFailed(_) => "persist_failed",
            SyncEvent::OpenOk => "open_ok",
            SyncEvent::OpenFailed(_) => "open_failed",
            SyncEvent::PingOk => "ping_ok",
            SyncEvent::PingFailed(_) => "ping_failed",
            SyncEvent::CloseOk => "close_ok",
            SyncEvent::CloseFailed(_) => "close_failed",
        }
    }
}

/// A side effect requested by the state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "effect", content = "data", rename_all = "snake_case")]
pub enum Effect {
    /// Nothing to do; wait for the next lifecycle event.
    None,
    /// Sleep for the given number of seconds.
    Sleep(u64),
    /// Read the last-sync checkpoint.
    ReadCheckpoint,
    /// Push pending changes, then pull everything updated since the checkpoint.
    Resync(Option<String>),
    /// Write pulled rows into the local store and advance the checkpoint.
    Persist(ResyncPayload),
    /// Open the live-update connection.
    OpenConnection,
    /// Ping the live connection.
    SendPing,
    /// Close the live connection.
    CloseConnection,
}

impl Effect {
    /// Returns true for [`Effect::None`].
    pub fn is_none(&self) -> bool {
        matches!(self, Effect::None)
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Effect::None => "none",
            Effect::Sleep(_) => "sleep",
            Effect::ReadCheckpoint => "read_checkpoint",
            Effect::Resync(_) => "resync",
            Effect::Persist(_) => "persist",
            Effect::OpenConnection => "open_connection",
            Effect::SendPing => "send_ping",
            Effect::CloseConnection => "close_connection",
        }
    }
}

/// Computes the next state and effect.
///
/// Any `(state, event)` pair without an explicit transition disables sync.
pub fn reduce(state: &SyncState, event: SyncEvent) -> (SyncState, Effect) {
    use SyncEvent as E;
    use SyncState as S;

    match (state, event) {
        (_, E::Foreground) => (S::Resync { wait_seconds: 0 }, Effect::Sleep(0)),
        (_, E::Background) => (S::Disabled, Effect::None),

        (S::Resync { wait_seconds }, E::SleepOk) => (resync(*wait_seconds), Effect::ReadCheckpoint),
        (S::Resync { wait_seconds }, E::CheckpointRead(since)) => {
            (resync(*wait_seconds), Effect::Resync(since))
        }
        (S::Resync { wait_seconds }, E::CheckpointReadFailed(_)) => {
            (resync(*wait_seconds), Effect::Resync(None))
        }
        (S::Resync { .. }, E::ResyncOk(payload)) => (S::Upserting, Effect::Persist(payload)),
        (S::Resync { .. }, E::ResyncFailed(ResyncFailure::MissingConfig)) => {
            (S::Disabled, Effect::None)
        }
        (S::Resync { wait_seconds }, E::ResyncFailed(_)) => {
            let next = next_backoff(*wait_seconds);
            (resync(next), Effect::Sleep(next))
        }
        (S::Resync { wait_seconds }, E::CloseOk | E::CloseFailed(_)) => {
            (resync(*wait_seconds), Effect::Sleep(*wait_seconds))
        }

        (S::Upserting, E::PersistOk) => (S::InitializeConnection, Effect::OpenConnection),
        (S::Upserting, E::PersistFailed(_)) => failure_backoff(),

        (S::InitializeConnection, E::OpenOk) => (S::Connected, Effect::SendPing),
        (S::InitializeConnection, E::OpenFailed(_)) => failure_backoff(),

        (S::Connected, E::PingOk) => (S::Connected, Effect::Sleep(PING_INTERVAL_SECONDS)),
        (S::Connected, E::SleepOk) => (S::Connected, Effect::SendPing),
        (S::Connected, E::PingFailed(_)) => (
            resync(FAILURE_BACKOFF_SECONDS),
            Effect::CloseConnection,
        ),

        _ => (S::Disabled, Effect::None),
    }
}

/// Returns true if a lifecycle event may supersede the effect in flight.
///
/// Persisting pulled rows and opening the connection run to completion;
/// foreground/background events arriving meanwhile are queued.
pub fn interruptible(state: &SyncState) -> bool {
    !matches!(
        state,
        SyncState::Upserting | SyncState::InitializeConnection
    )
}

/// Doubles the backoff, starting from one second and capped at
/// [`MAX_BACKOFF_SECONDS`].
pub fn next_backoff(wait_seconds: u64) -> u64 {
    wait_seconds.saturating_mul(2).clamp(1, MAX_BACKOFF_SECONDS)
}

fn resync(wait_seconds: u64) -> SyncState {
    SyncState::Resync { wait_seconds }
}

fn failure_backoff() -> (SyncState, Effect) {
    (
        resync(FAILURE_BACKOFF_SECONDS),
        Effect::Sleep(FAILURE_BACKOFF_SECONDS),
    )
}
