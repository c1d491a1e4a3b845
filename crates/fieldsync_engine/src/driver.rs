//! Message-passing shell around the state machine.
//!
//! Two tasks cooperate:
//! - the driver task owns the [`SyncState`], applies events through
//!   [`reduce`] and sends each resulting effect over a request channel;
//! - the executor task runs one effect at a time on the [`EffectHandler`] and
//!   sends its outcome back as a completion.
//!
//! Completions are tagged with a sequence number. A completion for an effect
//! that has since been superseded is dropped. Foreground/background events
//! arriving while a non-[`interruptible`] effect is in flight are queued and
//! applied in arrival order once the state allows it.

use crate::effect::EffectHandler;
use crate::error::{SyncError, SyncResult};
use crate::state::{interruptible, reduce, Effect, SyncEvent, SyncState};
use std::collections::VecDeque;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

const CHANNEL_CAPACITY: usize = 32;

/// A foreground/background signal from the host app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// App moved to the foreground.
    Foreground,
    /// App moved to the background.
    Background,
}

impl From<Lifecycle> for SyncEvent {
    fn from(lifecycle: Lifecycle) -> Self {
        match lifecycle {
            Lifecycle::Foreground => SyncEvent::Foreground,
            Lifecycle::Background => SyncEvent::Background,
        }
    }
}

#[derive(Debug)]
struct EffectRequest {
    seq: u64,
    effect: Effect,
}

#[derive(Debug)]
struct Completion {
    seq: u64,
    event: SyncEvent,
}

/// Spawns sync sessions.
pub struct SyncDriver;

impl SyncDriver {
    /// Spawns a session in the initial state on the current tokio runtime.
    pub fn spawn<H: EffectHandler + 'static>(handler: H) -> SyncHandle {
        Self::spawn_with_state(handler, SyncState::initial())
    }

    /// Spawns a session starting from `state`.
    pub fn spawn_with_state<H: EffectHandler + 'static>(handler: H, state: SyncState) -> SyncHandle {
        let (lifecycle_tx, lifecycle_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (request_tx, request_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (completion_tx, completion_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(state.clone());

        let executor = tokio::spawn(run_executor(handler, request_rx, completion_tx));
        let driver = tokio::spawn(
            DriverLoop {
                state,
                seq: 0,
                in_flight: false,
                deferred: VecDeque::new(),
                requests: request_tx,
                state_tx,
            }
            .run(lifecycle_rx, completion_rx),
        );

        SyncHandle {
            lifecycle: lifecycle_tx,
            state: state_rx,
            driver,
            executor,
        }
    }
}

/// Handle to a running sync session.
pub struct SyncHandle {
    lifecycle: mpsc::Sender<Lifecycle>,
    state: watch::Receiver<SyncState>,
    driver: JoinHandle<()>,
    executor: JoinHandle<()>,
}

impl SyncHandle {
    /// Signals that the app moved to the foreground.
    pub async fn foreground(&self) -> SyncResult<()> {
        self.send(Lifecycle::Foreground).await
    }

    /// Signals that the app moved to the background.
    pub async fn background(&self) -> SyncResult<()> {
        self.send(Lifecycle::Background).await
    }

    /// Delivers a lifecycle signal.
    pub async fn send(&self, lifecycle: Lifecycle) -> SyncResult<()> {
        self.lifecycle
            .send(lifecycle)
            .await
            .map_err(|_| SyncError::Stopped)
    }

    /// The current state.
    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// A receiver that observes every published state.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.clone()
    }

    /// Waits until the state satisfies `predicate` and returns it.
    pub async fn wait_for(&self, predicate: impl FnMut(&SyncState) -> bool) -> SyncResult<SyncState> {
        let mut rx = self.state.clone();
        let state = rx.wait_for(predicate).await.map_err(|_| SyncError::Stopped)?;
        Ok(state.clone())
    }

    /// Stops the session and waits for both tasks to finish.
    pub async fn shutdown(self) {
        let SyncHandle {
            lifecycle,
            driver,
            executor,
            ..
        } = self;
        drop(lifecycle);
        if let Err(err) = driver.await {
            warn!(error = %err, "sync driver task failed");
        }
        if let Err(err) = executor.await {
            warn!(error = %err, "effect executor task failed");
        }
    }
}

struct DriverLoop {
    state: SyncState,
    seq: u64,
    in_flight: bool,
    deferred: VecDeque<SyncEvent>,
    requests: mpsc::Sender<EffectRequest>,
    state_tx: watch::Sender<SyncState>,
}

impl DriverLoop {
    async fn run(
        mut self,
        mut lifecycle: mpsc::Receiver<Lifecycle>,
        mut completions: mpsc::Receiver<Completion>,
    ) {
        loop {
            tokio::select! {
                completion = completions.recv() => {
                    let Some(Completion { seq, event }) = completion else {
                        break;
                    };
                    if seq != self.seq {
                        trace!(seq, current = self.seq, "stale completion dropped");
                        continue;
                    }
                    self.in_flight = false;
                    if !self.apply(event).await {
                        break;
                    }
                    if !self.drain_deferred().await {
                        break;
                    }
                }
                signal = lifecycle.recv() => {
                    let Some(signal) = signal else {
                        break;
                    };
                    let event = SyncEvent::from(signal);
                    if self.in_flight && !interruptible(&self.state) {
                        debug!(state = %self.state, event = event.name(), "lifecycle event queued");
                        self.deferred.push_back(event);
                    } else if !self.apply(event).await {
                        break;
                    }
                }
            }
        }
        debug!(state = %self.state, "sync driver stopped");
    }

    async fn drain_deferred(&mut self) -> bool {
        while interruptible(&self.state) {
            let Some(event) = self.deferred.pop_front() else {
                break;
            };
            if !self.apply(event).await {
                return false;
            }
        }
        true
    }

    /// Applies one event. Returns false once the executor is gone.
    async fn apply(&mut self, event: SyncEvent) -> bool {
        let event_name = event.name();
        let (next, effect) = reduce(&self.state, event);
        debug!(
            from = %self.state,
            to = %next,
            event = event_name,
            effect = effect.name(),
            "sync transition"
        );
        self.state = next;
        self.state_tx.send_replace(self.state.clone());

        if effect.is_none() && !self.in_flight {
            return true;
        }
        // A new request, even an empty one, supersedes whatever is in flight.
        self.seq += 1;
        self.in_flight = !effect.is_none();
        self.requests
            .send(EffectRequest {
                seq: self.seq,
                effect,
            })
            .await
            .is_ok()
    }
}

async fn run_executor<H: EffectHandler>(
    handler: H,
    mut requests: mpsc::Receiver<EffectRequest>,
    completions: mpsc::Sender<Completion>,
) {
    let mut next = requests.recv().await;
    while let Some(EffectRequest { seq, effect }) = next.take() {
        if effect.is_none() {
            next = requests.recv().await;
            continue;
        }
        trace!(seq, effect = effect.name(), "executing effect");
        let outcome = handler.execute(effect);
        tokio::pin!(outcome);
        tokio::select! {
            event = &mut outcome => {
                if completions.send(Completion { seq, event }).await.is_err() {
                    break;
                }
                next = requests.recv().await;
            }
            superseding = requests.recv() => {
                debug!(seq, "effect superseded");
                next = superseding;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::ScriptedHandler;
    use crate::state::{ResyncFailure, ResyncPayload, FAILURE_BACKOFF_SECONDS};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn starts_in_initial_state() {
        let handle = SyncDriver::spawn(ScriptedHandler::default());
        assert_eq!(handle.state(), SyncState::initial());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn scripted_failures_back_off() {
        let handler = Arc::new(ScriptedHandler::new([
            SyncEvent::SleepOk,
            SyncEvent::CheckpointRead(None),
            SyncEvent::ResyncFailed(ResyncFailure::Transport("offline".into())),
            SyncEvent::SleepOk,
            SyncEvent::CheckpointRead(None),
            SyncEvent::ResyncFailed(ResyncFailure::MissingConfig),
        ]));
        let handle = SyncDriver::spawn(Arc::clone(&handler));
        handle.foreground().await.unwrap();

        let state = handle.wait_for(|s| *s == SyncState::Disabled).await.unwrap();
        assert_eq!(state, SyncState::Disabled);
        assert_eq!(
            handler.executed(),
            vec![
                Effect::Sleep(0),
                Effect::ReadCheckpoint,
                Effect::Resync(None),
                Effect::Sleep(1),
                Effect::ReadCheckpoint,
                Effect::Resync(None),
            ]
        );
        handle.shutdown().await;
    }

    /// Blocks persist until released, answers everything else from a script.
    struct GatedHandler {
        gate: Notify,
        script: ScriptedHandler,
    }

    impl EffectHandler for GatedHandler {
        async fn execute(&self, effect: Effect) -> SyncEvent {
            match effect {
                Effect::Persist(_) => {
                    self.gate.notified().await;
                    SyncEvent::PersistFailed("disk full".into())
                }
                Effect::Sleep(seconds) if seconds > 0 => {
                    tokio::time::sleep(Duration::from_secs(seconds)).await;
                    SyncEvent::SleepOk
                }
                other => self.script.execute(other).await,
            }
        }
    }

    fn payload() -> ResyncPayload {
        serde_json::from_value(serde_json::json!({
            "pull": {
                "meta": {"server_time": "2024-05-01T12:00:00.000Z", "since": "1970-01-01T00:00:00.000Z"},
                "data": {}
            },
            "pushed": 0
        }))
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn lifecycle_events_wait_for_persist() {
        let handler = Arc::new(GatedHandler {
            gate: Notify::new(),
            script: ScriptedHandler::new([
                SyncEvent::SleepOk,
                SyncEvent::CheckpointRead(None),
                SyncEvent::ResyncOk(payload()),
            ]),
        });
        let handle = SyncDriver::spawn(Arc::clone(&handler));
        handle.foreground().await.unwrap();
        handle
            .wait_for(|s| *s == SyncState::Upserting)
            .await
            .unwrap();

        handle.background().await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(handle.state(), SyncState::Upserting);

        handler.gate.notify_one();
        let state = handle.wait_for(|s| *s == SyncState::Disabled).await.unwrap();
        assert_eq!(state, SyncState::Disabled);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn foreground_supersedes_a_sleep() {
        let handler = Arc::new(GatedHandler {
            gate: Notify::new(),
            script: ScriptedHandler::new([
                SyncEvent::SleepOk,
                SyncEvent::CheckpointRead(None),
                SyncEvent::ResyncOk(payload()),
                // After the superseding foreground.
                SyncEvent::SleepOk,
                SyncEvent::CheckpointRead(None),
                SyncEvent::ResyncFailed(ResyncFailure::MissingConfig),
            ]),
        });
        let handle = SyncDriver::spawn(Arc::clone(&handler));
        handle.foreground().await.unwrap();
        handle
            .wait_for(|s| *s == SyncState::Upserting)
            .await
            .unwrap();
        handler.gate.notify_one();
        handle
            .wait_for(|s| s.wait_seconds() == Some(FAILURE_BACKOFF_SECONDS))
            .await
            .unwrap();

        // Sleeping five seconds is interruptible.
        handle.foreground().await.unwrap();
        let state = handle.wait_for(|s| *s == SyncState::Disabled).await.unwrap();
        assert_eq!(state, SyncState::Disabled);
        handle.shutdown().await;
    }

    struct PanickingHandler;

    impl EffectHandler for PanickingHandler {
        async fn execute(&self, _effect: Effect) -> SyncEvent {
            panic!("handler bug");
        }
    }

    #[tokio::test]
    async fn shutdown_after_executor_panic() {
        let handle = SyncDriver::spawn(PanickingHandler);
        let mut states = handle.subscribe();
        handle.foreground().await.unwrap();

        // The driver stops once the executor is gone.
        while states.changed().await.is_ok() {}
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_closes_state_channel() {
        let handle = SyncDriver::spawn(ScriptedHandler::default());
        let mut states = handle.subscribe();
        handle.shutdown().await;
        assert!(states.changed().await.is_err());
    }
}
