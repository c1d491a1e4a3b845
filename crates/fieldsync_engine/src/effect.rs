//! Effect execution seam.

use crate::state::{Effect, SyncEvent};
use std::future::Future;

/// Executes effects requested by the state machine.
///
/// Each call executes exactly one effect and reports exactly one event. Failures
/// are reported as failure events, never as errors, so the state machine decides
/// between retry and disabling. The driver never calls `execute` with
/// [`Effect::None`].
pub trait EffectHandler: Send + Sync {
    /// Executes `effect` and returns the event describing its outcome.
    fn execute(&self, effect: Effect) -> impl Future<Output = SyncEvent> + Send;
}

/// An effect handler that plays back a fixed script of events.
///
/// Records every effect it is asked to execute. Returns [`SyncEvent::Background`]
/// once the script runs out, which parks the session in `disabled`.
#[derive(Debug, Default)]
pub struct ScriptedHandler {
    script: parking_lot::Mutex<std::collections::VecDeque<SyncEvent>>,
    executed: parking_lot::Mutex<Vec<Effect>>,
}

impl ScriptedHandler {
    /// Creates a handler that answers with `events` in order.
    pub fn new(events: impl IntoIterator<Item = SyncEvent>) -> Self {
        Self {
            script: parking_lot::Mutex::new(events.into_iter().collect()),
            executed: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Effects executed so far.
    pub fn executed(&self) -> Vec<Effect> {
        self.executed.lock().clone()
    }
}

impl EffectHandler for ScriptedHandler {
    async fn execute(&self, effect: Effect) -> SyncEvent {
        self.executed.lock().push(effect);
        self.script.lock().pop_front().unwrap_or(SyncEvent::Background)
    }
}

impl<H: EffectHandler> EffectHandler for std::sync::Arc<H> {
    fn execute(&self, effect: Effect) -> impl Future<Output = SyncEvent> + Send {
        (**self).execute(effect)
    }
}
