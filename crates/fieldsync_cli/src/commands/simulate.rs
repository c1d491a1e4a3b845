//! Simulate command implementation.

use fieldsync_engine::{reduce, Effect, SyncEvent, SyncState};
use serde::Serialize;
use std::path::Path;

/// One reducer step.
#[derive(Debug, Serialize)]
pub struct Transition {
    /// State before the event.
    pub from: SyncState,
    /// Event name.
    pub event: &'static str,
    /// State after the event.
    pub to: SyncState,
    /// Requested effect.
    pub effect: Effect,
}

/// Folds `events` through the reducer starting at `state`.
pub fn simulate(mut state: SyncState, events: Vec<SyncEvent>) -> Vec<Transition> {
    let mut transitions = Vec::with_capacity(events.len());
    for event in events {
        let name = event.name();
        let (next, effect) = reduce(&state, event);
        transitions.push(Transition {
            from: std::mem::replace(&mut state, next.clone()),
            event: name,
            to: next,
            effect,
        });
    }
    transitions
}

fn describe(effect: &Effect) -> String {
    match effect {
        Effect::Sleep(seconds) => format!("sleep({seconds})"),
        Effect::Resync(Some(since)) => format!("resync(since {since})"),
        other => other.name().to_string(),
    }
}

/// Runs the simulate command.
pub fn run(
    path: &Path,
    initial: Option<&str>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let events: Vec<SyncEvent> = super::read_json(path)?;
    let state = match initial {
        Some(raw) => serde_json::from_str(raw).map_err(|e| format!("Invalid state: {e}"))?,
        None => SyncState::initial(),
    };
    let transitions = simulate(state, events);

    if json {
        println!("{}", serde_json::to_string_pretty(&transitions)?);
        return Ok(());
    }

    for t in &transitions {
        println!(
            "{:<24} --{}--> {:<24} [{}]",
            t.from.to_string(),
            t.event,
            t.to.to_string(),
            describe(&t.effect)
        );
    }
    if let Some(last) = transitions.last() {
        println!();
        println!("Final state: {}", last.to);
    }
    Ok(())
}
