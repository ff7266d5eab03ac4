//! Drain state machine.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use tokio::sync::watch;

/// Process-wide scaling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainState {
    #[default]
    Active,
    Draining,
    Done,
}

impl DrainState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrainState::Active => "active",
            DrainState::Draining => "draining",
            DrainState::Done => "done",
        }
    }
}

impl fmt::Display for DrainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner of the drain state. Every transition goes through [`transition`],
/// which only allows Active → Draining and Draining → Done.
///
/// [`transition`]: DrainControl::transition
#[derive(Debug)]
pub struct DrainControl {
    state: Mutex<DrainState>,
    tx: watch::Sender<DrainState>,
}

impl Default for DrainControl {
    fn default() -> Self {
        Self::new()
    }
}

impl DrainControl {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(DrainState::Active);
        Self {
            state: Mutex::new(DrainState::Active),
            tx,
        }
    }

    pub fn state(&self) -> DrainState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Observe transitions.
    pub fn subscribe(&self) -> watch::Receiver<DrainState> {
        self.tx.subscribe()
    }

    /// Active → Draining. Returns false from any other state.
    pub fn begin_drain(&self) -> bool {
        self.transition(DrainState::Active, DrainState::Draining)
    }

    /// Draining → Done. Returns true for exactly one caller.
    pub fn complete(&self) -> bool {
        self.transition(DrainState::Draining, DrainState::Done)
    }

    fn transition(&self, from: DrainState, to: DrainState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != from {
            return false;
        }
        *state = to;
        self.tx.send_replace(to);
        true
    }
}
