//! Tick state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of one reconciliation tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickState {
    /// Tick has not started evaluating
    Idle,

    /// Evaluating asset `index` of `total`, in topological order
    Evaluating { index: usize, total: usize },

    /// Every asset has been evaluated
    Done,
}

/// State machine for a single tick
pub struct TickStateMachine {
    current_state: TickState,
    state_history: Vec<(TickState, DateTime<Utc>)>,
}

impl TickStateMachine {
    /// Create a new state machine
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            current_state: TickState::Idle,
            state_history: vec![(TickState::Idle, now)],
        }
    }

    /// Get the current state
    pub fn current_state(&self) -> TickState {
        self.current_state
    }

    /// Transition to a new state
    pub fn transition(&mut self, new_state: TickState) -> Result<(), String> {
        if !self.is_valid_transition(new_state) {
            return Err(format!(
                "Invalid transition from {:?} to {:?}",
                self.current_state, new_state
            ));
        }

        self.current_state = new_state;
        self.state_history.push((new_state, Utc::now()));

        Ok(())
    }

    /// Assets are visited one at a time, in order, and never revisited
    fn is_valid_transition(&self, new_state: TickState) -> bool {
        use TickState::*;

        match (self.current_state, new_state) {
            (Idle, Evaluating { index: 0, total }) => total > 0,
            (Idle, Done) => true,
            (Evaluating { index, total }, Evaluating { index: next, total: next_total }) => {
                total == next_total && next == index + 1 && next < total
            }
            (Evaluating { index, total }, Done) => index + 1 == total,
            _ => false,
        }
    }

    /// Get the state history
    pub fn history(&self) -> &[(TickState, DateTime<Utc>)] {
        &self.state_history
    }
}

impl Default for TickStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
