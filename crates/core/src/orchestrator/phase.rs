//! # Run Phases
//!
//! Explicit state machine for one run. The orchestrator drives it through
//! `advance`; illegal transitions are rejected so a refactor that skips a
//! phase shows up in tests instead of in the event stream.

use serde::Serialize;

/// Phase of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// No run active
    Idle,
    /// Detecting intent
    Classifying,
    /// Chat path: awaiting the responder
    Responding,
    /// Research path: engine running, bridge being drained
    Researching,
    /// Research path: building final prose
    Synthesizing,
    /// Streaming the chunked answer
    Emitting,
    /// Terminal: run finished
    Succeeded,
    /// Terminal: run errored
    Failed,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Succeeded | RunPhase::Failed)
    }
}

/// Tracks the current phase of one run
#[derive(Debug, Clone)]
pub struct RunState {
    phase: RunPhase,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            phase: RunPhase::Idle,
        }
    }
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Move to `next` if the edge is legal; returns whether it was taken.
    /// Any non-terminal phase may fail.
    pub fn advance(&mut self, next: RunPhase) -> bool {
        let legal = matches!(
            (self.phase, next),
            (RunPhase::Idle, RunPhase::Classifying)
                | (RunPhase::Classifying, RunPhase::Responding)
                | (RunPhase::Classifying, RunPhase::Researching)
                | (RunPhase::Researching, RunPhase::Synthesizing)
                | (RunPhase::Responding, RunPhase::Emitting)
                | (RunPhase::Synthesizing, RunPhase::Emitting)
                | (RunPhase::Emitting, RunPhase::Succeeded)
        ) || (next == RunPhase::Failed && !self.phase.is_terminal());

        if legal {
            self.phase = next;
        } else {
            tracing::warn!(from = ?self.phase, to = ?next, "illegal run phase transition ignored");
        }
        legal
    }

    /// Mark the run failed from whatever phase it is in
    pub fn fail(&mut self) {
        self.advance(RunPhase::Failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_path_transitions() {
        let mut state = RunState::new();
        assert!(state.advance(RunPhase::Classifying));
        assert!(state.advance(RunPhase::Responding));
        assert!(state.advance(RunPhase::Emitting));
        assert!(state.advance(RunPhase::Succeeded));
        assert!(state.phase().is_terminal());
    }

    #[test]
    fn test_research_path_transitions() {
        let mut state = RunState::new();
        assert!(state.advance(RunPhase::Classifying));
        assert!(state.advance(RunPhase::Researching));
        assert!(state.advance(RunPhase::Synthesizing));
        assert!(state.advance(RunPhase::Emitting));
        assert!(state.advance(RunPhase::Succeeded));
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let mut state = RunState::new();
        assert!(!state.advance(RunPhase::Emitting));
        assert_eq!(state.phase(), RunPhase::Idle);
    }

    #[test]
    fn test_any_active_phase_can_fail() {
        for target in [
            RunPhase::Classifying,
            RunPhase::Responding,
            RunPhase::Researching,
        ] {
            let mut state = RunState::new();
            state.advance(RunPhase::Classifying);
            if target != RunPhase::Classifying {
                state.advance(target);
            }
            state.fail();
            assert_eq!(state.phase(), RunPhase::Failed);
        }
    }

    #[test]
    fn test_terminal_phase_is_sticky() {
        let mut state = RunState::new();
        state.advance(RunPhase::Classifying);
        state.fail();
        assert!(!state.advance(RunPhase::Failed));
        assert!(!state.advance(RunPhase::Emitting));
        assert_eq!(state.phase(), RunPhase::Failed);
    }
}
