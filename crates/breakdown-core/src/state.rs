//! Pipeline run state machine
//!
//! `Received → Fetching → Fetched → Analyzing → Analyzed → Synthesizing →
//! (Writing) → Completed`, with `Rejected` reachable only from `Received` and
//! `Failed` from any non-terminal state after the request was accepted.

use serde::{Deserialize, Serialize};

/// State of a single pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Request accepted for validation
    Received,
    /// Issue lookup in flight
    Fetching,
    /// Issue record available
    Fetched,
    /// Persona fan-out in flight
    Analyzing,
    /// Analyses collected
    Analyzed,
    /// Synthesizer running
    Synthesizing,
    /// Write-back in flight
    Writing,
    /// Result produced
    Completed,
    /// Request failed validation
    Rejected,
    /// Fetch, synthesis or write failed
    Failed,
}

impl PipelineState {
    /// Check if no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Rejected | Self::Failed)
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Illegal state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal pipeline transition: {from} -> {to}")]
pub struct TransitionError {
    /// Current state
    pub from: PipelineState,
    /// Requested state
    pub to: PipelineState,
}

/// States reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: PipelineState) -> Vec<PipelineState> {
    use PipelineState::*;
    match from {
        Received => vec![Fetching, Rejected],
        Fetching => vec![Fetched, Failed],
        Fetched => vec![Analyzing, Failed],
        Analyzing => vec![Analyzed, Failed],
        Analyzed => vec![Synthesizing, Failed],
        Synthesizing => vec![Writing, Completed, Failed],
        Writing => vec![Completed, Failed],
        Completed | Rejected | Failed => vec![],
    }
}

/// Validate a single transition
///
/// # Errors
/// - `TransitionError` if `to` is not reachable from `from`
pub fn validate_transition(from: PipelineState, to: PipelineState) -> Result<(), TransitionError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(TransitionError { from, to })
    }
}

/// Tracks the state of one run
#[derive(Debug)]
pub struct RunStatus {
    state: PipelineState,
}

impl RunStatus {
    /// Start in `Received`
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: PipelineState::Received,
        }
    }

    /// Current state
    #[inline]
    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Move to the next state
    ///
    /// Orchestrator code only requests legal transitions; an illegal one is a
    /// bug, so it trips a debug assertion and is otherwise ignored.
    pub fn advance(&mut self, to: PipelineState) {
        match validate_transition(self.state, to) {
            Ok(()) => {
                tracing::debug!(from = %self.state, %to, "Pipeline transition");
                self.state = to;
            }
            Err(err) => {
                tracing::error!(%err, "Rejected pipeline transition");
                debug_assert!(false, "{err}");
            }
        }
    }
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_with_write_back() {
        use PipelineState::*;
        let path = [
            Received, Fetching, Fetched, Analyzing, Analyzed, Synthesizing, Writing, Completed,
        ];
        for pair in path.windows(2) {
            assert!(validate_transition(pair[0], pair[1]).is_ok(), "{pair:?}");
        }
    }

    #[test]
    fn write_stage_is_optional() {
        assert!(validate_transition(PipelineState::Synthesizing, PipelineState::Completed).is_ok());
    }

    #[test]
    fn stages_cannot_be_skipped() {
        assert_eq!(
            validate_transition(PipelineState::Fetched, PipelineState::Synthesizing),
            Err(TransitionError {
                from: PipelineState::Fetched,
                to: PipelineState::Synthesizing,
            })
        );
        assert!(validate_transition(PipelineState::Received, PipelineState::Analyzing).is_err());
    }

    #[test]
    fn rejection_only_before_start() {
        assert!(validate_transition(PipelineState::Received, PipelineState::Rejected).is_ok());
        assert!(validate_transition(PipelineState::Fetching, PipelineState::Rejected).is_err());
        assert!(validate_transition(PipelineState::Received, PipelineState::Failed).is_err());
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for state in [
            PipelineState::Completed,
            PipelineState::Rejected,
            PipelineState::Failed,
        ] {
            assert!(state.is_terminal());
            assert!(allowed_transitions(state).is_empty());
        }
    }

    #[test]
    fn run_status_advances() {
        let mut status = RunStatus::new();
        status.advance(PipelineState::Fetching);
        status.advance(PipelineState::Fetched);
        assert_eq!(status.state(), PipelineState::Fetched);
    }
}
