//! Typed error hierarchy for the gauntlet core.
//!
//! Two top-level enums cover the two subsystems:
//! - `SessionError` — phase state machine and progress store failures
//! - `JudgeError` — code judging orchestrator failures

use thiserror::Error;

use crate::session::PhaseId;

/// Errors from the session subsystem (state machine and progress store).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Phase {requested} is not team {team_id}'s active phase")]
    PhaseNotActive { team_id: u32, requested: PhaseId },

    #[error("Phase {0} has not been initialized for this session")]
    Uninitialized(PhaseId),

    #[error("Question index {index} out of range for phase {phase} (bank size {bank_len})")]
    QuestionOutOfRange {
        phase: PhaseId,
        index: usize,
        bank_len: usize,
    },

    #[error("Final merge is locked until all phases are complete")]
    FinalMergeLocked,

    #[error("Write would move team {team_id} backward: {detail}")]
    Regression { team_id: u32, detail: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the judging orchestrator and its backends.
///
/// Exactly three shapes ever cross the judging layer boundary: an
/// accepted verdict, a rejected verdict with a message, or one of
/// these errors. Raw transport failures never propagate further.
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("Judging timed out: {0}")]
    Timeout(String),

    #[error("Judge backend transport failure: {0}")]
    Transport(String),

    #[error("Malformed judge response: {0}")]
    Malformed(String),

    #[error("Judging was cancelled")]
    Cancelled,
}

impl JudgeError {
    /// Classify a reqwest failure: request timeouts surface as `Timeout`
    /// so callers can distinguish "backend slow" from "backend broken".
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            JudgeError::Timeout(err.to_string())
        } else {
            JudgeError::Transport(err.to_string())
        }
    }

    /// Whether re-invoking the judging action may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JudgeError::Timeout(_) | JudgeError::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_error_phase_not_active_carries_context() {
        let err = SessionError::PhaseNotActive {
            team_id: 3,
            requested: PhaseId::Phase2,
        };
        match &err {
            SessionError::PhaseNotActive { team_id, requested } => {
                assert_eq!(*team_id, 3);
                assert_eq!(*requested, PhaseId::Phase2);
            }
            _ => panic!("Expected PhaseNotActive"),
        }
        assert!(err.to_string().contains("team 3"));
    }

    #[test]
    fn session_error_regression_mentions_team() {
        let err = SessionError::Regression {
            team_id: 7,
            detail: "current_phase_index 2 -> 1".to_string(),
        };
        assert!(err.to_string().contains("team 7"));
        assert!(err.to_string().contains("2 -> 1"));
    }

    #[test]
    fn judge_error_timeout_is_retryable() {
        assert!(JudgeError::Timeout("20s ceiling".into()).is_retryable());
        assert!(JudgeError::Transport("connection refused".into()).is_retryable());
        assert!(!JudgeError::Malformed("no status field".into()).is_retryable());
        assert!(!JudgeError::Cancelled.is_retryable());
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&SessionError::Uninitialized(PhaseId::Phase1));
        assert_std_error(&JudgeError::Cancelled);
    }
}
