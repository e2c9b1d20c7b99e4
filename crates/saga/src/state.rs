//! Flow chain lifecycle.

use serde::{Deserialize, Serialize};

/// The state of a flow chain run.
///
/// ```text
/// NotStarted ──► Running ──┬──► Completed
///                          └──► RollingBack ──► Failed
/// ```
///
/// A chain whose first step fails passes through `RollingBack` with nothing
/// to undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    /// No step has run yet.
    #[default]
    NotStarted,

    /// Forward steps are executing in order.
    Running,

    /// A step failed and the completed steps are being undone.
    RollingBack,

    /// Every forward step succeeded (terminal state).
    Completed,

    /// Rollback finished after a failed step (terminal state).
    Failed,
}

impl SagaState {
    /// Returns true if moving to `next` is a legal transition.
    pub fn can_transition_to(&self, next: SagaState) -> bool {
        matches!(
            (self, next),
            (SagaState::NotStarted, SagaState::Running)
                | (SagaState::Running, SagaState::Completed)
                | (SagaState::Running, SagaState::RollingBack)
                | (SagaState::RollingBack, SagaState::Failed)
        )
    }

    /// Returns true once the run has produced its outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Completed | SagaState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::NotStarted => "NotStarted",
            SagaState::Running => "Running",
            SagaState::RollingBack => "RollingBack",
            SagaState::Completed => "Completed",
            SagaState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
