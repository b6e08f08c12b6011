//! Core run types for the tool loop.

use serde::{Deserialize, Serialize};
use strum::Display;

/// Where the loop currently is within a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    #[default]
    Idle,
    AwaitingModel,
    Streaming,
    AwaitingApproval,
    Finished,
    Failed,
    Cancelled,
}

impl LoopState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Cancelled)
    }

    /// Whether the loop may move from `self` to `next`.
    pub fn can_transition_to(self, next: LoopState) -> bool {
        use LoopState::*;
        if next == Cancelled || next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Idle, AwaitingModel)
                | (Idle, AwaitingApproval)
                | (Idle, Finished)
                | (AwaitingModel, Streaming)
                | (AwaitingModel, Finished)
                | (Streaming, AwaitingModel)
                | (Streaming, AwaitingApproval)
                | (Streaming, Finished)
                | (AwaitingApproval, AwaitingModel)
                | (AwaitingApproval, Finished)
        )
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The model finished without requesting more tools.
    Completed,
    /// The step budget ran out while more work was needed. Everything
    /// produced so far is kept.
    StepLimitReached,
    /// The decision queue closed with approvals still outstanding. A later
    /// run resumes from history once they are decided.
    AwaitingApproval,
    Failed {
        error: String,
    },
    Cancelled,
}

impl TurnOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub(crate) fn final_state(&self) -> LoopState {
        match self {
            Self::Failed { .. } => LoopState::Failed,
            Self::Cancelled => LoopState::Cancelled,
            _ => LoopState::Finished,
        }
    }
}
