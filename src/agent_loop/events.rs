//! Loop event stream types.

use serde::Serialize;

use crate::types::{AssistantContent, ToolApproval, ToolCallPayload, Usage};

use super::types::TurnOutcome;

/// Everything a caller observes while a turn runs, in emission order.
///
/// `Finished` is always the last event of a run and appears exactly once.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    StepStarted {
        step: usize,
    },
    Delta {
        text: String,
    },
    ReasoningDelta {
        text: String,
    },
    /// The step's assistant Turn was appended to history.
    AssistantContentProduced {
        step: usize,
        content: Vec<AssistantContent>,
    },
    /// A tool result became available (executed, denied, or reported by the
    /// provider).
    ToolActivity {
        call_id: String,
        payload: ToolCallPayload,
        is_error: bool,
    },
    ApprovalRequested {
        step: usize,
        approval: ToolApproval,
    },
    /// Token usage summed over the run's steps.
    Usage {
        usage: Usage,
    },
    Error {
        message: String,
    },
    ProcessingTime {
        ms: u64,
    },
    Finished {
        outcome: TurnOutcome,
    },
}

impl LoopEvent {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished { .. })
    }

    /// Text carried by a `Delta`.
    pub fn delta_text(&self) -> Option<&str> {
        match self {
            Self::Delta { text } => Some(text),
            _ => None,
        }
    }
}
