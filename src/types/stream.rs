//! Decoded stream events.

use futures::stream::BoxStream;
use serde::Serialize;

use crate::error::Result;
use super::generation::FinishReason;
use super::turn::ToolCall;
use super::usage::Usage;

/// Lazily decoded events of one model invocation.
pub type EventStream = BoxStream<'static, Result<StreamEvent>>;

/// One decoded unit of an in-progress model response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    TextDelta {
        text: String,
    },
    ReasoningDelta {
        text: String,
    },
    ToolCall(ToolCall),
    /// The upstream already gated this call behind an approval.
    ToolApprovalRequest {
        approval_id: String,
        call: ToolCall,
    },
    /// A tool executed on the provider side.
    ToolResult {
        call_id: Option<String>,
        name: String,
        input: serde_json::Value,
        output: serde_json::Value,
    },
    StepBoundary {
        kind: StepBoundaryKind,
        step_index: usize,
    },
    /// Best-known model id for the response.
    ResponseMetadata {
        model: String,
    },
    Finish(FinishEvent),
    Error {
        payload: serde_json::Value,
    },
}

impl StreamEvent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }

    pub fn finish(reason: FinishReason, usage: Option<Usage>) -> Self {
        Self::Finish(FinishEvent {
            reason: Some(reason),
            usage,
            message: None,
        })
    }

    /// Whether this event ends a well-formed stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish(_) | Self::Error { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepBoundaryKind {
    Start,
    Finish,
}

/// Terminal event of a successful model invocation.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishEvent {
    pub reason: Option<FinishReason>,
    pub usage: Option<Usage>,
    /// Whole completed message, present for non-streaming responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<CompletionPayload>,
}

/// A complete assistant message delivered in one piece.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionPayload {
    pub text: String,
    pub reasoning: String,
    pub tool_calls: Vec<ToolCall>,
}
