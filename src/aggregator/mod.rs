//! Delta aggregation: rebuilds assistant messages from stream events.
//!
//! The aggregator keeps two views. The [`LiveView`] spans the whole turn and
//! only ever grows; it is what a UI renders while the turn runs. The step
//! buffer covers one model invocation and is handed off as a [`StepMessage`]
//! by [`DeltaAggregator::take_step`] once the step's events are drained.

use serde::Serialize;
use strum::Display;
use tracing::debug;

use crate::error::describe_provider_error;
use crate::types::{
    AssistantContent, FinishReason, StreamEvent, ToolApproval, ToolCall, Usage,
};

/// Where a turn currently stands, as seen by the live view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum TurnStatus {
    #[default]
    Idle,
    Streaming,
    Finished,
    Failed,
    Cancelled,
}

/// Turn-scoped rendering state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveView {
    pub text: String,
    pub reasoning: String,
    pub model: Option<String>,
    pub finish_reason: Option<FinishReason>,
    /// Sum of the usage of every finished step.
    pub usage: Usage,
    pub status: TurnStatus,
}

/// A tool result reported by the provider itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderToolResult {
    pub call_id: Option<String>,
    pub name: String,
    pub input: serde_json::Value,
    pub output: serde_json::Value,
}

/// Everything one model invocation produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepMessage {
    /// Assistant content in emission order.
    pub content: Vec<AssistantContent>,
    pub text: String,
    pub reasoning: String,
    pub tool_calls: Vec<ToolCall>,
    pub approval_requests: Vec<ToolApproval>,
    pub tool_results: Vec<ProviderToolResult>,
    pub usage: Option<Usage>,
    pub finish_reason: Option<FinishReason>,
    pub finished: bool,
}

impl StepMessage {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.tool_results.is_empty()
    }

    fn push_text(&mut self, text: &str) {
        self.text.push_str(text);
        match self.content.last_mut() {
            Some(AssistantContent::Text { text: last }) => last.push_str(text),
            _ => self.content.push(AssistantContent::text(text)),
        }
    }

    fn push_tool_call(&mut self, call: &ToolCall) {
        if self.tool_calls.iter().any(|c| c.call_id == call.call_id) {
            return;
        }
        self.tool_calls.push(call.clone());
        self.content.push(AssistantContent::ToolCall(call.clone()));
    }
}

/// Folds [`StreamEvent`]s into the live view and the current step.
#[derive(Debug, Default)]
pub struct DeltaAggregator {
    live: LiveView,
    step: StepMessage,
}

impl DeltaAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live(&self) -> &LiveView {
        &self.live
    }

    pub fn status(&self) -> TurnStatus {
        self.live.status
    }

    /// The current step has streamed text that is not yet in history.
    pub fn has_partial_text(&self) -> bool {
        !self.step.text.is_empty()
    }

    /// The current step, as accumulated so far.
    pub fn step(&self) -> &StepMessage {
        &self.step
    }

    pub fn apply(&mut self, event: &StreamEvent) {
        if self.live.status == TurnStatus::Idle {
            self.live.status = TurnStatus::Streaming;
        }

        match event {
            StreamEvent::TextDelta { text } => {
                self.live.text.push_str(text);
                self.step.push_text(text);
            }
            StreamEvent::ReasoningDelta { text } => {
                self.live.reasoning.push_str(text);
                self.step.reasoning.push_str(text);
            }
            StreamEvent::ToolCall(call) => self.step.push_tool_call(call),
            StreamEvent::ToolApprovalRequest { approval_id, call } => {
                self.step.push_tool_call(call);
                self.step.content.push(AssistantContent::ToolApprovalRequest {
                    approval_id: approval_id.clone(),
                    call_id: call.call_id.clone(),
                });
                self.step.approval_requests.push(ToolApproval {
                    approval_id: approval_id.clone(),
                    call: call.clone(),
                });
            }
            StreamEvent::ToolResult {
                call_id,
                name,
                input,
                output,
            } => self.step.tool_results.push(ProviderToolResult {
                call_id: call_id.clone(),
                name: name.clone(),
                input: input.clone(),
                output: output.clone(),
            }),
            StreamEvent::StepBoundary { kind, step_index } => {
                debug!(?kind, step_index, "provider step boundary");
            }
            StreamEvent::ResponseMetadata { model } => {
                if !model.is_empty() {
                    self.live.model = Some(model.clone());
                }
            }
            StreamEvent::Finish(finish) => {
                if self.step.finished {
                    debug!("ignoring repeated finish for the same step");
                    return;
                }
                self.step.finished = true;
                self.step.finish_reason = finish.reason;
                self.live.finish_reason = finish.reason;

                if let Some(message) = &finish.message {
                    if self.step.text.is_empty() && !message.text.is_empty() {
                        self.live.text.push_str(&message.text);
                        self.step.push_text(&message.text);
                    }
                    if self.step.reasoning.is_empty() && !message.reasoning.is_empty() {
                        self.live.reasoning.push_str(&message.reasoning);
                        self.step.reasoning.push_str(&message.reasoning);
                    }
                    for call in &message.tool_calls {
                        self.step.push_tool_call(call);
                    }
                }

                if let Some(usage) = &finish.usage {
                    if let Some(model) = usage.model.as_deref().filter(|m| !m.is_empty()) {
                        self.live.model = Some(model.to_string());
                    }
                    self.live.usage.accumulate(usage);
                    self.step.usage = Some(usage.clone());
                }
            }
            StreamEvent::Error { payload } => {
                self.fail(&describe_provider_error(payload));
            }
        }
    }

    /// Render a failure into the text channel and mark the turn failed.
    /// Returns the rendered text.
    pub fn fail(&mut self, message: &str) -> String {
        let rendered = format!("Error: {message}");
        self.live.text.push_str(&rendered);
        self.live.status = TurnStatus::Failed;
        rendered
    }

    /// Record the terminal status of the turn. A failure is never overwritten.
    pub fn close(&mut self, status: TurnStatus) {
        if self.live.status != TurnStatus::Failed {
            self.live.status = status;
        }
    }

    /// Finalize the current step and start a fresh one.
    pub fn take_step(&mut self) -> StepMessage {
        std::mem::take(&mut self.step)
    }
}
