//! Conversation turns and assistant content.

use serde::{Deserialize, Serialize};
use strum::Display;

/// One role-tagged entry in the canonical conversation history.
///
/// Turns are immutable once appended. The two `*-display` roles exist only to
/// drive a UI and are never replayed to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Turn {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: Vec<AssistantContent>,
        /// Set when the turn was cut short by cancellation.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        incomplete: bool,
    },
    /// Output of an executed (or denied) tool call, replayed to the model.
    Tool {
        call_id: String,
        name: String,
        output: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
    ToolApprovalResponse {
        approval_id: String,
        approved: bool,
    },
    ToolResultDisplay {
        payload: ToolCallPayload,
    },
    ToolApprovalRequestDisplay {
        approval_id: String,
        payload: ToolCallPayload,
    },
}

/// Role tag of a [`Turn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
    ToolApprovalResponse,
    ToolResultDisplay,
    ToolApprovalRequestDisplay,
}

impl Turn {
    pub fn system(text: impl Into<String>) -> Self {
        Self::System {
            content: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::User {
            content: text.into(),
        }
    }

    pub fn assistant(content: Vec<AssistantContent>) -> Self {
        Self::Assistant {
            content,
            incomplete: false,
        }
    }

    /// Assistant turn holding only plain text.
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::assistant(vec![AssistantContent::text(text)])
    }

    pub fn tool_result(call: &ToolCall, output: serde_json::Value, is_error: bool) -> Self {
        Self::Tool {
            call_id: call.call_id.clone(),
            name: call.name.clone(),
            output,
            is_error,
        }
    }

    pub fn approval_response(decision: &ApprovalDecision) -> Self {
        Self::ToolApprovalResponse {
            approval_id: decision.approval_id.clone(),
            approved: decision.approved,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::System { .. } => Role::System,
            Self::User { .. } => Role::User,
            Self::Assistant { .. } => Role::Assistant,
            Self::Tool { .. } => Role::Tool,
            Self::ToolApprovalResponse { .. } => Role::ToolApprovalResponse,
            Self::ToolResultDisplay { .. } => Role::ToolResultDisplay,
            Self::ToolApprovalRequestDisplay { .. } => Role::ToolApprovalRequestDisplay,
        }
    }

    /// UI-only scaffolding that is never sent to the model.
    pub fn is_ephemeral(&self) -> bool {
        matches!(
            self,
            Self::ToolResultDisplay { .. } | Self::ToolApprovalRequestDisplay { .. }
        )
    }

    /// Concatenated text of a user, system, or assistant turn.
    pub fn text(&self) -> String {
        match self {
            Self::System { content } | Self::User { content } => content.clone(),
            Self::Assistant { content, .. } => content
                .iter()
                .filter_map(|part| match part {
                    AssistantContent::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
            _ => String::new(),
        }
    }

    /// Assistant content, or an empty slice for other roles.
    pub fn assistant_content(&self) -> &[AssistantContent] {
        match self {
            Self::Assistant { content, .. } => content,
            _ => &[],
        }
    }
}

/// One element of an assistant turn, in emission order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum AssistantContent {
    Text { text: String },
    ToolCall(ToolCall),
    ToolApprovalRequest { approval_id: String, call_id: String },
}

impl AssistantContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCall> {
        match self {
            Self::ToolCall(call) => Some(call),
            _ => None,
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    #[serde(default)]
    pub input: serde_json::Value,
}

impl ToolCall {
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            input,
        }
    }
}

/// A tool call held behind a human approval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolApproval {
    pub approval_id: String,
    pub call: ToolCall,
}

/// Rendered tool activity for display turns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallPayload {
    pub name: String,
    pub input_json: String,
    pub output_json: String,
}

impl ToolCallPayload {
    /// Payload for a call whose output is not known yet.
    pub fn pending(call: &ToolCall) -> Self {
        Self {
            name: call.name.clone(),
            input_json: call.input.to_string(),
            output_json: "{}".to_string(),
        }
    }

    pub fn completed(name: &str, input: &serde_json::Value, output: &serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            input_json: input.to_string(),
            output_json: serde_json::json!({ "result": output }).to_string(),
        }
    }
}

/// A human decision on one outstanding approval request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalDecision {
    pub approval_id: String,
    pub approved: bool,
}

impl ApprovalDecision {
    pub fn approve(approval_id: impl Into<String>) -> Self {
        Self {
            approval_id: approval_id.into(),
            approved: true,
        }
    }

    pub fn deny(approval_id: impl Into<String>) -> Self {
        Self {
            approval_id: approval_id.into(),
            approved: false,
        }
    }
}
