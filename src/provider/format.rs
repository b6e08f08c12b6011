//! Chat-completions request formatting.

use serde_json::{json, Value};

use crate::tools::ToolDefinition;
use crate::types::{AssistantContent, Turn};

/// Convert a tool result JSON value into the string payload of a tool message.
pub(crate) fn tool_result_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Role-tagged chat messages for `turns`, led by the system instructions.
///
/// Approval scaffolding and display turns have no chat-completions
/// counterpart and are left out.
pub fn format_messages(instructions: Option<&str>, turns: &[Turn]) -> Vec<Value> {
    let mut messages = Vec::with_capacity(turns.len() + 1);
    if let Some(text) = instructions.filter(|t| !t.trim().is_empty()) {
        messages.push(json!({ "role": "system", "content": text }));
    }

    for turn in turns {
        match turn {
            Turn::System { content } => messages.push(json!({ "role": "system", "content": content })),
            Turn::User { content } => messages.push(json!({ "role": "user", "content": content })),
            Turn::Assistant { content, .. } => {
                let text = turn.text();
                let tool_calls: Vec<Value> = content
                    .iter()
                    .filter_map(AssistantContent::as_tool_call)
                    .map(|call| {
                        json!({
                            "id": call.call_id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.input.to_string(),
                            }
                        })
                    })
                    .collect();

                if tool_calls.is_empty() {
                    if !text.is_empty() {
                        messages.push(json!({ "role": "assistant", "content": text }));
                    }
                } else {
                    messages.push(json!({
                        "role": "assistant",
                        "content": if text.is_empty() { Value::Null } else { Value::String(text) },
                        "tool_calls": tool_calls,
                    }));
                }
            }
            Turn::Tool { call_id, output, .. } => messages.push(json!({
                "role": "tool",
                "tool_call_id": call_id,
                "content": tool_result_to_string(output),
            })),
            Turn::ToolApprovalResponse { .. }
            | Turn::ToolResultDisplay { .. }
            | Turn::ToolApprovalRequestDisplay { .. } => {}
        }
    }
    messages
}

/// Function-tool entries for the `tools` request field.
pub fn format_tools(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                }
            })
        })
        .collect()
}
