//! Wire payload shapes accepted by the frame decoder (internal).

use serde::Deserialize;
use serde_json::Value;

use crate::types::usage::count_from_value;
use crate::types::{InputUsage, OutputUsage, ToolCall, Usage};

// Tagged agent events

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub(crate) enum AgentWireEvent {
    TextDelta {
        #[serde(alias = "delta")]
        text: String,
    },
    ReasoningDelta {
        #[serde(alias = "delta")]
        text: String,
    },
    ToolCall(WireToolCall),
    ToolApprovalRequest {
        approval_id: String,
        tool_call: WireToolCall,
    },
    ToolResult {
        #[serde(default)]
        tool_call_id: Option<String>,
        tool_name: String,
        #[serde(default)]
        input: Value,
        #[serde(default)]
        output: Value,
    },
    StartStep,
    FinishStep,
    Finish {
        #[serde(default)]
        finish_reason: Option<String>,
        #[serde(default)]
        total_usage: Option<Value>,
        #[serde(default)]
        usage: Option<Value>,
    },
    Error {
        #[serde(default)]
        error: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireToolCall {
    tool_call_id: String,
    tool_name: String,
    #[serde(default, alias = "args")]
    input: Value,
}

impl From<WireToolCall> for ToolCall {
    fn from(call: WireToolCall) -> Self {
        ToolCall::new(call.tool_call_id, call.tool_name, call.input)
    }
}

// OpenAI chat completion chunks

#[derive(Deserialize)]
pub(crate) struct ChatChunk {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChatChunkChoice>,
    #[serde(default)]
    pub usage: Option<Value>,
}

#[derive(Deserialize)]
pub(crate) struct ChatChunkChoice {
    #[serde(default)]
    pub delta: Option<ChatChunkDelta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct ChatChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, alias = "reasoning")]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallFragment>>,
}

#[derive(Deserialize)]
pub(crate) struct ToolCallFragment {
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionFragment>,
}

#[derive(Deserialize)]
pub(crate) struct FunctionFragment {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

// Non-streaming chat completion

#[derive(Deserialize)]
pub(crate) struct ChatCompletion {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChatCompletionChoice>,
    #[serde(default)]
    pub usage: Option<Value>,
}

#[derive(Deserialize)]
pub(crate) struct ChatCompletionChoice {
    pub message: ChatCompletionMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct ChatCompletionMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, alias = "reasoning")]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ChatCompletionToolCall>>,
}

#[derive(Deserialize)]
pub(crate) struct ChatCompletionToolCall {
    pub id: String,
    pub function: ChatCompletionFunction,
}

#[derive(Deserialize)]
pub(crate) struct ChatCompletionFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

/// Parse a JSON-encoded argument string. Empty means no arguments; text that
/// is not JSON is kept as a plain string.
pub(crate) fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Normalize any of the usage shapes we see on the wire.
///
/// Recognises the native `{input:{..}, output:{..}}` shape, the agent SDK
/// `inputTokenDetails`/`outputTokenDetails` shape, flat `inputTokens` counts
/// and OpenAI `prompt_tokens`/`completion_tokens`.
pub(crate) fn parse_usage(value: &Value) -> Option<Usage> {
    if !value.is_object() {
        return None;
    }

    if value.get("input").is_some_and(Value::is_object) || value.get("output").is_some_and(Value::is_object) {
        return serde_json::from_value(value.clone()).ok();
    }

    let field = |path: &[&str]| -> Option<u64> {
        let mut cursor = value;
        for key in path {
            cursor = cursor.get(*key)?;
        }
        count_from_value(cursor)
    };

    if value.get("inputTokenDetails").is_some() || value.get("outputTokenDetails").is_some() {
        return Some(Usage {
            model: None,
            input: InputUsage {
                no_cache: field(&["inputTokenDetails", "noCacheTokens"]),
                cache_read: field(&["inputTokenDetails", "cacheReadTokens"]),
                cache_write: field(&["inputTokenDetails", "cacheWriteTokens"]),
            },
            output: OutputUsage {
                text: field(&["outputTokenDetails", "textTokens"]),
                reasoning: field(&["outputTokenDetails", "reasoningTokens"]),
            },
        });
    }

    if value.get("inputTokens").is_some() || value.get("outputTokens").is_some() {
        let cached = field(&["cachedInputTokens"]);
        let reasoning = field(&["reasoningTokens"]);
        return Some(Usage {
            model: None,
            input: InputUsage {
                no_cache: field(&["inputTokens"]).map(|n| n.saturating_sub(cached.unwrap_or(0))),
                cache_read: cached,
                cache_write: None,
            },
            output: OutputUsage {
                text: field(&["outputTokens"]).map(|n| n.saturating_sub(reasoning.unwrap_or(0))),
                reasoning,
            },
        });
    }

    let cached = field(&["prompt_tokens_details", "cached_tokens"]);
    let reasoning = field(&["completion_tokens_details", "reasoning_tokens"]);
    Some(Usage {
        model: None,
        input: InputUsage {
            no_cache: field(&["prompt_tokens"]).map(|n| n.saturating_sub(cached.unwrap_or(0))),
            cache_read: cached,
            cache_write: None,
        },
        output: OutputUsage {
            text: field(&["completion_tokens"]).map(|n| n.saturating_sub(reasoning.unwrap_or(0))),
            reasoning,
        },
    })
}
