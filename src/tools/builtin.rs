//! Offline demo tools used by the CLI.
//!
//! `weather` runs automatically. `send_message` requires approval and only
//! records what it would have sent.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use crate::tools::tool::{AgentTool, Tool, ToolExecutionContext};
use crate::tools::types::AgentToolParameters;

const CONDITIONS: [&str; 5] = ["sunny", "cloudy", "rain", "snow", "windy"];

/// Deterministic mock forecast for a location.
pub fn weather_tool() -> Arc<dyn Tool> {
    Arc::new(AgentTool::new(
        "weather",
        "Get the current weather for a location",
        AgentToolParameters::object()
            .string("location", "City or place name", true)
            .string_enum("unit", "Temperature unit", &["celsius", "fahrenheit"], false)
            .build(),
        |args, _ctx: ToolExecutionContext| async move {
            let location = args.get_str("location")?.trim().to_string();
            let fahrenheit = args.get_str_opt("unit") == Some("fahrenheit");

            let seed = location
                .bytes()
                .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b.to_ascii_lowercase())));
            let celsius = i64::from(seed % 35) - 5;
            let temperature = if fahrenheit { celsius * 9 / 5 + 32 } else { celsius };

            Ok(json!({
                "location": location,
                "temperature": temperature,
                "unit": if fahrenheit { "fahrenheit" } else { "celsius" },
                "condition": CONDITIONS[(seed as usize) % CONDITIONS.len()],
            }))
        },
    ))
}

#[derive(Deserialize)]
struct SendMessageInput {
    channel: String,
    text: String,
}

/// Pretend to post a message to a chat channel. Needs approval.
pub fn send_message_tool() -> Arc<dyn Tool> {
    Arc::new(
        AgentTool::new(
            "send_message",
            "Post a message to a chat channel",
            AgentToolParameters::object()
                .string("channel", "Channel name", true)
                .string("text", "Message body", true)
                .build(),
            |args, ctx: ToolExecutionContext| async move {
                let input: SendMessageInput = args.parse()?;
                tracing::info!(channel = %input.channel, call_id = %ctx.call_id, "message sent");
                Ok(json!({
                    "delivered": true,
                    "channel": input.channel,
                    "characters": input.text.chars().count(),
                }))
            },
        )
        .with_approval(),
    )
}

/// Every built-in tool.
pub fn all_tools() -> Vec<Arc<dyn Tool>> {
    vec![weather_tool(), send_message_tool()]
}
