//! Connection to one MCP server over streamable HTTP.

use async_trait::async_trait;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, ClientInfo, Content, JsonObject, ProtocolVersion, ResourceContents,
};
use rmcp::service::{ClientInitializeError, Peer, RoleClient, RunningService, ServiceError, ServiceExt};
use rmcp::transport::StreamableHttpClientTransport;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, StepLoopError};

type McpRunningService = RunningService<RoleClient, ClientInfo>;

/// A tool as listed by an MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolSchema {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

/// The operations the tool adapter needs from a server connection.
#[async_trait]
pub trait McpSession: Send + Sync {
    /// Where the tools come from, for logs and error messages.
    fn server(&self) -> &str;

    async fn list_tools(&self) -> Result<Vec<McpToolSchema>>;

    async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<serde_json::Value>;
}

/// An initialized MCP client session.
pub struct McpClient {
    server: String,
    peer: Peer<RoleClient>,
    session: Mutex<Option<McpRunningService>>,
}

impl McpClient {
    /// Connect to `url` and run the initialize handshake.
    pub async fn connect(url: &str) -> Result<Self> {
        let transport = StreamableHttpClientTransport::from_uri(url);
        let client_info = ClientInfo {
            protocol_version: ProtocolVersion::LATEST,
            ..Default::default()
        };
        let session = client_info
            .serve(transport)
            .await
            .map_err(|e| map_initialize_error(url, e))?;
        info!(server = url, "MCP session initialized");

        Ok(Self {
            server: url.to_string(),
            peer: session.peer().clone(),
            session: Mutex::new(Some(session)),
        })
    }

    /// End the session. Later calls fail with a transport error.
    pub async fn close(&self) {
        if let Some(session) = self.session.lock().await.take() {
            if let Err(err) = session.cancel().await {
                debug!(server = %self.server, error = %err, "MCP session did not shut down cleanly");
            }
        }
    }
}

#[async_trait]
impl McpSession for McpClient {
    fn server(&self) -> &str {
        &self.server
    }

    async fn list_tools(&self) -> Result<Vec<McpToolSchema>> {
        let tools = self
            .peer
            .list_all_tools()
            .await
            .map_err(|e| map_service_error("list_tools", e))?;
        Ok(tools.into_iter().map(map_tool_schema).collect())
    }

    async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<serde_json::Value> {
        let arguments = coerce_tool_arguments(arguments)?;
        let result = self
            .peer
            .call_tool(CallToolRequestParams {
                meta: None,
                name: name.to_owned().into(),
                arguments,
                task: None,
            })
            .await
            .map_err(|e| map_service_error("call_tool", e))?;
        map_call_result(name, result)
    }
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient").field("server", &self.server).finish()
    }
}

fn map_tool_schema(tool: rmcp::model::Tool) -> McpToolSchema {
    McpToolSchema {
        name: tool.name.to_string(),
        description: tool.description.map(|d| d.to_string()),
        input_schema: serde_json::Value::Object((*tool.input_schema).clone()),
    }
}

/// Tool arguments as the JSON object MCP expects. A JSON string holding an
/// object is accepted too.
fn coerce_tool_arguments(value: serde_json::Value) -> Result<Option<JsonObject>> {
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Object(map) => Ok(Some(map)),
        serde_json::Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            let parsed: serde_json::Value = serde_json::from_str(trimmed).map_err(|e| {
                StepLoopError::InvalidArgument(format!("MCP tool arguments must be valid JSON: {e}"))
            })?;
            coerce_tool_arguments(parsed)
        }
        other => Err(StepLoopError::InvalidArgument(format!(
            "MCP tool arguments must be a JSON object; got {other}"
        ))),
    }
}

fn extract_text_content(content: &[Content]) -> Option<String> {
    let mut lines = Vec::new();
    for item in content {
        if let Some(text) = item.as_text() {
            lines.push(text.text.clone());
            continue;
        }
        if let Some(resource) = item.as_resource() {
            if let ResourceContents::TextResourceContents { text, .. } = &resource.resource {
                lines.push(text.clone());
            }
        }
    }
    (!lines.is_empty()).then(|| lines.join("\n"))
}

/// Structured content wins, then text, then the raw content list.
fn map_call_result(name: &str, result: CallToolResult) -> Result<serde_json::Value> {
    let text = extract_text_content(&result.content);

    if result.is_error.unwrap_or(false) {
        let message = result
            .structured_content
            .as_ref()
            .map(|v| v.to_string())
            .or(text)
            .unwrap_or_else(|| "MCP tool returned an error result".into());
        return Err(StepLoopError::ToolExecution {
            tool_name: name.to_string(),
            message,
        });
    }

    if let Some(structured) = result.structured_content {
        return Ok(structured);
    }
    if let Some(text) = text {
        return Ok(serde_json::Value::String(text));
    }
    Ok(serde_json::Value::Array(
        result
            .content
            .iter()
            .filter_map(|item| serde_json::to_value(item).ok())
            .collect(),
    ))
}

fn map_initialize_error(url: &str, error: ClientInitializeError) -> StepLoopError {
    StepLoopError::Mcp(format!("initializing {url}: {error}"))
}

fn map_service_error(context: &str, error: ServiceError) -> StepLoopError {
    match error {
        ServiceError::McpError(error) => {
            StepLoopError::Mcp(format!("{context}: error {}: {}", error.code.0, error.message))
        }
        other => StepLoopError::Mcp(format!("{context}: {other}")),
    }
}
