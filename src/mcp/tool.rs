//! MCP server tools as registry tools.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::client::{McpClient, McpSession, McpToolSchema};
use crate::error::Result;
use crate::tools::{AgentToolParameters, Tool, ToolArguments, ToolExecutionContext};

/// One remote tool. Calls are forwarded to the server that listed it.
pub struct McpTool {
    name: String,
    description: String,
    parameters: AgentToolParameters,
    needs_approval: bool,
    session: Arc<dyn McpSession>,
}

impl McpTool {
    pub fn new(schema: McpToolSchema, session: Arc<dyn McpSession>) -> Self {
        Self {
            name: schema.name,
            description: schema.description.unwrap_or_default(),
            parameters: AgentToolParameters::from_schema(schema.input_schema),
            needs_approval: false,
            session,
        }
    }

    /// Require a human decision before each call.
    pub fn with_approval(mut self) -> Self {
        self.needs_approval = true;
        self
    }

    pub fn server(&self) -> &str {
        self.session.server()
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &AgentToolParameters {
        &self.parameters
    }

    fn needs_approval(&self) -> bool {
        self.needs_approval
    }

    async fn execute(&self, args: &ToolArguments, _ctx: &ToolExecutionContext) -> Result<serde_json::Value> {
        self.session.call_tool(&self.name, args.raw().clone()).await
    }
}

impl std::fmt::Debug for McpTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpTool")
            .field("name", &self.name)
            .field("server", &self.session.server())
            .finish()
    }
}

/// The tools `session` lists, optionally narrowed to the names in `filter`.
pub async fn tools_from_session(session: Arc<dyn McpSession>, filter: Option<&[String]>) -> Result<Vec<Arc<dyn Tool>>> {
    let listed = session.list_tools().await?;
    let mut tools: Vec<Arc<dyn Tool>> = Vec::with_capacity(listed.len());
    for schema in listed {
        if filter.is_some_and(|names| !names.contains(&schema.name)) {
            continue;
        }
        info!(
            server = session.server(),
            tool = %schema.name,
            description = schema.description.as_deref().unwrap_or(""),
            "MCP tool available"
        );
        tools.push(Arc::new(McpTool::new(schema, Arc::clone(&session))));
    }
    Ok(tools)
}

/// Connect to every server in order and collect their tools.
///
/// The first server that cannot be reached or listed fails the whole load.
/// When two servers list the same name, the later one wins once the tools
/// are registered.
pub async fn load_mcp_tools(urls: &[String], filter: Option<&[String]>) -> Result<Vec<Arc<dyn Tool>>> {
    let mut tools = Vec::new();
    for url in urls {
        let session: Arc<dyn McpSession> = Arc::new(McpClient::connect(url).await?);
        tools.extend(tools_from_session(session, filter).await?);
    }
    Ok(tools)
}
