//! Tool trait and closure-based tool wrapper.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use super::arguments::ToolArguments;
use super::types::{AgentToolParameters, ToolDefinition};
use crate::error::Result;
use crate::transport::TurnCancellation;

/// Context available during tool execution.
#[derive(Debug, Clone, Default)]
pub struct ToolExecutionContext {
    pub call_id: String,
    pub tool_name: String,
    /// Cancelled together with the turn that requested the call.
    pub cancellation: TurnCancellation,
}

/// A capability the model may invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model calls the tool by.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters(&self) -> &AgentToolParameters;

    /// Whether a human must approve each call before it runs.
    fn needs_approval(&self) -> bool {
        false
    }

    async fn execute(&self, args: &ToolArguments, ctx: &ToolExecutionContext) -> Result<serde_json::Value>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters().schema.clone(),
        }
    }
}

type ToolHandler = dyn Fn(ToolArguments, ToolExecutionContext) -> Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>>
    + Send
    + Sync;

/// Tool backed by an async closure.
pub struct AgentTool {
    name: String,
    description: String,
    parameters: AgentToolParameters,
    needs_approval: bool,
    handler: Arc<ToolHandler>,
}

impl AgentTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: AgentToolParameters,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolArguments, ToolExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            needs_approval: false,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        }
    }

    /// Require a human decision before each execution.
    pub fn with_approval(mut self) -> Self {
        self.needs_approval = true;
        self
    }
}

#[async_trait]
impl Tool for AgentTool {
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

    async fn execute(&self, args: &ToolArguments, ctx: &ToolExecutionContext) -> Result<serde_json::Value> {
        (self.handler)(args.clone(), ctx.clone()).await
    }
}

impl std::fmt::Debug for AgentTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentTool")
            .field("name", &self.name)
            .field("needs_approval", &self.needs_approval)
            .finish()
    }
}
