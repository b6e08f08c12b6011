//! Local tool execution for the loop.

use futures::future;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::tools::arguments::ToolArguments;
use crate::tools::tool::ToolExecutionContext;
use crate::tools::validation::validate_arguments;
use crate::tools::ToolSet;
use crate::transport::TurnCancellation;
use crate::types::{ToolCall, ToolCallPayload, Turn};

use super::events::LoopEvent;

/// The result of one tool call, ready to be appended to history.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ToolOutcome {
    pub(crate) call: ToolCall,
    pub(crate) output: Value,
    pub(crate) is_error: bool,
}

impl ToolOutcome {
    fn error(call: &ToolCall, message: impl Into<String>) -> Self {
        Self {
            call: call.clone(),
            output: json!({ "error": message.into() }),
            is_error: true,
        }
    }

    pub(crate) fn declined(call: &ToolCall) -> Self {
        Self::error(call, "approval declined")
    }

    pub(crate) fn canceled(call: &ToolCall) -> Self {
        Self::error(call, "canceled")
    }

    fn payload(&self) -> ToolCallPayload {
        ToolCallPayload::completed(&self.call.name, &self.call.input, &self.output)
    }

    /// The replayable result Turn followed by its display mirror.
    pub(crate) fn turns(&self) -> Vec<Turn> {
        vec![
            Turn::tool_result(&self.call, self.output.clone(), self.is_error),
            Turn::ToolResultDisplay {
                payload: self.payload(),
            },
        ]
    }

    pub(crate) fn event(&self) -> LoopEvent {
        LoopEvent::ToolActivity {
            call_id: self.call.call_id.clone(),
            payload: self.payload(),
            is_error: self.is_error,
        }
    }
}

/// Run one call against the exposed tools. Failures of any kind become an
/// error payload; nothing here aborts the turn.
pub(crate) async fn execute_tool_call(
    tools: &ToolSet,
    call: &ToolCall,
    cancel: &TurnCancellation,
) -> ToolOutcome {
    let Some(exposed) = tools.get(&call.name) else {
        warn!(tool = %call.name, call_id = %call.call_id, "model called a tool that is not exposed");
        return ToolOutcome::error(call, format!("Tool '{}' not found", call.name));
    };
    let tool = exposed.tool();

    let args = ToolArguments::new(call.input.clone());
    if let Err(reason) = validate_arguments(args.raw(), &tool.parameters().schema) {
        debug!(tool = %call.name, %reason, "tool arguments rejected");
        return ToolOutcome::error(call, format!("Argument validation failed: {reason}"));
    }

    let ctx = ToolExecutionContext {
        call_id: call.call_id.clone(),
        tool_name: call.name.clone(),
        cancellation: cancel.child(),
    };
    debug!(tool = %call.name, call_id = %call.call_id, "executing tool");
    match cancel.run(tool.execute(&args, &ctx)).await {
        None => ToolOutcome::canceled(call),
        Some(Ok(output)) => ToolOutcome {
            call: call.clone(),
            output,
            is_error: false,
        },
        Some(Err(err)) => {
            warn!(tool = %call.name, error = %err, "tool execution failed");
            ToolOutcome::error(call, err.to_string())
        }
    }
}

/// Run independent calls concurrently; outcomes keep the order of `calls`.
pub(crate) async fn execute_parallel_tool_calls(
    tools: &ToolSet,
    calls: &[ToolCall],
    cancel: &TurnCancellation,
) -> Vec<ToolOutcome> {
    future::join_all(calls.iter().map(|call| execute_tool_call(tools, call, cancel))).await
}
