//! Convenience re-exports for common use.

pub use crate::agent_loop::{LoopEvent, ToolLoop, TurnOutcome};
pub use crate::aggregator::{DeltaAggregator, LiveView, TurnStatus};
pub use crate::config::{AllowedTool, LoopConfig, ProviderConfig};
pub use crate::error::{Result, StepLoopError};
pub use crate::history::{History, ReplayMode};
pub use crate::provider::{ModelProvider, ModelRequest, OpenAiCompatibleProvider};
pub use crate::session::{Conversation, TurnHandle};
pub use crate::tools::{AgentTool, AgentToolParameters, Tool, ToolArguments, ToolRegistry};
pub use crate::transport::TurnCancellation;
pub use crate::types::{
    ApprovalDecision, AssistantContent, FinishReason, GenerationSettings, StreamEvent, ToolCall, Turn, Usage,
};
