//! Model provider trait and the OpenAI-compatible implementation.

pub mod format;
pub mod http;
pub mod openai_compatible;
pub mod sanitize;

pub use openai_compatible::OpenAiCompatibleProvider;

use async_trait::async_trait;

use crate::error::Result;
use crate::tools::ToolDefinition;
use crate::transport::TurnCancellation;
use crate::types::{EventStream, GenerationSettings, Turn};

/// One model invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub model: String,
    /// Sent as a leading system message.
    pub instructions: Option<String>,
    /// Reconciled history, already free of display turns.
    pub messages: Vec<Turn>,
    pub tools: Vec<ToolDefinition>,
    pub stream: bool,
    pub settings: GenerationSettings,
}

/// A backend that turns a [`ModelRequest`] into a stream of events.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name for logs (e.g. "openai-compatible").
    fn provider_name(&self) -> &str;

    /// Start an invocation. The returned stream is lazy and ends quietly if
    /// `cancel` fires.
    async fn invoke(&self, request: &ModelRequest, cancel: TurnCancellation) -> Result<EventStream>;
}
