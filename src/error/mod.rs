//! Error types for steploop.

use thiserror::Error;

/// Primary error type for all steploop operations.
#[derive(Error, Debug)]
pub enum StepLoopError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed line or payload in the response stream.
    #[error("Framing error: {0}")]
    Framing(String),

    /// Structured error reported by the model provider.
    #[error("Provider error: {message}")]
    Provider { message: String },

    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    /// Connecting to or talking with an MCP server failed.
    #[error("MCP error: {0}")]
    Mcp(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("A turn is already in flight for this conversation")]
    TurnInFlight,

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Rejection reasons for an approval decision.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("unknown approval id '{0}'")]
    Unknown(String),

    #[error("approval '{0}' was already resolved")]
    AlreadyResolved(String),

    #[error("approval '{0}' belongs to an earlier turn")]
    Expired(String),

    #[error("approval '{0}' was decided twice in one batch")]
    Duplicate(String),
}

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Framing,
    Provider,
    Approval,
    Authentication,
    RateLimit,
    Network,
    Server,
    Api,
    Configuration,
    Serialization,
    ToolExecution,
    Unknown,
}

impl StepLoopError {
    /// Create an API error from a status code and message.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a provider error from a human-readable message.
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Framing(_) => ErrorCategory::Framing,
            Self::Provider { .. } => ErrorCategory::Provider,
            Self::Approval(_) => ErrorCategory::Approval,
            Self::Network(_) => ErrorCategory::Network,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::ToolExecution { .. } => ErrorCategory::ToolExecution,
            Self::Api { status, .. } => match status {
                401 | 403 => ErrorCategory::Authentication,
                429 => ErrorCategory::RateLimit,
                500..=599 => ErrorCategory::Server,
                _ => ErrorCategory::Api,
            },
            _ => ErrorCategory::Unknown,
        }
    }

    /// Whether the failure came from the provider side rather than our framing.
    ///
    /// Provider-side failures are rendered into the assistant text channel.
    pub fn is_provider_side(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Provider
                | ErrorCategory::Authentication
                | ErrorCategory::RateLimit
                | ErrorCategory::Server
                | ErrorCategory::Api
        )
    }

    /// Whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RateLimit | ErrorCategory::Network | ErrorCategory::Server
        )
    }
}

/// Render a provider error payload as a human-readable message.
///
/// Accepts a bare string, `{ "error": { "message": .. } }`, `{ "error": ".." }`,
/// `{ "message": .. }`, or an object carrying a JSON `responseBody` string.
pub fn describe_provider_error(payload: &serde_json::Value) -> String {
    const UNKNOWN: &str = "Unknown error";

    if let Some(text) = payload.as_str() {
        return text.to_string();
    }
    if let Some(error) = payload.get("error") {
        if let Some(text) = error.as_str() {
            return text.to_string();
        }
        if let Some(message) = error.get("message").and_then(|m| m.as_str()) {
            return message.to_string();
        }
    }
    if let Some(message) = payload.get("message").and_then(|m| m.as_str()) {
        return message.to_string();
    }
    if let Some(body) = payload.get("responseBody").and_then(|b| b.as_str()) {
        return match serde_json::from_str::<serde_json::Value>(body) {
            Ok(parsed) => parsed
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or(UNKNOWN)
                .to_string(),
            Err(_) => body.to_string(),
        };
    }
    UNKNOWN.to_string()
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, StepLoopError>;
