//! Provider for any OpenAI-compatible chat-completions endpoint.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use tracing::debug;

use super::format::{format_messages, format_tools};
use super::http::{bearer_headers, shared_client, status_to_error, Operation};
use super::sanitize::pair_tool_results;
use super::{ModelProvider, ModelRequest};
use crate::config::ProviderConfig;
use crate::decoder::decode_stream;
use crate::error::{Result, StepLoopError};
use crate::transport::TurnCancellation;
use crate::types::EventStream;

/// Talks to `/chat/completions` on a configured base URL.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    config: ProviderConfig,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn build_request_body(&self, request: &ModelRequest) -> serde_json::Value {
        let turns = pair_tool_results(&request.messages);
        let mut body = json!({
            "model": request.model,
            "messages": format_messages(request.instructions.as_deref(), &turns),
            "stream": request.stream,
        });

        if request.stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        if !request.tools.is_empty() {
            body["tools"] = json!(format_tools(&request.tools));
        }

        let settings = &request.settings;
        if let Some(max_tokens) = settings.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = settings.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(top_p) = settings.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(ref stop) = settings.stop_sequences {
            body["stop"] = json!(stop);
        }
        if let Some(seed) = settings.seed {
            body["seed"] = json!(seed);
        }
        if let Some(ref user) = settings.user {
            body["user"] = json!(user);
        }
        body
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatibleProvider {
    fn provider_name(&self) -> &str {
        "openai-compatible"
    }

    async fn invoke(&self, request: &ModelRequest, cancel: TurnCancellation) -> Result<EventStream> {
        let body = self.build_request_body(request);
        let operation = Operation::ChatCompletions;
        let url = operation.url(&self.config.base_url);

        debug!(
            model = %request.model,
            %operation,
            stream = request.stream,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "invoking model"
        );

        let send = shared_client()
            .request(operation.method(), &url)
            .headers(bearer_headers(self.config.api_key.as_deref(), request.stream))
            .json(&body)
            .send();

        let Some(response) = cancel.run(send).await else {
            debug!("request cancelled before a response arrived");
            return Ok(Box::pin(futures::stream::empty()));
        };
        let response = response?;

        let status = response.status();
        if !status.is_success() {
            let body_text = cancel.run(response.text()).await.and_then(|r| r.ok()).unwrap_or_default();
            return Err(status_to_error(status.as_u16(), &body_text));
        }

        let bytes = response.bytes_stream().map(|chunk| chunk.map_err(StepLoopError::from));
        Ok(decode_stream(bytes, cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolDefinition;
    use crate::types::{GenerationSettings, Turn};

    fn provider() -> OpenAiCompatibleProvider {
        OpenAiCompatibleProvider::new(ProviderConfig::new("http://localhost:1/v1")).unwrap()
    }

    fn request(stream: bool) -> ModelRequest {
        ModelRequest {
            model: "m".into(),
            instructions: None,
            messages: vec![Turn::user("hi")],
            tools: Vec::new(),
            stream,
            settings: GenerationSettings::default(),
        }
    }

    #[test]
    fn streaming_requests_ask_for_usage() {
        let body = provider().build_request_body(&request(true));
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert!(body.get("tools").is_none());

        let body = provider().build_request_body(&request(false));
        assert!(body.get("stream_options").is_none());
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn settings_and_tools_are_forwarded() {
        let mut req = request(true);
        req.settings = GenerationSettings::builder().temperature(0.2).max_tokens(64).build();
        req.tools = vec![ToolDefinition {
            name: "weather".into(),
            description: "forecast".into(),
            parameters: json!({"type": "object"}),
        }];

        let body = provider().build_request_body(&req);
        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["tools"][0]["function"]["name"], "weather");
    }

    #[test]
    fn hosted_endpoint_without_key_is_rejected() {
        assert!(OpenAiCompatibleProvider::new(ProviderConfig::default()).is_err());
    }
}
