//! Shared HTTP client, auth headers, and the operation table.

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use strum::Display;

use crate::error::{describe_provider_error, StepLoopError};

static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Get (or create) the shared reqwest client.
pub fn shared_client() -> &'static reqwest::Client {
    SHARED_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new())
    })
}

/// JSON headers, plus a Bearer token when a key is configured.
pub fn bearer_headers(api_key: Option<&str>, streaming: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if streaming {
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
    }
    if let Some(key) = api_key {
        if let Ok(val) = HeaderValue::from_str(&format!("Bearer {key}")) {
            headers.insert(AUTHORIZATION, val);
        }
    }
    headers
}

/// Upstream operations this crate knows how to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    ChatCompletions,
}

impl Operation {
    pub fn method(self) -> Method {
        match self {
            Self::ChatCompletions => Method::POST,
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            Self::ChatCompletions => "/chat/completions",
        }
    }

    pub fn url(self, base_url: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), self.path())
    }
}

/// Map a non-success response to an error carrying the human-readable
/// message from the body.
pub fn status_to_error(status: u16, body: &str) -> StepLoopError {
    let message = match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => describe_provider_error(&value),
        Err(_) if body.trim().is_empty() => format!("HTTP {status}"),
        Err(_) => body.trim().to_string(),
    };
    StepLoopError::api(status, message)
}
