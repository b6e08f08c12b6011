//! Configuration: provider endpoint, loop settings, agent definitions.
//!
//! Every value the loop depends on is passed in explicitly. Environment
//! variables are read only by [`ProviderConfig::from_env`], at the edge.

pub mod agents;

pub use agents::{AgentCatalog, AgentDefinition, AgentToolEntry};

use std::fmt;

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StepLoopError};
use crate::history::ReplayMode;
use crate::types::GenerationSettings;

/// Default number of model invocations per user turn.
pub const DEFAULT_MAX_STEPS: usize = 5;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Where and how to reach an OpenAI-compatible endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub default_model: Option<String>,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| ".."))
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl ProviderConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            default_model: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Load from the environment (and a `.env` file if present).
    ///
    /// `STEPLOOP_*` variables win over their `OPENAI_*` counterparts.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let first = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| lookup(name).filter(|v| !v.trim().is_empty()))
        };

        let base_url = first(&["STEPLOOP_BASE_URL", "OPENAI_BASE_URL"])
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: first(&["STEPLOOP_API_KEY", "OPENAI_API_KEY"]),
            default_model: first(&["STEPLOOP_MODEL"]),
        }
    }

    /// Whether this endpoint is the hosted OpenAI API, which always needs a key.
    pub fn is_hosted_openai(&self) -> bool {
        self.base_url.starts_with(DEFAULT_BASE_URL)
    }

    /// Reject configurations that cannot work: an empty base URL, or the
    /// hosted API without a key. Local servers may run without one.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(StepLoopError::Configuration("base URL is empty".to_string()));
        }
        if self.is_hosted_openai() && self.api_key.is_none() {
            return Err(StepLoopError::Configuration(
                "no API key configured (set STEPLOOP_API_KEY or OPENAI_API_KEY)".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

/// One entry of a tool allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedTool {
    pub name: String,
    /// Overrides the tool's own approval requirement when set.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "needs_approval")]
    pub needs_approval: Option<bool>,
}

impl AllowedTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            needs_approval: None,
        }
    }

    pub fn requiring_approval(name: impl Into<String>, needs_approval: bool) -> Self {
        Self {
            name: name.into(),
            needs_approval: Some(needs_approval),
        }
    }
}

/// Settings for one run of the tool loop.
#[derive(Debug, Clone, Builder, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
    #[builder(into)]
    pub model: String,
    /// System instructions prepended to every invocation.
    #[builder(into)]
    pub instructions: Option<String>,
    /// Maximum model invocations for one user turn.
    #[builder(default = DEFAULT_MAX_STEPS)]
    pub max_steps: usize,
    /// Tool allow-list. `None` or empty exposes no tools.
    pub tools: Option<Vec<AllowedTool>>,
    #[builder(default)]
    pub replay_mode: ReplayMode,
    #[builder(default)]
    pub settings: GenerationSettings,
    #[builder(default = true)]
    pub stream: bool,
}
