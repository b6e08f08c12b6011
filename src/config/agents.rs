//! Agent definitions loaded from TOML files.
//!
//! Each `*.toml` file in an agents directory describes one agent:
//!
//! ```toml
//! id = "weather"
//! model = "gpt-4o-mini"
//! description = "Answers weather questions"
//! instruction = "Be brief."
//! max_steps = 3
//! mcp_servers = ["http://localhost:8000/mcp"]
//!
//! [[tools]]
//! name = "weather"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{AllowedTool, LoopConfig};
use crate::error::{Result, StepLoopError};

const AGENT_FILE_EXTENSION: &str = "toml";

fn default_enabled() -> bool {
    true
}

/// A tool listed by an agent definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentToolEntry {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub needs_approval: Option<bool>,
}

/// One agent file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub model: String,
    pub description: String,
    pub instruction: String,
    pub max_steps: usize,
    #[serde(default)]
    pub tools: Vec<AgentToolEntry>,
    /// MCP servers whose tools are added to this agent's tools.
    #[serde(default)]
    pub mcp_servers: Vec<String>,
}

impl AgentDefinition {
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| StepLoopError::Configuration(format!("invalid agent definition: {e}")))
    }

    /// Loop settings for this agent. The tool list becomes the allow-list.
    pub fn to_loop_config(&self) -> LoopConfig {
        let tools = self
            .tools
            .iter()
            .map(|entry| AllowedTool {
                name: entry.name.clone(),
                needs_approval: entry.needs_approval,
            })
            .collect();

        LoopConfig::builder()
            .model(self.model.clone())
            .instructions(self.instruction.clone())
            .max_steps(self.max_steps)
            .tools(tools)
            .build()
    }
}

#[derive(Debug, Clone)]
struct AgentFile {
    stem: String,
    definition: AgentDefinition,
}

/// All valid agent definitions found in one directory, in file-name order.
#[derive(Debug, Clone, Default)]
pub struct AgentCatalog {
    agents: Vec<AgentFile>,
}

impl AgentCatalog {
    /// `~/.steploop/agents`, falling back to a relative path.
    pub fn default_dir() -> PathBuf {
        directories::UserDirs::new()
            .map(|dirs| dirs.home_dir().join(".steploop").join("agents"))
            .unwrap_or_else(|| PathBuf::from(".steploop").join("agents"))
    }

    /// Load every `*.toml` file in `dir`. A missing directory yields an empty
    /// catalog; files that fail to parse are skipped with a warning.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %dir.display(), "agents directory not found");
                return Ok(Self::default());
            }
            Err(err) => return Err(err.into()),
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(AGENT_FILE_EXTENSION))
            .collect();
        paths.sort();

        let mut agents = Vec::new();
        for path in paths {
            let parsed = fs::read_to_string(&path)
                .map_err(StepLoopError::from)
                .and_then(|raw| AgentDefinition::from_toml(&raw));
            match parsed {
                Ok(definition) => {
                    let stem = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .unwrap_or_default()
                        .to_string();
                    agents.push(AgentFile { stem, definition });
                }
                Err(err) => warn!(path = %path.display(), error = %err, "skipping invalid agent file"),
            }
        }
        Ok(Self { agents })
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn definitions(&self) -> impl Iterator<Item = &AgentDefinition> {
        self.agents.iter().map(|a| &a.definition)
    }

    /// Look up by explicit id, then by file stem, then fall back to the
    /// first enabled agent.
    pub fn find(&self, id: &str) -> Option<&AgentDefinition> {
        self.agents
            .iter()
            .find(|a| a.definition.id.as_deref() == Some(id))
            .or_else(|| self.agents.iter().find(|a| a.stem == id))
            .map(|a| &a.definition)
            .or_else(|| self.first_enabled())
    }

    /// First enabled agent, or the first agent at all.
    pub fn default_agent(&self) -> Option<&AgentDefinition> {
        self.first_enabled()
            .or_else(|| self.agents.first().map(|a| &a.definition))
    }

    fn first_enabled(&self) -> Option<&AgentDefinition> {
        self.agents
            .iter()
            .map(|a| &a.definition)
            .find(|d| d.enabled)
    }
}
