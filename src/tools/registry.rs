//! Named tool collection and allow-list exposure.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::tool::Tool;
use super::types::ToolDefinition;
use crate::config::AllowedTool;

/// Every tool the application knows about, by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool of the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            debug!(tool = %name, "replaced registered tool");
        }
    }

    /// Register every tool in order; later names replace earlier ones.
    pub fn register_all(&mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) {
        for tool in tools {
            self.register(tool);
        }
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    /// The tools a run may use. Nothing is exposed unless it is on the
    /// allow-list; listed names that are not registered are skipped.
    pub fn expose(&self, allow_list: Option<&[AllowedTool]>) -> ToolSet {
        let mut exposed = Vec::new();
        for allowed in allow_list.unwrap_or_default() {
            let Some(tool) = self.tools.get(&allowed.name) else {
                warn!(tool = %allowed.name, "allow-listed tool is not registered");
                continue;
            };
            if exposed.iter().any(|e: &ExposedTool| e.name() == allowed.name) {
                continue;
            }
            exposed.push(ExposedTool {
                needs_approval: allowed.needs_approval.unwrap_or_else(|| tool.needs_approval()),
                tool: Arc::clone(tool),
            });
        }
        ToolSet { tools: exposed }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.tools.keys()).finish()
    }
}

/// A tool as exposed to one run, with its effective approval requirement.
#[derive(Clone)]
pub struct ExposedTool {
    tool: Arc<dyn Tool>,
    needs_approval: bool,
}

impl ExposedTool {
    pub fn name(&self) -> &str {
        self.tool.name()
    }

    pub fn needs_approval(&self) -> bool {
        self.needs_approval
    }

    pub fn tool(&self) -> &Arc<dyn Tool> {
        &self.tool
    }
}

/// The tools exposed for one run.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<ExposedTool>,
}

impl ToolSet {
    pub fn get(&self, name: &str) -> Option<&ExposedTool> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.tool.definition()).collect()
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.tools.iter().map(|t| (t.name(), t.needs_approval)))
            .finish()
    }
}
