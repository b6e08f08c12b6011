//! Tool parameter schemas and model-facing definitions.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// JSON Schema describing a tool's input object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentToolParameters {
    pub schema: Value,
}

impl AgentToolParameters {
    pub fn from_schema(schema: Value) -> Self {
        Self { schema }
    }

    /// An object schema with no properties.
    pub fn empty() -> Self {
        Self::object().build()
    }

    pub fn object() -> ParameterBuilder {
        ParameterBuilder::default()
    }
}

/// Builds an object schema one property at a time.
#[derive(Debug, Default)]
pub struct ParameterBuilder {
    properties: Map<String, Value>,
    required: Vec<String>,
}

impl ParameterBuilder {
    fn property(mut self, name: impl Into<String>, schema: Value, required: bool) -> Self {
        let name = name.into();
        if required {
            self.required.push(name.clone());
        }
        self.properties.insert(name, schema);
        self
    }

    pub fn string(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        let schema = json!({ "type": "string", "description": description.into() });
        self.property(name, schema, required)
    }

    pub fn number(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        let schema = json!({ "type": "number", "description": description.into() });
        self.property(name, schema, required)
    }

    pub fn boolean(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        let schema = json!({ "type": "boolean", "description": description.into() });
        self.property(name, schema, required)
    }

    pub fn string_enum(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        values: &[&str],
        required: bool,
    ) -> Self {
        let schema = json!({ "type": "string", "description": description.into(), "enum": values });
        self.property(name, schema, required)
    }

    pub fn build(self) -> AgentToolParameters {
        AgentToolParameters {
            schema: json!({
                "type": "object",
                "properties": self.properties,
                "required": self.required,
            }),
        }
    }
}

/// What the model is told about one exposed tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}
