//! Typed access to tool call input.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Result, StepLoopError};

/// Model-supplied input for one tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolArguments {
    value: Value,
}

impl ToolArguments {
    /// Wrap raw input. A JSON-encoded string is decoded first; an empty
    /// string means no arguments.
    pub fn new(value: Value) -> Self {
        let value = match value {
            Value::String(raw) if raw.trim().is_empty() => Value::Object(Default::default()),
            Value::String(raw) => serde_json::from_str(raw.trim()).unwrap_or(Value::String(raw)),
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        Self { value }
    }

    pub fn raw(&self) -> &Value {
        &self.value
    }

    fn missing(kind: &str, key: &str) -> StepLoopError {
        StepLoopError::InvalidArgument(format!("missing {kind} argument '{key}'"))
    }

    pub fn get_str(&self, key: &str) -> Result<&str> {
        self.get_str_opt(key).ok_or_else(|| Self::missing("string", key))
    }

    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(Value::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Result<f64> {
        self.value
            .get(key)
            .and_then(Value::as_f64)
            .ok_or_else(|| Self::missing("number", key))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        self.value
            .get(key)
            .and_then(Value::as_bool)
            .ok_or_else(|| Self::missing("boolean", key))
    }

    /// Deserialize the whole input into `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.value.clone())
            .map_err(|e| StepLoopError::InvalidArgument(format!("cannot decode arguments: {e}")))
    }
}
