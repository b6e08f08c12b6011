//! Top-level argument checks against a tool's JSON Schema.

use serde_json::Value;

/// Check `args` against `schema`: object type, required keys, and the
/// declared type of each present property. Returns the first violation.
pub fn validate_arguments(args: &Value, schema: &Value) -> Result<(), String> {
    let expects_object = schema.get("type").and_then(Value::as_str) == Some("object");
    let Some(object) = args.as_object() else {
        return if expects_object {
            Err(format!("expected object arguments, got {}", type_name(args)))
        } else {
            Ok(())
        };
    };

    let required = schema
        .get("required")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str);
    if let Some(missing) = required.into_iter().find(|name| !object.contains_key(*name)) {
        return Err(format!("missing required field '{missing}'"));
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };
    for (key, value) in object {
        let expected = properties
            .get(key)
            .and_then(|p| p.get("type"))
            .and_then(Value::as_str);
        if let Some(expected) = expected {
            if !matches_type(value, expected) {
                return Err(format!(
                    "field '{key}' expected type '{expected}', got {}",
                    type_name(value)
                ));
            }
        }
    }
    Ok(())
}

fn matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::types::AgentToolParameters;
    use serde_json::json;

    fn schema() -> Value {
        AgentToolParameters::object()
            .string("location", "city", true)
            .number("days", "forecast length", false)
            .build()
            .schema
    }

    #[test]
    fn accepts_valid_arguments() {
        assert!(validate_arguments(&json!({"location": "Oslo", "days": 2}), &schema()).is_ok());
    }

    #[test]
    fn reports_missing_and_mistyped_fields() {
        assert_eq!(
            validate_arguments(&json!({}), &schema()).unwrap_err(),
            "missing required field 'location'"
        );
        assert_eq!(
            validate_arguments(&json!({"location": 5}), &schema()).unwrap_err(),
            "field 'location' expected type 'string', got number"
        );
        assert!(validate_arguments(&json!("raw"), &schema()).is_err());
    }
}
