//! Shallow JSON Schema checks run before a tool is dispatched.

use serde_json::Value;

use crate::error::AgentError;

/// Check `args` against `schema`.
///
/// Covers the top-level type, required fields, primitive property types and
/// string enums. Nested schemas are left to the tool.
pub fn validate_arguments(args: &Value, schema: &Value) -> Result<(), AgentError> {
    if schema.get("type").and_then(Value::as_str) == Some("object") && !args.is_object() {
        return Err(invalid(format!(
            "expected object arguments, got {}",
            type_name(args)
        )));
    }
    let Some(fields) = args.as_object() else {
        return Ok(());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        if let Some(name) = required
            .iter()
            .filter_map(Value::as_str)
            .find(|name| !fields.contains_key(*name))
        {
            return Err(invalid(format!("missing required field '{name}'")));
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };
    for (key, value) in fields {
        let Some(property) = properties.get(key) else {
            continue;
        };
        if let Some(expected) = property.get("type").and_then(Value::as_str) {
            if !matches_type(value, expected) {
                return Err(invalid(format!(
                    "field '{key}' expected type '{expected}', got {}",
                    type_name(value)
                )));
            }
        }
        if let Some(allowed) = property.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                return Err(invalid(format!("field '{key}' is not one of {}", Value::Array(allowed.clone()))));
            }
        }
    }
    Ok(())
}

fn invalid(message: String) -> AgentError {
    AgentError::InvalidArgument(message)
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
