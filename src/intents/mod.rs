//! Structured intent extraction. Each extractor is one schema-bound model call plus the
//! deterministic heuristics around it; the regex pre-filters in [`prefilter`] run before
//! any model call.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::{KitchenPaError, Result};
use crate::interfaces::providers::LlmProvider;

pub mod prefilter;
pub mod priority;
pub mod reclassify;
pub mod resolve;
pub mod schedule;

/// Runs one schema-bound call. Transport failures propagate; a reply that is not JSON or
/// does not fit `T` is an abstention (`None`).
pub async fn extract<T: DeserializeOwned>(
    llm: &dyn LlmProvider,
    system_prompt: &str,
    text: &str,
    schema: Value,
) -> Result<Option<T>> {
    let name = schema
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("structured_output")
        .to_string();
    let value = match llm.parse_structured_output(text, system_prompt, schema).await {
        Ok(value) => value,
        Err(KitchenPaError::Serialization(reason)) => {
            tracing::warn!(extractor = %name, reason = %reason, "Extractor reply was not JSON");
            return Ok(None);
        }
        Err(err) => return Err(err),
    };
    match serde_json::from_value::<T>(value) {
        Ok(parsed) => Ok(Some(parsed)),
        Err(err) => {
            tracing::warn!(extractor = %name, error = %err, "Extractor reply failed validation");
            Ok(None)
        }
    }
}

pub(crate) fn nullable_string() -> Value {
    json!({"type": ["string", "null"]})
}

pub(crate) fn nullable_enum(values: &[&str]) -> Value {
    let mut options: Vec<Value> = values.iter().map(|v| json!(v)).collect();
    options.push(Value::Null);
    json!({"type": ["string", "null"], "enum": options})
}

pub(crate) fn string_enum(values: &[&str]) -> Value {
    json!({"type": "string", "enum": values})
}

/// Strict object schema: every property required, nothing extra.
pub(crate) fn object_schema(properties: Vec<(&str, Value)>) -> Value {
    let required: Vec<Value> = properties.iter().map(|(name, _)| json!(name)).collect();
    let mut props = serde_json::Map::new();
    for (name, schema) in properties {
        props.insert(name.to_string(), schema);
    }
    json!({
        "type": "object",
        "properties": Value::Object(props),
        "required": required,
        "additionalProperties": false
    })
}

pub(crate) fn titled(title: &str, mut schema: Value) -> Value {
    if let Value::Object(map) = &mut schema {
        map.insert("title".to_string(), json!(title));
    }
    schema
}

/// Drops blank strings and the literal "null" some models emit.
pub(crate) fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null"))
}
