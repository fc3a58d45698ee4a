//! Normalization of spawn results.
//!
//! A `spawn_agents` call resolves to `[json([{agent_type, value: envelope}])]`
//! where the envelope is itself `{type, value}`. Layered spawns wrap further.
//! Everything here peels those layers in one place so callers deal only in
//! the payloads the children produced.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::types::tools::ToolResult;

/// Strip one `{value: X}` layer, if present.
///
/// Bare values pass through, so `unwrap_value(v)` and
/// `unwrap_value({"value": v})` agree.
pub fn unwrap_value(value: &Value) -> &Value {
    match value {
        Value::Object(map) => map.get("value").unwrap_or(value),
        _ => value,
    }
}

/// Spawn payloads in request order, one slot per spawned child.
///
/// Slots stay aligned with the request: a child that produced nothing yields
/// `None` instead of shifting the rest down.
pub fn extract_spawn_slots(results: &[ToolResult]) -> Vec<Option<Value>> {
    results
        .iter()
        .filter_map(ToolResult::as_json)
        .flat_map(|payload| match payload {
            Value::Array(items) => items.iter().collect::<Vec<_>>(),
            other => vec![other],
        })
        .map(|entry| {
            // Spawn wrapper, then the child's output envelope.
            let inner = unwrap_value(unwrap_value(entry));
            (!inner.is_null()).then(|| inner.clone())
        })
        .collect()
}

/// Spawn payloads with empty results dropped.
///
/// The list may be shorter than the number of children spawned; correlate by
/// content, or use [`extract_spawn_slots`] when position matters.
pub fn extract_spawn_results(results: &[ToolResult]) -> Vec<Value> {
    extract_spawn_slots(results).into_iter().flatten().collect()
}

/// Error message of a failed child's envelope.
pub fn spawn_error(payload: &Value) -> Option<&str> {
    payload.get("error_message").and_then(Value::as_str)
}

/// Decode a payload into `T`, ignoring payloads of another shape.
pub fn decode<T: DeserializeOwned>(payload: &Value) -> Option<T> {
    match serde_json::from_value(payload.clone()) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!("spawn payload did not decode: {e}");
            None
        }
    }
}
