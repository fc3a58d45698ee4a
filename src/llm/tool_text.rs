use serde_json::Value;

use crate::types::tools::ToolCall;

const OPEN_TAG: &str = "<tool_call>";
const CLOSE_TAG: &str = "</tool_call>";

/// Split model prose from inline tool-call blocks.
///
/// Backends without native tool calling ask the model to emit
/// `<tool_call>{"tool_name": "...", ...input}</tool_call>` blocks. Every
/// well-formed block becomes a [`ToolCall`] whose input is the object minus
/// `tool_name`; malformed blocks are left in the prose.
pub fn split_tool_calls(text: &str) -> (String, Vec<ToolCall>) {
    let mut prose = String::new();
    let mut calls = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find(OPEN_TAG) {
        let after_open = &rest[start + OPEN_TAG.len()..];
        let Some(end) = after_open.find(CLOSE_TAG) else {
            break;
        };
        let body = &after_open[..end];
        match parse_block(body) {
            Some(call) => {
                prose.push_str(&rest[..start]);
                calls.push(call);
            }
            None => {
                tracing::warn!(block = %body.trim(), "ignoring malformed tool call block");
                prose.push_str(&rest[..start + OPEN_TAG.len() + end + CLOSE_TAG.len()]);
            }
        }
        rest = &after_open[end + CLOSE_TAG.len()..];
    }
    prose.push_str(rest);

    (prose.trim().to_string(), calls)
}

fn parse_block(body: &str) -> Option<ToolCall> {
    let Value::Object(mut fields) = serde_json::from_str::<Value>(body.trim()).ok()? else {
        return None;
    };
    let tool_name = match fields.remove("tool_name")? {
        Value::String(name) if !name.is_empty() => name,
        _ => return None,
    };
    Some(ToolCall::new(tool_name, Value::Object(fields)))
}
