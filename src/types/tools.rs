use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tools executed by the driver itself rather than by a `ToolExecutor`.
pub mod builtin {
    pub const SET_OUTPUT: &str = "set_output";
    pub const SET_MESSAGES: &str = "set_messages";
    pub const ADD_MESSAGE: &str = "add_message";
    pub const SPAWN_AGENTS: &str = "spawn_agents";
    pub const END_TURN: &str = "end_turn";
}

/// A request for the host to execute one named operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub tool_name: String,

    #[serde(default)]
    pub input: Value,

    /// Assigned by the driver when the call is executed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// When false the call is executed but never appended to history.
    #[serde(default = "default_include")]
    pub include_tool_call: bool,
}

fn default_include() -> bool {
    true
}

impl ToolCall {
    #[must_use]
    pub fn new(tool_name: impl Into<String>, input: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            input,
            tool_call_id: None,
            include_tool_call: true,
        }
    }

    /// Mark the call as bookkeeping: executed, but kept out of recorded history.
    #[must_use]
    pub fn unrecorded(mut self) -> Self {
        self.include_tool_call = false;
        self
    }
}

/// Output of one tool execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResult {
    Json { value: Value },
    Media { data: String, media_type: String },
    Error { message: String },
}

impl ToolResult {
    #[must_use]
    pub fn json(value: Value) -> Self {
        Self::Json { value }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// The structured payload if this is a `json` result.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json { value } => Some(value),
            _ => None,
        }
    }

    /// The error message if this is an `error` result.
    pub fn as_error(&self) -> Option<&str> {
        match self {
            Self::Error { message } => Some(message),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_defaults_to_recorded() {
        let call: ToolCall =
            serde_json::from_str(r#"{"tool_name": "write_file", "input": {"path": "a"}}"#).unwrap();
        assert!(call.include_tool_call);
        assert_eq!(call.tool_call_id, None);
        assert!(!call.unrecorded().include_tool_call);
    }

    #[test]
    fn tool_result_is_tagged() {
        let result: ToolResult =
            serde_json::from_str(r#"{"type": "json", "value": {"ok": true}}"#).unwrap();
        assert_eq!(result.as_json().unwrap()["ok"], true);
        assert!(result.as_error().is_none());

        let err = ToolResult::error("boom");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json, serde_json::json!({"type": "error", "message": "boom"}));
        assert!(err.is_error());
    }

    #[test]
    fn media_result_roundtrips() {
        let media = ToolResult::Media {
            data: "aGk=".into(),
            media_type: "image/png".into(),
        };
        let back: ToolResult = serde_json::from_value(serde_json::to_value(&media).unwrap()).unwrap();
        assert_eq!(media, back);
        assert!(back.as_json().is_none());
    }
}
