use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::tools::builtin;
use crate::program::ProgramFactory;

/// How a finished run reports back to whoever spawned it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// The last assistant message of the run.
    #[default]
    LastMessage,
    /// Every message the run added to its history.
    AllMessages,
    /// The value last written with `set_output`.
    StructuredOutput,
}

/// What a spawner must supply: an optional prompt and an optional params object.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InputSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<Value>,
    /// JSON schema of the params object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl InputSchema {
    /// Keys listed under `params.required`.
    pub fn required_params(&self) -> Vec<&str> {
        self.params
            .as_ref()
            .and_then(|schema| schema.get("required"))
            .and_then(Value::as_array)
            .map(|keys| keys.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// Immutable configuration for one agent role.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Unique id: lowercase letters, digits and hyphens.
    pub id: String,

    #[serde(default)]
    pub display_name: String,

    /// Model override; the driver's default model is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Tools this agent may call.
    #[serde(default)]
    pub tool_names: Vec<String>,

    /// Agents this agent may spawn.
    #[serde(default)]
    pub spawnable_agents: Vec<String>,

    #[serde(default)]
    pub input_schema: InputSchema,

    #[serde(default)]
    pub output_mode: OutputMode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,

    /// When and why a parent should spawn this agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawner_prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Inserted after the spawn prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions_prompt: Option<String>,

    /// Sent with every inference turn but never recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_prompt: Option<String>,

    /// Start from the parent's history instead of an empty one.
    #[serde(default)]
    pub include_message_history: bool,

    #[serde(default)]
    pub inherit_parent_system_prompt: bool,

    /// Step program; agents without one run a single `STEP_ALL`.
    #[serde(skip)]
    pub program: Option<ProgramFactory>,
}

impl AgentDefinition {
    #[must_use]
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            ..Default::default()
        }
    }

    /// Whether a call to `tool_name` is permitted.
    ///
    /// `end_turn` is always permitted, and `set_output` is implied by
    /// structured output.
    pub fn allows_tool(&self, tool_name: &str) -> bool {
        tool_name == builtin::END_TURN
            || (tool_name == builtin::SET_OUTPUT
                && self.output_mode == OutputMode::StructuredOutput)
            || self.tool_names.iter().any(|t| t == tool_name)
    }

    pub fn can_spawn(&self, agent_id: &str) -> bool {
        self.spawnable_agents.iter().any(|a| a == agent_id)
    }
}

impl std::fmt::Debug for AgentDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentDefinition")
            .field("id", &self.id)
            .field("model", &self.model)
            .field("tool_names", &self.tool_names)
            .field("spawnable_agents", &self.spawnable_agents)
            .field("output_mode", &self.output_mode)
            .field("program", &self.program.as_ref().map(|_| "<fn>"))
            .finish_non_exhaustive()
    }
}
