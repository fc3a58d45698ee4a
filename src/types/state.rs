use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::agents::OutputMode;
use super::messages::{estimate_tokens, Message, Role};

/// Mutable record of one run, owned by the driver executing it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentState {
    pub run_id: String,
    pub agent_id: String,
    /// Lookup-only reference to the spawning run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub message_history: Vec<Message>,
    /// Last value written with `set_output`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub context_token_count: u64,
}

impl AgentState {
    #[must_use]
    pub fn new(agent_id: impl Into<String>, parent_id: Option<String>) -> Self {
        Self {
            run_id: generate_id("run"),
            agent_id: agent_id.into(),
            parent_id,
            message_history: Vec::new(),
            output: None,
            system_prompt: String::new(),
            context_token_count: 0,
        }
    }

    /// Replace the history and refresh the token estimate.
    pub fn set_history(&mut self, history: Vec<Message>) {
        self.message_history = history;
        self.recount();
    }

    pub fn push_message(&mut self, message: Message) {
        self.message_history.push(message);
        self.recount();
    }

    pub fn recount(&mut self) {
        self.context_token_count = estimate_tokens(&self.message_history)
            + (self.system_prompt.len() as u64).div_ceil(4);
    }
}

/// What a caller hands to a new run.
#[derive(Debug, Clone, Default)]
pub struct RunInput {
    pub prompt: Option<String>,
    pub params: Option<Value>,
    /// Prior conversation the run starts from.
    pub message_history: Vec<Message>,
    /// Overrides the definition's system prompt.
    pub system_prompt: Option<String>,
}

impl RunInput {
    #[must_use]
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// The value a finished run reports to its spawner.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutput {
    StructuredOutput(Option<Value>),
    LastMessage(Option<Message>),
    AllMessages(Vec<Message>),
    Error(String),
}

impl AgentOutput {
    /// Build the output for `mode` from a finished run's state.
    ///
    /// `initial_len` is the history length when the run started, so
    /// `AllMessages` only reports what the run itself added.
    pub fn from_state(mode: OutputMode, state: &AgentState, initial_len: usize) -> Self {
        match mode {
            OutputMode::StructuredOutput => Self::StructuredOutput(state.output.clone()),
            OutputMode::LastMessage => Self::LastMessage(
                state
                    .message_history
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::Assistant)
                    .cloned(),
            ),
            OutputMode::AllMessages => Self::AllMessages(
                state
                    .message_history
                    .get(initial_len..)
                    .map(<[Message]>::to_vec)
                    .unwrap_or_default(),
            ),
        }
    }

    /// The envelope placed in a spawn result: `{type, value}` or
    /// `{type: "error", error_message}`.
    pub fn envelope(&self) -> Value {
        match self {
            Self::StructuredOutput(value) => serde_json::json!({
                "type": "structured_output",
                "value": value,
            }),
            Self::LastMessage(message) => serde_json::json!({
                "type": "last_message",
                "value": message,
            }),
            Self::AllMessages(messages) => serde_json::json!({
                "type": "all_messages",
                "value": messages,
            }),
            Self::Error(message) => serde_json::json!({
                "type": "error",
                "error_message": message,
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn structured(&self) -> Option<&Value> {
        match self {
            Self::StructuredOutput(value) => value.as_ref(),
            _ => None,
        }
    }

    /// Text of the reported message, for `LastMessage` outputs.
    pub fn text(&self) -> Option<String> {
        match self {
            Self::LastMessage(Some(message)) => message.text(),
            _ => None,
        }
    }
}

pub(crate) fn generate_id(prefix: &str) -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    let suffix: u64 = rng.random();
    format!("{prefix}_{suffix:016x}")
}
