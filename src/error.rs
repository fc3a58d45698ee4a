use std::io;

use crate::llm::InferenceError;
use crate::registry::ValidationIssue;

/// All errors that can occur while driving agent runs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("agent {agent_id} is not allowed to call tool {tool_name}")]
    ToolNotAllowed { agent_id: String, tool_name: String },

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("agent {agent_id} cannot spawn {child}")]
    AgentNotSpawnable { agent_id: String, child: String },

    #[error("inference failed: {0}")]
    Inference(#[from] InferenceError),

    #[error("run {run_id} exceeded the step limit of {limit}")]
    StepLimitExceeded { run_id: String, limit: u32 },

    #[error("spawn depth {depth} exceeds the configured maximum")]
    SpawnDepthExceeded { depth: u32 },

    #[error("agent program halted by the driver")]
    Halted,

    #[error("agent program panicked: {0}")]
    ProgramPanicked(String),

    #[error("agent program failed: {0}")]
    Program(String),

    #[error("invalid agent definitions: {}", format_issues(.0))]
    InvalidAgents(Vec<ValidationIssue>),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("JSON decode error: {0}")]
    JsonDecode(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, Error>;
