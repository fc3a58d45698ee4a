use crate::llm::InferenceError;

/// Progress notifications emitted while runs execute.
///
/// Delivered in order per run; events from sibling runs interleave.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        agent_id: String,
        parent_id: Option<String>,
    },
    RunFinished {
        run_id: String,
        agent_id: String,
        steps: u32,
        error: Option<String>,
    },
    ToolCallStarted {
        run_id: String,
        tool_name: String,
        tool_call_id: String,
    },
    ToolCallFinished {
        run_id: String,
        tool_name: String,
        tool_call_id: String,
        is_error: bool,
    },
    StepText {
        run_id: String,
        text: String,
    },
    InferenceFailed {
        run_id: String,
        error: InferenceError,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> &str {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::RunFinished { run_id, .. }
            | Self::ToolCallStarted { run_id, .. }
            | Self::ToolCallFinished { run_id, .. }
            | Self::StepText { run_id, .. }
            | Self::InferenceFailed { run_id, .. } => run_id,
        }
    }
}
