pub mod agents;
pub mod apply;
pub mod driver;
pub mod error;
pub mod extract;
pub mod fanout;
pub mod llm;
pub mod program;
pub mod registry;
pub mod tools;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export key types at crate root for ergonomic use.
pub use error::{Error, Result};
pub use types::{
    AgentDefinition, AgentOutput, AgentState, ContentPart, DriverOptions, InputSchema, Message,
    OutputMode, Role, RunInput, ToolCall, ToolResult,
};

// Re-export primary APIs.
pub use driver::{RunEvent, RunOutcome, StepDriver};
pub use program::{program, Directive, InlineSpawn, Resume, StepContext, StepGenerator};
pub use registry::{AgentRegistry, ValidationIssue};

// Re-export the coordination helpers programs build on.
pub use apply::{ensure_permitted, plan_replay, replay, ApplyError, ProposalMap, ToolSink};
pub use extract::{extract_spawn_results, extract_spawn_slots};
pub use fanout::{run_fan_out, FanOutConfig, FanOutFailure, FanOutOutcome, FanOutReport};

// Re-export model and tool seams.
pub use llm::{Completion, CompletionRequest, InferenceError, LlmBackend};
pub use tools::{new_tool, Tool, ToolContext, ToolExecutor, ToolSet, Workspace};
