pub mod agents;
pub mod messages;
pub mod options;
pub mod state;
pub mod tools;

// Re-exports for convenience.
pub use agents::{AgentDefinition, InputSchema, OutputMode};
pub use messages::{ContentPart, Message, Role};
pub use options::DriverOptions;
pub use state::{AgentOutput, AgentState, RunInput};
pub use tools::{ToolCall, ToolResult};
