mod diff;
mod files;
mod terminal;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::llm::ToolSpec;
use crate::types::tools::{ToolCall, ToolResult};

pub use diff::unified_diff;
pub use files::Workspace;
pub use terminal::terminal_tool;

/// Per-call context handed to tool handlers.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub run_id: String,
    pub agent_id: String,
    pub cancel: CancellationToken,
}

/// Executes the non-builtin tools an agent calls.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> Vec<ToolResult>;

    /// Metadata for every tool this executor can run.
    fn specs(&self) -> Vec<ToolSpec>;

    /// Called once a run has finished so per-run state can be dropped.
    async fn release_run(&self, _run_id: &str) {}
}

/// Async handler for a tool invocation.
pub type ToolHandler =
    Arc<dyn Fn(Value, ToolContext) -> BoxFuture<'static, Vec<ToolResult>> + Send + Sync>;

/// Callback run when a run is released.
pub type ReleaseHook = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

/// A named tool.
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub handler: ToolHandler,
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Create a Tool with an async handler.
pub fn new_tool<F, Fut>(
    name: impl Into<String>,
    description: impl Into<String>,
    input_schema: Value,
    handler: F,
) -> Tool
where
    F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Vec<ToolResult>> + Send + 'static,
{
    Tool {
        name: name.into(),
        description: description.into(),
        input_schema,
        handler: Arc::new(move |input, ctx| Box::pin(handler(input, ctx))),
    }
}

/// A set of tools dispatched by name.
#[derive(Default)]
pub struct ToolSet {
    tools: HashMap<String, Tool>,
    release_hooks: Vec<ReleaseHook>,
}

impl ToolSet {
    #[must_use]
    pub fn new(tools: Vec<Tool>) -> Self {
        let mut set = Self::default();
        set.extend(tools);
        set
    }

    /// Add tools, replacing any with the same name.
    pub fn extend(&mut self, tools: Vec<Tool>) {
        for tool in tools {
            self.tools.insert(tool.name.clone(), tool);
        }
    }

    pub fn on_release(&mut self, hook: ReleaseHook) {
        self.release_hooks.push(hook);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        f.debug_struct("ToolSet").field("tools", &names).finish()
    }
}

#[async_trait]
impl ToolExecutor for ToolSet {
    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> Vec<ToolResult> {
        match self.tools.get(&call.tool_name) {
            Some(tool) => (tool.handler)(call.input.clone(), ctx.clone()).await,
            None => vec![ToolResult::error(format!("unknown tool: {}", call.tool_name))],
        }
    }

    fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .values()
            .map(|t| ToolSpec {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    async fn release_run(&self, run_id: &str) {
        for hook in &self.release_hooks {
            hook(run_id.to_string()).await;
        }
    }
}

/// Parse a tool's input, turning decode failures into an error result.
pub(crate) fn parse_input<T: serde::de::DeserializeOwned>(
    input: Value,
) -> Result<T, Vec<ToolResult>> {
    serde_json::from_value(input)
        .map_err(|e| vec![ToolResult::error(format!("invalid input: {e}"))])
}

#[cfg(test)]
pub(crate) fn test_context() -> ToolContext {
    ToolContext {
        run_id: "run_test".into(),
        agent_id: "tester".into(),
        cancel: CancellationToken::new(),
    }
}
