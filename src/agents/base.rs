use serde_json::{json, Value};

use crate::error::Result;
use crate::program::{program, InlineSpawn, StepContext};
use crate::types::agents::{AgentDefinition, InputSchema};
use crate::types::messages::{estimate_tokens, ContentPart, Message};
use crate::types::tools::{builtin, ToolCall, ToolResult};

/// Placeholder left where a pruned tool result used to be.
pub const PRUNED_TOOL_RESULT: &str = "[tool result removed to save context]";

const DEFAULT_MAX_CONTEXT_TOKENS: u64 = 100_000;
/// Messages at the end of the history that are never pruned.
const KEEP_RECENT_MESSAGES: usize = 10;

const BASE_SYSTEM_PROMPT: &str = "\
You are a coding assistant working inside the user's project. Read the relevant files before \
changing them, keep edits minimal, and run commands to check your work when that helps.

Delegate when it pays off: spawn editor-multi-prompt with several strategy prompts for changes \
that could reasonably be done more than one way, and thinker-best-of-n when a problem needs \
careful reasoning before acting. Call end_turn when the request is handled.";

fn max_context_params() -> Value {
    json!({
        "type": "object",
        "properties": {
            "max_context_tokens": {
                "type": "integer",
                "description": "Prune old tool results once the history is estimated above this many tokens"
            }
        }
    })
}

/// Top-level orchestrator: prune, step, repeat.
pub fn base() -> AgentDefinition {
    AgentDefinition {
        spawner_prompt: Some("General coding assistant that orchestrates the other agents".into()),
        tool_names: vec![
            "read_files".into(),
            "write_file".into(),
            "str_replace".into(),
            "run_terminal_command".into(),
            builtin::SPAWN_AGENTS.into(),
            builtin::END_TURN.into(),
        ],
        spawnable_agents: vec![
            "context-pruner".into(),
            "editor-multi-prompt".into(),
            "thinker-best-of-n".into(),
        ],
        input_schema: InputSchema {
            prompt: Some(json!({"type": "string"})),
            params: Some(max_context_params()),
        },
        system_prompt: Some(BASE_SYSTEM_PROMPT.into()),
        program: Some(program(orchestrate)),
        ..AgentDefinition::new("base", "Base")
    }
}

async fn orchestrate(mut ctx: StepContext) -> Result<()> {
    let params = ctx.params().cloned().unwrap_or_else(|| json!({}));
    loop {
        ctx.spawn_inline(
            InlineSpawn::new("context-pruner")
                .with_params(params.clone())
                .hidden(),
        )
        .await?;
        let resume = ctx.step().await?;
        if resume.steps_complete || resume.error.is_some() {
            return Ok(());
        }
    }
}

/// Inline bookkeeping agent that shrinks an oversized shared history.
pub fn context_pruner() -> AgentDefinition {
    AgentDefinition {
        spawner_prompt: Some("Drops old tool results when the conversation grows too long".into()),
        tool_names: vec![builtin::SET_MESSAGES.into()],
        input_schema: InputSchema {
            prompt: None,
            params: Some(max_context_params()),
        },
        include_message_history: true,
        program: Some(program(prune)),
        ..AgentDefinition::new("context-pruner", "Context Pruner")
    }
}

async fn prune(mut ctx: StepContext) -> Result<()> {
    let limit = ctx
        .params()
        .and_then(|p| p.get("max_context_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_MAX_CONTEXT_TOKENS);
    let history = &ctx.agent_state().message_history;
    let tokens = estimate_tokens(history);
    if tokens <= limit {
        return Ok(());
    }
    let pruned = prune_tool_results(history, KEEP_RECENT_MESSAGES);
    if pruned == *history {
        return Ok(());
    }
    tracing::debug!(
        run_id = %ctx.agent_state().run_id,
        tokens,
        limit,
        after = estimate_tokens(&pruned),
        "pruning tool results"
    );
    ctx.tool(ToolCall::new(builtin::SET_MESSAGES, json!({"messages": pruned})).unrecorded())
        .await?;
    Ok(())
}

/// Copy of `history` where tool results outside the last `keep_recent`
/// messages carry only [`PRUNED_TOOL_RESULT`].
///
/// Tool calls and their ids are kept so every call still has its result.
pub fn prune_tool_results(history: &[Message], keep_recent: usize) -> Vec<Message> {
    let cutoff = history.len().saturating_sub(keep_recent);
    history
        .iter()
        .enumerate()
        .map(|(i, message)| {
            if i >= cutoff {
                return message.clone();
            }
            let content = message
                .content
                .iter()
                .map(|part| match part {
                    ContentPart::ToolResult {
                        tool_call_id,
                        tool_name,
                        ..
                    } => ContentPart::ToolResult {
                        tool_call_id: tool_call_id.clone(),
                        tool_name: tool_name.clone(),
                        output: vec![ToolResult::json(json!({"message": PRUNED_TOOL_RESULT}))],
                    },
                    other => other.clone(),
                })
                .collect();
            Message::new(message.role, content)
        })
        .collect()
}
