use serde_json::{json, Value};

use crate::apply::ProposalMap;
use crate::error::{Error, Result};
use crate::fanout::{outcome_output, run_fan_out, FanOutConfig};
use crate::program::{program, StepContext};
use crate::types::agents::{AgentDefinition, InputSchema, OutputMode};
use crate::types::messages::{Message, Role};
use crate::types::tools::builtin;

const IMPLEMENTOR_INSTRUCTIONS: &str = "\
Write out every code change needed for the request, following the strategy you were given.

Use propose_write_file and propose_str_replace for all edits. These tools draft a change and \
return its diff without touching the workspace; the drafts are reviewed before anything is \
applied. You may call read_files to check current contents. Do not call any other tools.

Spread the edits over as many steps as you need. Only the proposed changes are passed on, so \
skip any closing summary.";

const SELECTOR_INSTRUCTIONS: &str = "\
You are choosing between competing implementations of the same request. Each candidate in \
params has an id, the strategy it followed, and a unified diff of its proposed changes.

Compare every diff against the request. Pick the candidate that solves it most completely \
and correctly. Then collect ideas from the other candidates that would improve the winner.

Finish with a single set_output call: candidate_id, a one-sentence rationale, and \
improvement_notes (empty when nothing is worth borrowing).";

/// Fans a request out to one implementor per strategy prompt, then applies
/// the selected proposal.
pub fn editor_multi_prompt() -> AgentDefinition {
    AgentDefinition {
        spawner_prompt: Some(
            "Implements a change several ways in parallel, one per strategy prompt, and \
             applies the best result"
                .into(),
        ),
        tool_names: vec![
            builtin::SPAWN_AGENTS.into(),
            builtin::SET_MESSAGES.into(),
            builtin::SET_OUTPUT.into(),
            "write_file".into(),
            "str_replace".into(),
        ],
        spawnable_agents: vec!["editor-implementor".into(), "best-of-n-selector".into()],
        input_schema: InputSchema {
            prompt: None,
            params: Some(json!({
                "type": "object",
                "properties": {
                    "prompts": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "One short strategy hint per implementation"
                    }
                },
                "required": ["prompts"]
            })),
        },
        output_mode: OutputMode::StructuredOutput,
        include_message_history: true,
        inherit_parent_system_prompt: true,
        program: Some(program(multi_prompt)),
        ..AgentDefinition::new("editor-multi-prompt", "Multi-Prompt Editor")
    }
}

async fn multi_prompt(mut ctx: StepContext) -> Result<()> {
    let prompts: Vec<String> = match ctx.params().and_then(|p| p.get("prompts")) {
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| Error::InvalidInput(format!("prompts must be a list of strings: {e}")))?,
        None => Vec::new(),
    };
    let outcome = run_fan_out(&mut ctx, &prompts, &FanOutConfig::default()).await?;
    ctx.set_output(outcome_output(&outcome)).await?;
    Ok(())
}

/// Drafts one implementation with proposal tools only.
pub fn editor_implementor() -> AgentDefinition {
    AgentDefinition {
        spawner_prompt: Some(
            "Drafts a complete implementation with propose_* tools, without applying it".into(),
        ),
        tool_names: vec![
            "propose_write_file".into(),
            "propose_str_replace".into(),
            "read_files".into(),
        ],
        output_mode: OutputMode::StructuredOutput,
        instructions_prompt: Some(IMPLEMENTOR_INSTRUCTIONS.into()),
        include_message_history: true,
        inherit_parent_system_prompt: true,
        program: Some(program(implement)),
        ..AgentDefinition::new("editor-implementor", "Implementation Drafter")
    }
}

async fn implement(mut ctx: StepContext) -> Result<()> {
    let start = ctx.agent_state().message_history.len();
    let resume = ctx.step_all().await?;
    if let Some(error) = resume.error {
        return Err(Error::Inference(error));
    }
    let added = resume
        .agent_state
        .message_history
        .get(start..)
        .unwrap_or_default();
    let log = ProposalLog::collect(added, &ProposalMap::default());
    tracing::debug!(
        run_id = %resume.agent_state.run_id,
        calls = log.tool_calls.len(),
        "implementor finished drafting"
    );
    ctx.set_output(log.to_output()).await?;
    Ok(())
}

/// What an implementor did during its run, read back from its history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProposalLog {
    /// `{tool_name, input}` for every proposal call the model made, in order.
    /// Reads and other lookups are left out since nothing replays them.
    pub tool_calls: Vec<Value>,
    /// Every non-null JSON tool result, in order.
    pub tool_results: Vec<Value>,
    /// `--- <file> ---` headed diffs, separated by blank lines.
    pub unified_diffs: String,
}

impl ProposalLog {
    pub fn collect(messages: &[Message], proposals: &ProposalMap) -> Self {
        let tool_calls: Vec<Value> = messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .flat_map(Message::tool_calls)
            .filter(|(_, name, _)| proposals.real_for(name).is_some())
            .map(|(_, name, input)| json!({"tool_name": name, "input": input}))
            .collect();

        let tool_results: Vec<Value> = messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .flat_map(Message::tool_results)
            .filter_map(|r| r.as_json())
            .filter(|v| !v.is_null())
            .cloned()
            .collect();

        let unified_diffs = tool_results
            .iter()
            .filter_map(|result| {
                let diff = result.get("unified_diff")?.as_str().filter(|d| !d.is_empty())?;
                let file = result.get("file").and_then(Value::as_str).unwrap_or_default();
                Some(format!("--- {file} ---\n{diff}"))
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        Self {
            tool_calls,
            tool_results,
            unified_diffs,
        }
    }

    pub fn to_output(&self) -> Value {
        json!({
            "tool_calls": self.tool_calls,
            "tool_results": self.tool_results,
            "unified_diffs": self.unified_diffs,
        })
    }
}

/// Model-only agent that picks one implementation candidate.
pub fn best_of_n_selector() -> AgentDefinition {
    AgentDefinition {
        spawner_prompt: Some(
            "Compares implementation candidates given as unified diffs and picks the best one"
                .into(),
        ),
        input_schema: InputSchema {
            prompt: None,
            params: Some(json!({
                "type": "object",
                "properties": {
                    "candidates": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "id": {"type": "string"},
                                "strategy": {"type": "string"},
                                "content": {"type": "string", "description": "Unified diff of the proposed changes"}
                            },
                            "required": ["id", "content"]
                        }
                    }
                },
                "required": ["candidates"]
            })),
        },
        output_mode: OutputMode::StructuredOutput,
        output_schema: Some(json!({
            "type": "object",
            "properties": {
                "candidate_id": {"type": "string", "description": "Id of the chosen candidate"},
                "rationale": {"type": "string", "description": "One sentence on why it was chosen"},
                "improvement_notes": {"type": "string", "description": "Ideas worth borrowing from the other candidates"}
            },
            "required": ["candidate_id", "rationale", "improvement_notes"]
        })),
        instructions_prompt: Some(SELECTOR_INSTRUCTIONS.into()),
        include_message_history: true,
        inherit_parent_system_prompt: true,
        ..AgentDefinition::new("best-of-n-selector", "Implementation Selector")
    }
}
