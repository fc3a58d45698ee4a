use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::extract::{decode, extract_spawn_slots, spawn_error};
use crate::fanout::candidate_id;
use crate::program::{program, StepContext};
use crate::types::agents::{AgentDefinition, InputSchema, OutputMode};
use crate::types::tools::{builtin, ToolCall};

const DEFAULT_THOUGHTS: u64 = 3;
const MAX_THOUGHTS: u64 = 10;

const THINKER_SELECTOR_INSTRUCTIONS: &str = "\
You are choosing between several independent lines of thinking about the conversation so far. \
Each thought in params has an id and its content.

Weigh them on depth, correctness and clarity, then make a single set_output call with the \
thought_id of the best one.";

#[derive(Debug, Clone, Serialize)]
struct Thought {
    id: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ThoughtChoice {
    thought_id: String,
}

/// Samples several thoughts and keeps the one a selector prefers.
pub fn thinker_best_of_n() -> AgentDefinition {
    AgentDefinition {
        spawner_prompt: Some(
            "Thinks about the conversation several times independently and returns the best \
             line of reasoning"
                .into(),
        ),
        tool_names: vec![builtin::SPAWN_AGENTS.into()],
        spawnable_agents: vec!["thinker-selector".into()],
        input_schema: InputSchema {
            prompt: None,
            params: Some(json!({
                "type": "object",
                "properties": {
                    "n": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": MAX_THOUGHTS,
                        "description": "How many thoughts to sample"
                    }
                }
            })),
        },
        output_mode: OutputMode::LastMessage,
        include_message_history: true,
        inherit_parent_system_prompt: true,
        program: Some(program(think)),
        ..AgentDefinition::new("thinker-best-of-n", "Best-of-N Thinker")
    }
}

async fn think(mut ctx: StepContext) -> Result<()> {
    let n = ctx
        .params()
        .and_then(|p| p.get("n"))
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_THOUGHTS)
        .clamp(1, MAX_THOUGHTS) as usize;

    let generated = ctx.generate_n(n).await?;
    if let Some(error) = generated.error {
        return Err(Error::Inference(error));
    }
    let thoughts: Vec<Thought> = generated
        .n_responses
        .iter()
        .enumerate()
        .map(|(i, response)| Thought {
            id: candidate_id(i),
            content: strip_think_blocks(response),
        })
        .collect();

    let spawned = ctx
        .tool(
            ToolCall::new(
                builtin::SPAWN_AGENTS,
                json!({"agents": [{
                    "agent_type": "thinker-selector",
                    "params": {"thoughts": thoughts},
                }]}),
            )
            .unrecorded(),
        )
        .await?;

    let Some(payload) = extract_spawn_slots(&spawned.tool_result)
        .into_iter()
        .next()
        .flatten()
    else {
        tracing::warn!("thinker selector produced no output");
        ctx.step_text("Selector failed").await?;
        return Ok(());
    };
    if let Some(error) = spawn_error(&payload) {
        tracing::warn!(error = %error, "thinker selector failed");
        ctx.step_text(error.to_string()).await?;
        return Ok(());
    }

    let chosen = decode::<ThoughtChoice>(&payload)
        .and_then(|choice| thoughts.iter().find(|t| t.id == choice.thought_id));
    match chosen {
        Some(thought) => ctx.step_text(thought.content.clone()).await?,
        None => {
            tracing::warn!(choice = %payload, "thinker selector chose an unknown thought");
            ctx.step_text("Failed to find chosen thinking output.").await?;
        }
    }
    Ok(())
}

/// Remove every closed `<think>...</think>` block, then trim.
///
/// An opening tag without a matching close is left in place.
pub fn strip_think_blocks(text: &str) -> String {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(OPEN) {
        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            break;
        };
        out.push_str(&rest[..start]);
        rest = &after_open[end + CLOSE.len()..];
    }
    out.push_str(rest);
    out.trim().to_string()
}

/// Model-only agent that picks one thought.
pub fn thinker_selector() -> AgentDefinition {
    AgentDefinition {
        spawner_prompt: Some("Compares several thinking outputs and selects the best one".into()),
        input_schema: InputSchema {
            prompt: None,
            params: Some(json!({
                "type": "object",
                "properties": {
                    "thoughts": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "id": {"type": "string"},
                                "content": {"type": "string"}
                            },
                            "required": ["id", "content"]
                        }
                    }
                },
                "required": ["thoughts"]
            })),
        },
        output_mode: OutputMode::StructuredOutput,
        output_schema: Some(json!({
            "type": "object",
            "properties": {
                "thought_id": {"type": "string", "description": "Id of the chosen thought"}
            },
            "required": ["thought_id"]
        })),
        instructions_prompt: Some(THINKER_SELECTOR_INSTRUCTIONS.into()),
        include_message_history: true,
        inherit_parent_system_prompt: true,
        ..AgentDefinition::new("thinker-selector", "Thought Selector")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::agents::builtin_registry;
    use crate::llm::{Completion, CompletionRequest};
    use crate::test_support::{backend_fn, driver};
    use crate::tools::ToolSet;
    use crate::types::messages::{Message, Role};
    use crate::types::state::RunInput;

    #[test]
    fn strips_closed_think_blocks() {
        assert_eq!(strip_think_blocks("<think>a</think> answer "), "answer");
        assert_eq!(
            strip_think_blocks("one <think>x\ny</think>two<think></think> three"),
            "one two three"
        );
        assert_eq!(strip_think_blocks("<think>open only"), "<think>open only");
        assert_eq!(strip_think_blocks("plain"), "plain");
    }

    /// Thinker completions are `<think>..</think> idea`; the selector picks `choice`.
    fn thinker_backend(
        choice: &'static str,
        generated: Arc<AtomicUsize>,
        selector_prompts: Arc<Mutex<Vec<String>>>,
    ) -> Arc<dyn crate::llm::LlmBackend> {
        backend_fn(move |req: CompletionRequest| {
            let generated = generated.clone();
            let selector_prompts = selector_prompts.clone();
            async move {
                if req.messages.last().is_some_and(|m| m.role == Role::Tool) {
                    return Ok(Completion::text("done"));
                }
                Ok(match req.agent_id.as_str() {
                    "thinker-selector" => {
                        selector_prompts
                            .lock()
                            .unwrap()
                            .extend(req.messages.iter().filter_map(Message::text));
                        Completion::text("").with_tool_call(ToolCall::new(
                            "set_output",
                            json!({"thought_id": choice}),
                        ))
                    }
                    _ => {
                        generated.fetch_add(1, Ordering::SeqCst);
                        Completion::text("<think>secret scratch</think>\n  use a binary search  ")
                    }
                })
            }
        })
    }

    async fn run_thinker(
        choice: &'static str,
        params: Value,
    ) -> (crate::driver::RunOutcome, usize, Vec<String>) {
        let generated = Arc::new(AtomicUsize::new(0));
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let driver = driver(
            builtin_registry().unwrap(),
            ToolSet::default(),
            thinker_backend(choice, generated.clone(), prompts.clone()),
        );
        let outcome = driver
            .run(
                "thinker-best-of-n",
                RunInput::prompt("how should we find the bad commit?").with_params(params),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        let prompts = prompts.lock().unwrap().clone();
        (outcome, generated.load(Ordering::SeqCst), prompts)
    }

    #[tokio::test]
    async fn chosen_thought_becomes_the_last_message() {
        let (outcome, generated, selector_prompts) = run_thinker("B", json!({})).await;
        assert_eq!(generated, 3);
        assert_eq!(outcome.output.text().as_deref(), Some("use a binary search"));

        let params = selector_prompts
            .iter()
            .find(|t| t.starts_with("Params:"))
            .unwrap();
        assert!(params.contains(r#""id":"C""#));
        assert!(!params.contains("secret scratch"));
    }

    #[tokio::test]
    async fn unknown_thought_is_reported() {
        let (outcome, _, _) = run_thinker("Q", json!({"n": 2})).await;
        assert_eq!(
            outcome.output.text().as_deref(),
            Some("Failed to find chosen thinking output.")
        );
    }

    #[tokio::test]
    async fn thought_count_is_clamped() {
        let (_, generated, _) = run_thinker("A", json!({"n": 50})).await;
        assert_eq!(generated, 10);
        let (_, generated, _) = run_thinker("A", json!({"n": 0})).await;
        assert_eq!(generated, 1);
    }

    #[tokio::test]
    async fn selector_failure_is_reported() {
        let driver = driver(
            builtin_registry().unwrap(),
            ToolSet::default(),
            backend_fn(|req: CompletionRequest| async move {
                if req.agent_id == "thinker-selector" {
                    Err(crate::llm::InferenceError::ModelNotFound {
                        model: "selector-model".into(),
                    })
                } else {
                    Ok(Completion::text("idea"))
                }
            }),
        );
        let outcome = driver
            .run("thinker-best-of-n", RunInput::prompt("think"), CancellationToken::new())
            .await
            .unwrap();
        // The selector's default program ends quietly on inference errors,
        // so it reports no decision.
        assert_eq!(outcome.output.text().as_deref(), Some("Selector failed"));
    }
}
