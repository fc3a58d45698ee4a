//! Best-of-N fan-out and selection.
//!
//! [`run_fan_out`] spawns one implementor per strategy hint, labels the
//! candidates `A`, `B`, `C`, ... in hint order, asks a selector agent to pick
//! one, and replays only the winner's proposal log as real edits.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::apply::{ensure_permitted, plan_replay, replay, ApplyError, ProposalMap};
use crate::error::Result;
use crate::extract::{decode, extract_spawn_slots, spawn_error};
use crate::program::StepContext;
use crate::types::messages::Message;
use crate::types::tools::{builtin, ToolCall, ToolResult};

/// One labeled branch of a fan-out round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub id: String,
    pub strategy: String,
    /// Human-readable diff, summary, or `Error: ...` for a failed branch.
    pub content: String,
    /// Proposal calls in the order the implementor made them.
    pub recorded_tool_calls: Vec<ToolCall>,
}

impl Candidate {
    fn degraded(id: String, strategy: String, error: &str) -> Self {
        Self {
            id,
            strategy,
            content: format!("Error: {error}"),
            recorded_tool_calls: Vec::new(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.content.starts_with("Error:")
    }

    /// What the selector gets to see: never the raw tool calls.
    fn summary(&self) -> Value {
        json!({"id": self.id, "strategy": self.strategy, "content": self.content})
    }
}

/// The selector's verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorDecision {
    pub candidate_id: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub improvement_notes: String,
}

/// Output shape implementors report through `set_output`.
#[derive(Debug, Deserialize)]
struct ImplementorOutput {
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
    #[serde(default)]
    unified_diffs: String,
}

/// Which agents a round uses and how proposals map to real tools.
#[derive(Debug, Clone)]
pub struct FanOutConfig {
    pub implementor: String,
    pub selector: String,
    pub proposal_map: ProposalMap,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            implementor: "editor-implementor".into(),
            selector: "best-of-n-selector".into(),
            proposal_map: ProposalMap::default(),
        }
    }
}

/// A round that picked and applied a winner.
#[derive(Debug, Clone, PartialEq)]
pub struct FanOutReport {
    pub chosen_candidate: String,
    pub chosen_strategy: String,
    pub rationale: String,
    /// Results of each replayed call, in recorded order.
    pub applied_results: Vec<Vec<ToolResult>>,
    pub improvement_notes: String,
    pub candidates: Vec<Candidate>,
}

impl FanOutReport {
    pub fn to_output(&self) -> Value {
        json!({
            "chosen_strategy": self.chosen_strategy,
            "rationale": self.rationale,
            "tool_results": self.applied_results,
            "improvement_notes": self.improvement_notes,
        })
    }
}

/// Why a round applied nothing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FanOutFailure {
    #[error("No prompts provided.")]
    NoPrompts,

    #[error("Selector failed: {0}")]
    SelectorFailed(String),

    #[error("Failed to find chosen candidate: {0}")]
    UnknownCandidate(String),

    #[error("Cannot apply chosen candidate: {0}")]
    Replay(#[from] ApplyError),
}

impl FanOutFailure {
    pub fn to_output(&self) -> Value {
        json!({"error": self.to_string()})
    }
}

/// Result of a round. Failures are values so the calling program decides
/// what to do next.
pub type FanOutOutcome = std::result::Result<FanOutReport, FanOutFailure>;

/// Output value for either side of a [`FanOutOutcome`].
pub fn outcome_output(outcome: &FanOutOutcome) -> Value {
    match outcome {
        Ok(report) => report.to_output(),
        Err(failure) => failure.to_output(),
    }
}

/// Spreadsheet-style label for the candidate at `index`: A..Z, AA, AB, ...
pub fn candidate_id(index: usize) -> String {
    let mut label = Vec::new();
    let mut n = index;
    loop {
        label.push(char::from(b'A' + (n % 26) as u8));
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    label.iter().rev().collect()
}

/// History with the trailing run of user messages removed.
pub fn trim_trailing_user_messages(history: &[Message]) -> Vec<Message> {
    let keep = history
        .iter()
        .rposition(|m| !m.is_user())
        .map_or(0, |i| i + 1);
    history[..keep].to_vec()
}

/// Run one fan-out round from inside an agent program.
///
/// The outer `Result` only carries driver failures such as
/// [`Error::Halted`](crate::Error::Halted).
pub async fn run_fan_out(
    ctx: &mut StepContext,
    prompts: &[String],
    config: &FanOutConfig,
) -> Result<FanOutOutcome> {
    if prompts.is_empty() {
        tracing::warn!("fan-out requested with no prompts");
        return Ok(Err(FanOutFailure::NoPrompts));
    }

    let history = &ctx.agent_state().message_history;
    let trimmed = trim_trailing_user_messages(history);
    if trimmed.len() != history.len() {
        ctx.tool(ToolCall::new(builtin::SET_MESSAGES, json!({"messages": trimmed})).unrecorded())
            .await?;
    }

    let agents: Vec<Value> = prompts
        .iter()
        .map(|p| json!({"agent_type": config.implementor, "prompt": format!("Strategy: {p}")}))
        .collect();
    let spawned = ctx
        .tool(ToolCall::new(builtin::SPAWN_AGENTS, json!({"agents": agents})).unrecorded())
        .await?;
    let slots = extract_spawn_slots(&spawned.tool_result);

    let candidates: Vec<Candidate> = prompts
        .iter()
        .enumerate()
        .map(|(i, strategy)| {
            let slot = slots.get(i).cloned().flatten();
            assemble_candidate(candidate_id(i), strategy.clone(), slot)
        })
        .collect();

    let summaries: Vec<Value> = candidates.iter().map(Candidate::summary).collect();
    let selected = ctx
        .tool(
            ToolCall::new(
                builtin::SPAWN_AGENTS,
                json!({"agents": [{
                    "agent_type": config.selector,
                    "params": {"candidates": summaries},
                }]}),
            )
            .unrecorded(),
        )
        .await?;

    let decision = match read_decision(&selected.tool_result) {
        Ok(decision) => decision,
        Err(failure) => {
            tracing::warn!(error = %failure, "fan-out selection failed");
            return Ok(Err(failure));
        }
    };

    let Some(winner) = candidates.iter().find(|c| c.id == decision.candidate_id) else {
        tracing::warn!(candidate_id = %decision.candidate_id, "selector chose an unknown candidate");
        return Ok(Err(FanOutFailure::UnknownCandidate(decision.candidate_id)));
    };

    let plan = plan_replay(&config.proposal_map, &winner.recorded_tool_calls).and_then(|plan| {
        ensure_permitted(&plan, |name| ctx.allows_tool(name))?;
        Ok(plan)
    });
    let plan = match plan {
        Ok(plan) => plan,
        Err(e) => {
            tracing::warn!(candidate_id = %winner.id, error = %e, "winning candidate cannot be replayed");
            return Ok(Err(FanOutFailure::Replay(e)));
        }
    };
    tracing::debug!(candidate_id = %winner.id, calls = plan.len(), "applying winning candidate");
    let applied_results = replay(ctx, plan).await?;

    Ok(Ok(FanOutReport {
        chosen_candidate: winner.id.clone(),
        chosen_strategy: winner.strategy.clone(),
        rationale: decision.rationale,
        applied_results,
        improvement_notes: decision.improvement_notes,
        candidates,
    }))
}

fn assemble_candidate(id: String, strategy: String, slot: Option<Value>) -> Candidate {
    let Some(payload) = slot else {
        tracing::warn!(candidate_id = %id, "implementor produced no output");
        return Candidate::degraded(id, strategy, "implementor produced no output");
    };
    if let Some(error) = spawn_error(&payload) {
        tracing::warn!(candidate_id = %id, error = %error, "implementor failed");
        return Candidate::degraded(id, strategy, error);
    }
    match decode::<ImplementorOutput>(&payload) {
        Some(output) => Candidate {
            id,
            strategy,
            content: if output.unified_diffs.is_empty() {
                "No changes proposed".into()
            } else {
                output.unified_diffs
            },
            recorded_tool_calls: output.tool_calls,
        },
        None => {
            tracing::warn!(candidate_id = %id, "implementor output has an unexpected shape");
            Candidate::degraded(id, strategy, "unexpected implementor output")
        }
    }
}

fn read_decision(results: &[ToolResult]) -> std::result::Result<SelectorDecision, FanOutFailure> {
    let payload = extract_spawn_slots(results)
        .into_iter()
        .next()
        .flatten()
        .ok_or_else(|| FanOutFailure::SelectorFailed("no output".into()))?;
    if let Some(error) = spawn_error(&payload) {
        return Err(FanOutFailure::SelectorFailed(error.to_string()));
    }
    decode(&payload).ok_or_else(|| FanOutFailure::SelectorFailed("output has no candidate_id".into()))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::driver::{RunEvent, RunOutcome, StepDriver};
    use crate::error::Error;
    use crate::program::program;
    use crate::registry::AgentRegistry;
    use crate::test_support::{driver, text_backend};
    use crate::tools::{ToolSet, Workspace};
    use crate::types::agents::{AgentDefinition, OutputMode};
    use crate::types::state::RunInput;

    /// Implementor driven by words in its strategy: `fail`, `edit`, `wait:<ms>`,
    /// and `note`, which logs an `add_message` call without making it.
    fn implementor() -> AgentDefinition {
        let mut def = AgentDefinition::new("implementor", "Implementor");
        def.output_mode = OutputMode::StructuredOutput;
        def.tool_names = vec!["propose_write_file".into(), "propose_str_replace".into()];
        def.program = Some(program(|mut ctx| async move {
            let strategy = ctx.prompt().unwrap_or_default().trim_start_matches("Strategy: ").to_string();
            let mut calls = Vec::new();
            let mut diffs = Vec::new();
            for word in strategy.split_whitespace() {
                if word == "fail" {
                    return Err(Error::Program("implementor crashed".into()));
                }
                if let Some(ms) = word.strip_prefix("wait:") {
                    let ms: u64 = ms.parse().unwrap_or(0);
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    diffs.push(format!("waited {ms}"));
                }
                if word == "edit" {
                    calls.push(ToolCall::new(
                        "propose_write_file",
                        json!({"path": "file1.txt", "content": "hello old world"}),
                    ));
                    calls.push(ToolCall::new(
                        "propose_str_replace",
                        json!({"path": "file1.txt", "replacements": [{"old": "old", "new": "new"}]}),
                    ));
                }
            }
            for call in &calls {
                let resume = ctx.tool(call.clone()).await?;
                if let Some(diff) = resume.tool_result[0].as_json().and_then(|v| v["unified_diff"].as_str()) {
                    diffs.push(diff.to_string());
                }
            }
            if strategy.split_whitespace().any(|w| w == "note") {
                calls.push(ToolCall::new(
                    "add_message",
                    json!({"role": "user", "content": "applied"}),
                ));
            }
            ctx.set_output(json!({"tool_calls": calls, "unified_diffs": diffs.join("\n")}))
                .await?;
            Ok(())
        }));
        def
    }

    /// Picks the first candidate whose strategy starts with `pick`, or `Z`.
    fn selector() -> AgentDefinition {
        let mut def = AgentDefinition::new("selector", "Selector");
        def.output_mode = OutputMode::StructuredOutput;
        def.program = Some(program(|mut ctx| async move {
            let candidates = ctx
                .params()
                .and_then(|p| p["candidates"].as_array().cloned())
                .unwrap_or_default();
            let chosen = candidates
                .iter()
                .find(|c| c["strategy"].as_str().is_some_and(|s| s.starts_with("pick")))
                .and_then(|c| c["id"].as_str())
                .unwrap_or("Z")
                .to_string();
            let keys: Vec<String> = candidates
                .first()
                .and_then(Value::as_object)
                .map(|o| o.keys().cloned().collect())
                .unwrap_or_default();
            ctx.set_output(json!({
                "candidate_id": chosen,
                "rationale": keys.join(","),
                "improvement_notes": "none",
            }))
            .await?;
            Ok(())
        }));
        def
    }

    fn coordinator() -> AgentDefinition {
        coordinator_with(ProposalMap::default())
    }

    fn coordinator_with(proposal_map: ProposalMap) -> AgentDefinition {
        let mut def = AgentDefinition::new("coordinator", "Coordinator");
        def.output_mode = OutputMode::StructuredOutput;
        def.tool_names = vec![
            "spawn_agents".into(),
            "set_messages".into(),
            "write_file".into(),
            "str_replace".into(),
        ];
        def.spawnable_agents = vec!["implementor".into(), "selector".into()];
        def.program = Some(program(move |mut ctx| {
            let proposal_map = proposal_map.clone();
            async move {
                let prompts: Vec<String> = ctx
                    .params()
                    .and_then(|p| serde_json::from_value(p["prompts"].clone()).ok())
                    .unwrap_or_default();
                let config = FanOutConfig {
                    implementor: "implementor".into(),
                    selector: "selector".into(),
                    proposal_map,
                };
                let outcome = run_fan_out(&mut ctx, &prompts, &config).await?;
                let candidates = match &outcome {
                    Ok(report) => json!(report.candidates),
                    Err(_) => Value::Null,
                };
                let mut output = outcome_output(&outcome);
                output["candidates"] = candidates;
                ctx.set_output(output).await?;
                Ok(())
            }
        }));
        def
    }

    fn fan_out_driver(root: &std::path::Path) -> StepDriver {
        driver_with(root, coordinator(), selector(), text_backend("unused"))
    }

    fn driver_with(
        root: &std::path::Path,
        coordinator: AgentDefinition,
        selector: AgentDefinition,
        backend: std::sync::Arc<dyn crate::llm::LlmBackend>,
    ) -> StepDriver {
        let mut registry = AgentRegistry::new();
        for def in [coordinator, implementor(), selector] {
            registry.register(def).unwrap();
        }
        let mut tools = ToolSet::default();
        Workspace::new(root).install(&mut tools);
        driver(registry, tools, backend)
    }

    fn structured_selector(output: Option<Value>, fail: bool) -> AgentDefinition {
        let mut def = AgentDefinition::new("selector", "Selector");
        def.output_mode = OutputMode::StructuredOutput;
        def.program = Some(program(move |mut ctx| {
            let output = output.clone();
            async move {
                if fail {
                    return Err(Error::Program("selector crashed".into()));
                }
                if let Some(output) = output {
                    ctx.set_output(output).await?;
                }
                Ok(())
            }
        }));
        def
    }

    async fn fan_out(driver: &StepDriver, prompts: &[&str]) -> RunOutcome {
        let input = RunInput {
            message_history: vec![Message::user("earlier"), Message::assistant("noted")],
            ..RunInput::prompt("make the change")
        }
        .with_params(json!({"prompts": prompts}));
        driver
            .run("coordinator", input, CancellationToken::new())
            .await
            .unwrap()
    }

    fn output(outcome: &RunOutcome) -> &Value {
        outcome.output.structured().unwrap()
    }

    #[test]
    fn candidate_ids_are_letters_in_order() {
        let ids: Vec<String> = (0..3).map(candidate_id).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
        assert_eq!(candidate_id(25), "Z");
        assert_eq!(candidate_id(26), "AA");
        assert_eq!(candidate_id(27), "AB");
        assert_eq!(candidate_id(52), "BA");
    }

    #[test]
    fn trims_only_the_trailing_user_run() {
        let history = vec![
            Message::user("first"),
            Message::assistant("reply"),
            Message::user("again"),
            Message::user("and again"),
        ];
        let trimmed = trim_trailing_user_messages(&history);
        assert_eq!(trimmed, history[..2].to_vec());
        assert!(trim_trailing_user_messages(&[Message::user("only")]).is_empty());
        assert_eq!(trim_trailing_user_messages(&history[..2]).len(), 2);
    }

    #[tokio::test]
    async fn letters_follow_prompt_order_not_completion_order() {
        let dir = tempfile::tempdir().unwrap();
        let driver = fan_out_driver(dir.path());
        let outcome = fan_out(&driver, &["wait:60", "wait:30", "pick wait:0"]).await;

        let candidates = output(&outcome)["candidates"].as_array().unwrap();
        let labels: Vec<(&str, &str)> = candidates
            .iter()
            .map(|c| (c["id"].as_str().unwrap(), c["content"].as_str().unwrap()))
            .collect();
        assert_eq!(
            labels,
            vec![("A", "waited 60"), ("B", "waited 30"), ("C", "waited 0")]
        );
        assert_eq!(output(&outcome)["chosen_strategy"], "pick wait:0");
    }

    #[tokio::test]
    async fn selector_sees_summaries_only() {
        let dir = tempfile::tempdir().unwrap();
        let driver = fan_out_driver(dir.path());
        let outcome = fan_out(&driver, &["pick edit"]).await;
        assert_eq!(output(&outcome)["rationale"], "content,id,strategy");
    }

    #[tokio::test]
    async fn unknown_choice_applies_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let driver = fan_out_driver(dir.path());
        let outcome = fan_out(&driver, &["edit", "wait:0"]).await;

        assert_eq!(
            output(&outcome)["error"],
            "Failed to find chosen candidate: Z"
        );
        assert!(output(&outcome).get("tool_results").is_none());
        assert!(!dir.path().join("file1.txt").exists());
    }

    #[tokio::test]
    async fn failed_branch_becomes_a_degraded_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let driver = fan_out_driver(dir.path());
        let outcome = fan_out(&driver, &["wait:0", "fail", "pick wait:0"]).await;

        let candidates = output(&outcome)["candidates"].as_array().unwrap();
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[1]["id"], "B");
        assert!(candidates[1]["content"].as_str().unwrap().starts_with("Error:"));
        assert_eq!(candidates[1]["recorded_tool_calls"], json!([]));
        assert_eq!(output(&outcome)["chosen_strategy"], "pick wait:0");
    }

    #[tokio::test]
    async fn winner_is_replayed_in_recorded_order() {
        let dir = tempfile::tempdir().unwrap();
        let driver = fan_out_driver(dir.path());
        let outcome = fan_out(&driver, &["edit", "pick edit"]).await;

        let applied = output(&outcome)["tool_results"].as_array().unwrap();
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0][0]["value"]["message"], "Wrote file");
        assert_eq!(applied[1][0]["value"]["message"], "Updated file");
        let content = std::fs::read_to_string(dir.path().join("file1.txt")).unwrap();
        assert_eq!(content, "hello new world");

        // The replayed edits are recorded; the original ask is not.
        let history = &outcome.state.message_history;
        assert_eq!(history[0].text().as_deref(), Some("earlier"));
        assert!(history
            .iter()
            .all(|m| !m.text().unwrap_or_default().starts_with("make the change")));
        let replayed: Vec<&str> = history.iter().flat_map(|m| m.tool_calls().map(|(_, name, _)| name)).collect();
        assert_eq!(replayed, vec!["write_file", "str_replace"]);
    }

    #[tokio::test]
    async fn empty_proposal_log_applies_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let driver = fan_out_driver(dir.path());
        let outcome = fan_out(&driver, &["pick wait:0"]).await;
        assert_eq!(output(&outcome)["tool_results"], json!([]));
        assert!(output(&outcome).get("error").is_none());
    }

    #[tokio::test]
    async fn no_prompts_spawns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = fan_out_driver(dir.path());
        let events = driver.events();
        let outcome = fan_out(&driver, &[]).await;
        drop(driver);

        assert_eq!(output(&outcome)["error"], "No prompts provided.");
        let started = events
            .filter(|e| std::future::ready(matches!(e, RunEvent::RunStarted { .. })))
            .count()
            .await;
        assert_eq!(started, 1);
    }

    #[tokio::test]
    async fn selector_without_a_decision_fails_the_round() {
        let dir = tempfile::tempdir().unwrap();
        let silent = structured_selector(None, false);
        let driver = driver_with(dir.path(), coordinator(), silent, text_backend("unused"));

        let outcome = fan_out(&driver, &["pick edit"]).await;
        assert_eq!(output(&outcome)["error"], "Selector failed: no output");
        assert!(!dir.path().join("file1.txt").exists());
    }

    #[tokio::test]
    async fn crashed_selector_fails_the_round() {
        let dir = tempfile::tempdir().unwrap();
        let crashing = structured_selector(None, true);
        let driver = driver_with(dir.path(), coordinator(), crashing, text_backend("unused"));

        let outcome = fan_out(&driver, &["pick edit", "edit"]).await;
        let error = output(&outcome)["error"].as_str().unwrap();
        assert!(error.starts_with("Selector failed:"), "{error}");
        assert!(error.contains("selector crashed"), "{error}");
        assert!(!dir.path().join("file1.txt").exists());
    }

    #[tokio::test]
    async fn selector_inference_failure_fails_the_round() {
        let dir = tempfile::tempdir().unwrap();
        let mut model_only = AgentDefinition::new("selector", "Selector");
        model_only.output_mode = OutputMode::StructuredOutput;
        let unreachable = crate::test_support::backend_fn(|_req| async move {
            Err::<crate::llm::Completion, _>(crate::llm::InferenceError::Transport(
                "connection refused".into(),
            ))
        });
        let driver = driver_with(dir.path(), coordinator(), model_only, unreachable);

        let outcome = fan_out(&driver, &["pick edit"]).await;
        assert_eq!(output(&outcome)["error"], "Selector failed: no output");
        assert!(!dir.path().join("file1.txt").exists());
    }

    #[tokio::test]
    async fn undecodable_decision_fails_the_round() {
        let dir = tempfile::tempdir().unwrap();
        let confused = structured_selector(Some(json!({"choice": "A"})), false);
        let driver = driver_with(dir.path(), coordinator(), confused, text_backend("unused"));

        let outcome = fan_out(&driver, &["pick edit"]).await;
        assert_eq!(
            output(&outcome)["error"],
            "Selector failed: output has no candidate_id"
        );
        assert!(!dir.path().join("file1.txt").exists());
    }

    #[tokio::test]
    async fn replay_outside_the_coordinators_tools_applies_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let lenient = coordinator_with(ProposalMap::default().allow_passthrough("add_message"));
        let driver = driver_with(dir.path(), lenient, selector(), text_backend("unused"));

        let outcome = fan_out(&driver, &["pick edit note"]).await;
        assert_eq!(
            output(&outcome)["error"],
            "Cannot apply chosen candidate: recorded call 2 replays as add_message, \
             which this agent may not call"
        );
        assert!(!dir.path().join("file1.txt").exists());
        assert!(outcome
            .state
            .message_history
            .iter()
            .all(|m| m.tool_calls().all(|(_, name, _)| name != "write_file")));
    }

    #[test]
    fn degraded_candidates_are_recognizable() {
        let c = Candidate::degraded("B".into(), "s".into(), "boom");
        assert!(c.is_degraded());
        assert_eq!(c.summary(), json!({"id": "B", "strategy": "s", "content": "Error: boom"}));
    }
}
