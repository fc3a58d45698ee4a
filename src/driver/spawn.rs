use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::{spawn_messages, Run, StepDriver};
use crate::error::{Error, Result};
use crate::program::InlineSpawn;
use crate::tools::parse_input;
use crate::types::agents::AgentDefinition;
use crate::types::messages::{ContentPart, Message, Role};
use crate::types::state::{generate_id, AgentOutput, AgentState};
use crate::types::tools::{builtin, ToolResult};

#[derive(Debug, Deserialize)]
struct SpawnAgentsInput {
    agents: Vec<SpawnRequest>,
}

#[derive(Debug, Clone, Deserialize)]
struct SpawnRequest {
    agent_type: String,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    params: Option<Value>,
}

impl StepDriver {
    /// `spawn_agents`: run every requested child concurrently and report
    /// their outputs in request order.
    ///
    /// A child that cannot start or fails is reported as an error envelope;
    /// its siblings are unaffected. All children share a child token of the
    /// parent's, so cancelling the parent cancels the whole group.
    pub(super) async fn spawn_agents(&self, run: &Run, input: Value) -> Vec<ToolResult> {
        let input: SpawnAgentsInput = match parse_input(input) {
            Ok(input) => input,
            Err(err) => return err,
        };

        let children = input.agents.into_iter().map(|request| {
            let cancel = run.cancel.child_token();
            async move {
                let agent_type = request.agent_type.clone();
                let result = match self.prepare_child(run, &request, cancel) {
                    Ok(child) => self.execute_run(child, request.prompt, request.params).await,
                    Err(e) => Err(e),
                };
                let output = match result {
                    Ok(outcome) => outcome.output,
                    Err(e) => AgentOutput::Error(e.to_string()),
                };
                if let AgentOutput::Error(message) = &output {
                    tracing::warn!(
                        run_id = %run.state.run_id,
                        agent_type = %agent_type,
                        error = %message,
                        "spawned agent failed"
                    );
                }
                json!({"agent_type": agent_type, "value": output.envelope()})
            }
        });

        let outputs = futures::future::join_all(children).await;
        vec![ToolResult::json(Value::Array(outputs))]
    }

    /// Build the state of a child spawned by `run`.
    fn prepare_child(
        &self,
        run: &Run,
        request: &SpawnRequest,
        cancel: CancellationToken,
    ) -> Result<Run> {
        let def = self.child_definition(run, &request.agent_type)?;

        let required = def.input_schema.required_params();
        if !required.is_empty() {
            let params = request.params.as_ref();
            if let Some(missing) = required
                .iter()
                .find(|key| params.and_then(|p| p.get(**key)).is_none())
            {
                return Err(Error::InvalidInput(format!(
                    "{} requires param {missing}",
                    def.id
                )));
            }
        }

        let mut state = AgentState::new(def.id.clone(), Some(run.state.run_id.clone()));
        state.system_prompt = if def.inherit_parent_system_prompt {
            run.state.system_prompt.clone()
        } else {
            def.system_prompt.clone().unwrap_or_default()
        };
        let mut history = if def.include_message_history {
            run.state.message_history.clone()
        } else {
            Vec::new()
        };
        history.extend(spawn_messages(&def, request.prompt.as_deref(), request.params.as_ref()));
        state.set_history(history);

        Ok(Run {
            def,
            registry: run.registry.clone(),
            state,
            depth: run.depth + 1,
            cancel,
        })
    }

    fn child_definition(&self, run: &Run, agent_type: &str) -> Result<Arc<AgentDefinition>> {
        if !run.def.can_spawn(agent_type) {
            return Err(Error::AgentNotSpawnable {
                agent_id: run.def.id.clone(),
                child: agent_type.to_string(),
            });
        }
        run.registry
            .get(agent_type)
            .ok_or_else(|| Error::AgentNotFound(agent_type.to_string()))
    }

    /// Run a child over `run`'s own history and adopt the history it leaves.
    ///
    /// A child that fails leaves the parent's history untouched and resumes
    /// the parent with an error result.
    pub(super) async fn spawn_inline(
        &self,
        run: &mut Run,
        spawn: InlineSpawn,
    ) -> Result<Vec<ToolResult>> {
        let def = self.child_definition(run, &spawn.agent_type)?;

        let mut state = AgentState::new(def.id.clone(), Some(run.state.run_id.clone()));
        state.system_prompt = run.state.system_prompt.clone();
        let mut history = run.state.message_history.clone();
        if let Some(prompt) = spawn.prompt.as_deref().filter(|p| !p.is_empty()) {
            history.push(Message::user(prompt));
        }
        state.set_history(history);

        let child = Run {
            def,
            registry: run.registry.clone(),
            state,
            depth: run.depth + 1,
            cancel: run.cancel.child_token(),
        };
        let result = self
            .execute_run(child, spawn.prompt.clone(), spawn.params.clone())
            .await;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(
                    run_id = %run.state.run_id,
                    agent_type = %spawn.agent_type,
                    error = %e,
                    "inline agent failed"
                );
                return Ok(vec![ToolResult::error(e.to_string())]);
            }
        };

        let results = vec![ToolResult::json(outcome.output.envelope())];
        run.state.set_history(outcome.state.message_history);
        if spawn.observable {
            let tool_call_id = generate_id("call");
            run.state.push_message(Message::new(
                Role::Assistant,
                vec![ContentPart::ToolCall {
                    tool_call_id: tool_call_id.clone(),
                    tool_name: builtin::SPAWN_AGENTS.into(),
                    input: json!({
                        "agents": [{
                            "agent_type": spawn.agent_type,
                            "prompt": spawn.prompt,
                            "params": spawn.params,
                        }]
                    }),
                }],
            ));
            run.state.push_message(Message::tool_result(
                tool_call_id,
                builtin::SPAWN_AGENTS,
                results.clone(),
            ));
        }
        Ok(results)
    }
}
