//! Reference host runtime.
//!
//! [`StepDriver`] instantiates agent programs, executes whatever they yield
//! and feeds the results back until the program completes. It owns each
//! run's [`AgentState`]; programs only ever see snapshots.

mod builtin;
mod events;
mod inference;
mod spawn;

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::llm::LlmBackend;
use crate::program::{step_all_program, Directive, GeneratorState, Resume, StepGenerator, StepInput};
use crate::registry::AgentRegistry;
use crate::tools::ToolExecutor;
use crate::types::agents::AgentDefinition;
use crate::types::messages::Message;
use crate::types::options::DriverOptions;
use crate::types::state::{AgentOutput, AgentState, RunInput};

pub use events::RunEvent;

/// The result of a finished run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub agent_id: String,
    pub output: AgentOutput,
    /// Final state, including the full history.
    pub state: AgentState,
}

/// Drives agent programs against a tool executor and a model backend.
#[derive(Clone)]
pub struct StepDriver {
    registry: Arc<AgentRegistry>,
    tools: Arc<dyn ToolExecutor>,
    backend: Arc<dyn LlmBackend>,
    options: DriverOptions,
    events: Option<mpsc::UnboundedSender<RunEvent>>,
}

/// Everything the driver tracks for one live run.
struct Run {
    def: Arc<AgentDefinition>,
    /// Snapshot taken when the outermost run started.
    registry: Arc<AgentRegistry>,
    state: AgentState,
    depth: u32,
    cancel: CancellationToken,
}

impl StepDriver {
    pub fn new(
        registry: Arc<AgentRegistry>,
        tools: Arc<dyn ToolExecutor>,
        backend: Arc<dyn LlmBackend>,
    ) -> Self {
        Self {
            registry,
            tools,
            backend,
            options: DriverOptions::default(),
            events: None,
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: DriverOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    /// Swap in a new registry. Runs already in flight keep the old one.
    pub fn set_registry(&mut self, registry: Arc<AgentRegistry>) {
        self.registry = registry;
    }

    /// Subscribe to run events. Replaces any earlier subscription.
    pub fn events(&mut self) -> UnboundedReceiverStream<RunEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        UnboundedReceiverStream::new(rx)
    }

    /// Run `agent_id` to completion.
    ///
    /// Cancelling `cancel` aborts in-flight inference and tools for the run
    /// and every run it spawned; the programs see aborted results.
    pub async fn run(
        &self,
        agent_id: &str,
        input: RunInput,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        let registry = self.registry.clone();
        let def = registry
            .get(agent_id)
            .ok_or_else(|| Error::AgentNotFound(agent_id.to_string()))?;

        let mut state = AgentState::new(agent_id, None);
        state.system_prompt = input
            .system_prompt
            .or_else(|| def.system_prompt.clone())
            .unwrap_or_default();
        let mut history = input.message_history;
        history.extend(spawn_messages(&def, input.prompt.as_deref(), input.params.as_ref()));
        state.set_history(history);

        let run = Run {
            def,
            registry,
            state,
            depth: 0,
            cancel,
        };
        self.execute_run(run, input.prompt, input.params).await
    }

    /// Drive one run's program to completion.
    fn execute_run<'a>(
        &'a self,
        mut run: Run,
        prompt: Option<String>,
        params: Option<Value>,
    ) -> BoxFuture<'a, Result<RunOutcome>> {
        Box::pin(async move {
            if run.depth > self.options.max_spawn_depth {
                return Err(Error::SpawnDepthExceeded { depth: run.depth });
            }
            let run_id = run.state.run_id.clone();
            let agent_id = run.def.id.clone();
            let initial_len = run.state.message_history.len();
            tracing::debug!(
                run_id = %run_id,
                agent_id = %agent_id,
                parent_id = ?run.state.parent_id,
                depth = run.depth,
                "run started"
            );
            self.emit(RunEvent::RunStarted {
                run_id: run_id.clone(),
                agent_id: agent_id.clone(),
                parent_id: run.state.parent_id.clone(),
            });

            let mut steps = 0;
            let result = self.drive(&mut run, prompt, params, &mut steps).await;
            self.tools.release_run(&run_id).await;

            tracing::debug!(run_id = %run_id, agent_id = %agent_id, steps, ok = result.is_ok(), "run finished");
            self.emit(RunEvent::RunFinished {
                run_id: run_id.clone(),
                agent_id: agent_id.clone(),
                steps,
                error: result.as_ref().err().map(ToString::to_string),
            });
            result?;

            Ok(RunOutcome {
                output: AgentOutput::from_state(run.def.output_mode, &run.state, initial_len),
                run_id,
                agent_id,
                state: run.state,
            })
        })
    }

    async fn drive(
        &self,
        run: &mut Run,
        prompt: Option<String>,
        params: Option<Value>,
        steps: &mut u32,
    ) -> Result<()> {
        let factory = run.def.program.clone().unwrap_or_else(step_all_program);
        let mut generator = StepGenerator::start(
            &factory,
            StepInput {
                definition: run.def.clone(),
                agent_state: run.state.clone(),
                prompt,
                params,
            },
        );

        let mut resume = None;
        loop {
            let directive = match generator.resume(resume.take()).await? {
                GeneratorState::Complete => return Ok(()),
                GeneratorState::Yielded(directive) => directive,
            };
            *steps += 1;
            if *steps > self.options.max_steps_per_run {
                tracing::error!(
                    run_id = %run.state.run_id,
                    limit = self.options.max_steps_per_run,
                    "step limit exceeded"
                );
                return Err(Error::StepLimitExceeded {
                    run_id: run.state.run_id.clone(),
                    limit: self.options.max_steps_per_run,
                });
            }
            resume = Some(self.execute_directive(run, directive).await?);
        }
    }

    async fn execute_directive(&self, run: &mut Run, directive: Directive) -> Result<Resume> {
        let tool = match &directive {
            Directive::Tool(call) => Some(call.tool_name.as_str()),
            _ => None,
        };
        tracing::debug!(
            run_id = %run.state.run_id,
            directive = directive.kind(),
            tool = ?tool,
            "executing directive"
        );

        match directive {
            Directive::Tool(call) => {
                if !run.def.allows_tool(&call.tool_name) {
                    tracing::error!(
                        run_id = %run.state.run_id,
                        agent_id = %run.def.id,
                        tool = %call.tool_name,
                        "tool not allowed"
                    );
                    return Err(Error::ToolNotAllowed {
                        agent_id: run.def.id.clone(),
                        tool_name: call.tool_name,
                    });
                }
                let tool_result = self.execute_tool(run, call, true).await;
                Ok(Resume {
                    tool_result,
                    ..Resume::new(run.state.clone())
                })
            }
            Directive::Step => {
                let (steps_complete, error) = self.inference_turn(run).await;
                Ok(Resume {
                    steps_complete,
                    error,
                    ..Resume::new(run.state.clone())
                })
            }
            Directive::StepAll => {
                let (steps_complete, error) = self.inference_loop(run).await;
                Ok(Resume {
                    steps_complete,
                    error,
                    ..Resume::new(run.state.clone())
                })
            }
            Directive::StepText(text) => {
                self.emit(RunEvent::StepText {
                    run_id: run.state.run_id.clone(),
                    text: text.clone(),
                });
                run.state.push_message(Message::assistant(text));
                Ok(Resume::new(run.state.clone()))
            }
            Directive::GenerateN(n) => {
                let (n_responses, error) = self.generate_n(run, n).await;
                Ok(Resume {
                    n_responses,
                    error,
                    ..Resume::new(run.state.clone())
                })
            }
            Directive::SpawnInline(spawn) => {
                let tool_result = self.spawn_inline(run, spawn).await?;
                Ok(Resume {
                    tool_result,
                    ..Resume::new(run.state.clone())
                })
            }
        }
    }

    fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.events {
            // A dropped receiver only means nobody is listening.
            let _ = tx.send(event);
        }
    }
}

impl std::fmt::Debug for StepDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepDriver")
            .field("agents", &self.registry.ids())
            .field("options", &self.options)
            .field("events", &self.events.is_some())
            .finish_non_exhaustive()
    }
}

/// Messages a new run starts with after any inherited history: the prompt
/// and rendered params, then the agent's instructions.
fn spawn_messages(def: &AgentDefinition, prompt: Option<&str>, params: Option<&Value>) -> Vec<Message> {
    let mut messages = Vec::new();
    let mut parts = Vec::new();
    if let Some(prompt) = prompt.filter(|p| !p.is_empty()) {
        parts.push(prompt.to_string());
    }
    if let Some(params) = params.filter(|p| !p.is_null()) {
        parts.push(format!("Params: {params}"));
    }
    if !parts.is_empty() {
        messages.push(Message::user(parts.join("\n\n")));
    }
    if let Some(instructions) = &def.instructions_prompt {
        messages.push(Message::user(instructions.clone()));
    }
    messages
}
