//! Resumable agent programs.
//!
//! A program is an async closure over a [`StepContext`]. Every call to one of
//! the context's directive methods suspends the program: the directive is
//! handed to whoever drives the [`StepGenerator`], and the program resumes
//! with the [`Resume`] value the driver sends back. The program runs on its
//! own task; the generator and the program only talk over channels, so the
//! driver keeps exclusive ownership of the run's [`AgentState`].

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::llm::InferenceError;
use crate::types::agents::AgentDefinition;
use crate::types::state::AgentState;
use crate::types::tools::{builtin, ToolCall, ToolResult};

/// A yield point of an agent program.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Execute a named tool.
    Tool(ToolCall),
    /// Run exactly one inference turn.
    Step,
    /// Run inference turns until the agent's turn concludes.
    StepAll,
    /// Emit literal assistant text without calling the model.
    StepText(String),
    /// Request N independent completions of the current context.
    GenerateN(usize),
    /// Run a child agent over this run's own history.
    SpawnInline(InlineSpawn),
}

impl Directive {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tool(_) => "tool",
            Self::Step => "step",
            Self::StepAll => "step_all",
            Self::StepText(_) => "step_text",
            Self::GenerateN(_) => "generate_n",
            Self::SpawnInline(_) => "spawn_inline",
        }
    }
}

/// Request to run a child agent that shares the parent's history.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineSpawn {
    pub agent_type: String,
    pub prompt: Option<String>,
    pub params: Option<Value>,
    /// Record the spawn as a tool call/result pair in the parent's history.
    pub observable: bool,
}

impl InlineSpawn {
    #[must_use]
    pub fn new(agent_type: impl Into<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            prompt: None,
            params: None,
            observable: true,
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    /// Keep the spawn out of recorded history.
    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.observable = false;
        self
    }
}

/// Value a program resumes with.
#[derive(Debug, Clone)]
pub struct Resume {
    /// State after the directive was executed.
    pub agent_state: AgentState,
    /// Results of a tool or spawn directive.
    pub tool_result: Vec<ToolResult>,
    /// Set by `STEP`/`STEP_ALL` when the agent has nothing further queued.
    pub steps_complete: bool,
    /// Outputs of `GENERATE_N`, in request order.
    pub n_responses: Vec<String>,
    /// Inference failure or abort during `STEP`, `STEP_ALL` or `GENERATE_N`.
    pub error: Option<InferenceError>,
}

impl Resume {
    #[must_use]
    pub fn new(agent_state: AgentState) -> Self {
        Self {
            agent_state,
            tool_result: Vec::new(),
            steps_complete: false,
            n_responses: Vec::new(),
            error: None,
        }
    }
}

/// Inputs a program starts from.
#[derive(Debug, Clone)]
pub struct StepInput {
    /// Definition of the agent being run.
    pub definition: Arc<AgentDefinition>,
    pub agent_state: AgentState,
    pub prompt: Option<String>,
    pub params: Option<Value>,
}

/// Creates one program instance per run.
pub type ProgramFactory =
    Arc<dyn Fn(StepContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Helper to create a [`ProgramFactory`] from an async closure.
pub fn program<F, Fut>(f: F) -> ProgramFactory
where
    F: Fn(StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

type Envelope = (Directive, oneshot::Sender<Resume>);

/// The program's side of the channel pair.
pub struct StepContext {
    definition: Arc<AgentDefinition>,
    agent_state: AgentState,
    prompt: Option<String>,
    params: Option<Value>,
    tx: mpsc::Sender<Envelope>,
}

impl StepContext {
    /// State as of the most recent resume.
    pub fn agent_state(&self) -> &AgentState {
        &self.agent_state
    }

    /// Whether the driver will execute a tool directive for `tool_name`.
    pub fn allows_tool(&self, tool_name: &str) -> bool {
        self.definition.allows_tool(tool_name)
    }

    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    pub fn params(&self) -> Option<&Value> {
        self.params.as_ref()
    }

    /// Suspend on `directive` until the driver resumes the program.
    ///
    /// Returns [`Error::Halted`] once the driver has stopped driving this run.
    pub async fn yield_directive(&mut self, directive: Directive) -> Result<Resume> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((directive, reply_tx))
            .await
            .map_err(|_| Error::Halted)?;
        let resume = reply_rx.await.map_err(|_| Error::Halted)?;
        self.agent_state = resume.agent_state.clone();
        Ok(resume)
    }

    pub async fn tool(&mut self, call: ToolCall) -> Result<Resume> {
        self.yield_directive(Directive::Tool(call)).await
    }

    pub async fn step(&mut self) -> Result<Resume> {
        self.yield_directive(Directive::Step).await
    }

    pub async fn step_all(&mut self) -> Result<Resume> {
        self.yield_directive(Directive::StepAll).await
    }

    pub async fn step_text(&mut self, text: impl Into<String>) -> Result<()> {
        self.yield_directive(Directive::StepText(text.into()))
            .await
            .map(|_| ())
    }

    pub async fn generate_n(&mut self, n: usize) -> Result<Resume> {
        self.yield_directive(Directive::GenerateN(n)).await
    }

    pub async fn spawn_inline(&mut self, spawn: InlineSpawn) -> Result<Resume> {
        self.yield_directive(Directive::SpawnInline(spawn)).await
    }

    /// Write the structured output without recording the call.
    pub async fn set_output(&mut self, value: Value) -> Result<Resume> {
        self.tool(ToolCall::new(builtin::SET_OUTPUT, value).unrecorded())
            .await
    }
}

/// What the generator did on the last resume.
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratorState {
    Yielded(Directive),
    Complete,
}

/// The driver's side: resumes a program and receives its next directive.
pub struct StepGenerator {
    rx: mpsc::Receiver<Envelope>,
    pending: Option<oneshot::Sender<Resume>>,
    task: Option<JoinHandle<Result<()>>>,
}

impl StepGenerator {
    /// Start a program instance on its own task.
    ///
    /// The program runs until its first yield; nothing is executed on its
    /// behalf until [`resume`](Self::resume) is called.
    pub fn start(factory: &ProgramFactory, input: StepInput) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let ctx = StepContext {
            definition: input.definition,
            agent_state: input.agent_state,
            prompt: input.prompt,
            params: input.params,
            tx,
        };
        let task = tokio::spawn(factory(ctx));
        Self {
            rx,
            pending: None,
            task: Some(task),
        }
    }

    /// Resume the program with the result of its last directive.
    ///
    /// The first call takes `None`; every later call must supply the value
    /// for the directive that was yielded.
    pub async fn resume(&mut self, value: Option<Resume>) -> Result<GeneratorState> {
        if let Some(reply) = self.pending.take() {
            let Some(value) = value else {
                return Err(Error::Program(
                    "suspended program resumed without a value".into(),
                ));
            };
            if reply.send(value).is_err() {
                tracing::debug!("program stopped waiting for its resume value");
            }
        }

        match self.rx.recv().await {
            Some((directive, reply)) => {
                self.pending = Some(reply);
                Ok(GeneratorState::Yielded(directive))
            }
            None => self.finish().await,
        }
    }

    async fn finish(&mut self) -> Result<GeneratorState> {
        let Some(task) = self.task.take() else {
            return Ok(GeneratorState::Complete);
        };
        match task.await {
            Ok(Ok(())) | Ok(Err(Error::Halted)) => Ok(GeneratorState::Complete),
            Ok(Err(e)) => Err(e),
            Err(join) if join.is_panic() => Err(Error::ProgramPanicked(join.to_string())),
            Err(join) => Err(Error::Program(join.to_string())),
        }
    }
}

impl Drop for StepGenerator {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Program used by agents without their own: one `STEP_ALL`.
pub fn step_all_program() -> ProgramFactory {
    program(|mut ctx| async move {
        ctx.step_all().await?;
        Ok(())
    })
}
