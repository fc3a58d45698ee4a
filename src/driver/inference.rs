use std::future::Future;

use tokio_util::sync::CancellationToken;

use super::{Run, RunEvent, StepDriver};
use crate::llm::{CompletionRequest, InferenceError};
use crate::types::messages::{ContentPart, Message, Role};
use crate::types::state::generate_id;
use crate::types::tools::{builtin, ToolCall, ToolResult};

impl StepDriver {
    /// `STEP`: one inference turn plus the tool calls the model asked for.
    ///
    /// Returns whether the agent's turn is complete, and the inference error
    /// if the model call failed. Failures never touch the history.
    pub(super) async fn inference_turn(&self, run: &mut Run) -> (bool, Option<InferenceError>) {
        let request = self.completion_request(run);
        let completion = match self
            .guarded(&run.cancel, self.backend.complete(&request, &run.cancel))
            .await
        {
            Ok(completion) => completion,
            Err(error) => {
                self.inference_failed(run, &error);
                return (false, Some(error));
            }
        };

        let mut content = Vec::new();
        if let Some(reasoning) = completion.reasoning.filter(|r| !r.is_empty()) {
            content.push(ContentPart::Reasoning { text: reasoning });
        }
        if !completion.text.is_empty() {
            content.push(ContentPart::Text {
                text: completion.text,
            });
        }
        let calls: Vec<ToolCall> = completion
            .tool_calls
            .into_iter()
            .map(|mut call| {
                let id = call
                    .tool_call_id
                    .take()
                    .unwrap_or_else(|| generate_id("call"));
                content.push(ContentPart::ToolCall {
                    tool_call_id: id.clone(),
                    tool_name: call.tool_name.clone(),
                    input: call.input.clone(),
                });
                ToolCall {
                    tool_call_id: Some(id),
                    include_tool_call: true,
                    ..call
                }
            })
            .collect();
        if !content.is_empty() {
            run.state
                .push_message(Message::new(Role::Assistant, content));
        }

        let mut ended = calls.is_empty();
        for call in calls {
            ended |= call.tool_name == builtin::END_TURN;
            if run.def.allows_tool(&call.tool_name) {
                self.execute_tool(run, call, false).await;
            } else {
                // The model asked for something it was never offered; tell it.
                tracing::warn!(
                    run_id = %run.state.run_id,
                    tool = %call.tool_name,
                    "model requested a tool outside the agent's set"
                );
                let message = format!(
                    "tool {} is not available to agent {}",
                    call.tool_name, run.def.id
                );
                run.state.push_message(Message::tool_result(
                    call.tool_call_id.unwrap_or_default(),
                    call.tool_name,
                    vec![ToolResult::error(message)],
                ));
            }
        }
        (ended, None)
    }

    /// `STEP_ALL`: inference turns until the agent ends its turn, inference
    /// fails, or the turn ceiling is reached.
    pub(super) async fn inference_loop(&self, run: &mut Run) -> (bool, Option<InferenceError>) {
        for _ in 0..self.options.max_inference_turns {
            let (complete, error) = self.inference_turn(run).await;
            if complete || error.is_some() {
                return (complete, error);
            }
        }
        tracing::warn!(
            run_id = %run.state.run_id,
            limit = self.options.max_inference_turns,
            "inference turn limit reached"
        );
        (false, None)
    }

    /// `GENERATE_N`: independent completions of the current context.
    ///
    /// Nothing is recorded. Any failure fails the whole batch.
    pub(super) async fn generate_n(&self, run: &Run, n: usize) -> (Vec<String>, Option<InferenceError>) {
        let n = n.min(self.options.max_generate_n);
        if n == 0 {
            return (Vec::new(), None);
        }
        let mut request = self.completion_request(run);
        request.tools.clear();
        match self
            .guarded(&run.cancel, self.backend.complete_n(&request, n, &run.cancel))
            .await
        {
            Ok(responses) => (responses, None),
            Err(error) => {
                self.inference_failed(run, &error);
                (Vec::new(), Some(error))
            }
        }
    }

    fn completion_request(&self, run: &Run) -> CompletionRequest {
        let mut messages = run.state.message_history.clone();
        if let Some(step_prompt) = &run.def.step_prompt {
            messages.push(Message::user(step_prompt.clone()));
        }
        CompletionRequest {
            agent_id: run.def.id.clone(),
            run_id: run.state.run_id.clone(),
            model: run
                .def
                .model
                .clone()
                .unwrap_or_else(|| self.options.default_model.clone()),
            system_prompt: run.state.system_prompt.clone(),
            messages,
            tools: self.tool_specs(run),
        }
    }

    /// Apply the inference timeout and race the call against cancellation.
    async fn guarded<T>(
        &self,
        cancel: &CancellationToken,
        call: impl Future<Output = Result<T, InferenceError>>,
    ) -> Result<T, InferenceError> {
        let timed = async {
            match self.options.inference_timeout {
                Some(limit) => tokio::time::timeout(limit, call)
                    .await
                    .unwrap_or(Err(InferenceError::Timeout(limit))),
                None => call.await,
            }
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(InferenceError::Aborted("run cancelled".into())),
            result = timed => result,
        }
    }

    fn inference_failed(&self, run: &Run, error: &InferenceError) {
        tracing::warn!(run_id = %run.state.run_id, agent_id = %run.def.id, error = %error, "inference failed");
        self.emit(RunEvent::InferenceFailed {
            run_id: run.state.run_id.clone(),
            error: error.clone(),
        });
    }
}
