mod tool_text;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::types::messages::Message;
use crate::types::tools::ToolCall;

pub use tool_text::split_tool_calls;

/// Failure of a single inference call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InferenceError {
    #[error("model {model} not found")]
    ModelNotFound { model: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("inference timed out after {0:?}")]
    Timeout(Duration),

    #[error("aborted: {0}")]
    Aborted(String),
}

impl InferenceError {
    /// Cancellation is not worth retrying.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }
}

/// Tool metadata advertised to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Everything a backend needs for one inference turn.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub agent_id: String,
    pub run_id: String,
    pub model: String,
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
}

impl CompletionRequest {
    /// Text of the most recent user message.
    pub fn last_user_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.is_user())
            .and_then(Message::text)
    }
}

/// One model turn: prose plus any requested tool calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub text: String,
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl Completion {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_tool_call(mut self, call: ToolCall) -> Self {
        self.tool_calls.push(call);
        self
    }
}

/// The contract the engine needs from a model-serving adapter.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Run one completion. Implementations should return promptly with
    /// `Aborted` once `cancel` fires.
    async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion, InferenceError>;

    /// Run `n` independent completions of the same context.
    ///
    /// Results are returned in request order, not completion order.
    async fn complete_n(
        &self,
        request: &CompletionRequest,
        n: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, InferenceError> {
        let tokens: Vec<CancellationToken> = (0..n).map(|_| cancel.child_token()).collect();
        let results =
            futures::future::join_all(tokens.iter().map(|token| self.complete(request, token)))
                .await;
        results
            .into_iter()
            .map(|result| result.map(|completion| completion.text))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl LlmBackend for Echo {
        async fn complete(
            &self,
            request: &CompletionRequest,
            _cancel: &CancellationToken,
        ) -> Result<Completion, InferenceError> {
            let delay = request.messages.len() as u64;
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(Completion::text(request.last_user_text().unwrap_or_default()))
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            agent_id: "thinker".into(),
            run_id: "run_1".into(),
            model: "m".into(),
            system_prompt: String::new(),
            messages: vec![Message::assistant("hi"), Message::user("think")],
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn complete_n_keeps_request_order() {
        let cancel = CancellationToken::new();
        let texts = Echo.complete_n(&request(), 3, &cancel).await.unwrap();
        assert_eq!(texts, vec!["think", "think", "think"]);
    }

    #[test]
    fn aborted_is_distinguishable() {
        assert!(InferenceError::Aborted("user".into()).is_aborted());
        assert!(!InferenceError::Transport("reset".into()).is_aborted());
        assert_ne!(
            InferenceError::ModelNotFound { model: "x".into() },
            InferenceError::Transport("x".into())
        );
    }
}
