//! Helpers shared by unit tests.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::driver::StepDriver;
use crate::llm::{Completion, CompletionRequest, InferenceError, LlmBackend};
use crate::registry::AgentRegistry;
use crate::tools::{ToolExecutor, ToolSet};

/// A backend whose completions come from a closure over the request.
pub(crate) struct FnBackend<F>(F);

#[async_trait]
impl<F, Fut> LlmBackend for FnBackend<F>
where
    F: Fn(CompletionRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Completion, InferenceError>> + Send,
{
    async fn complete(
        &self,
        request: &CompletionRequest,
        _cancel: &CancellationToken,
    ) -> Result<Completion, InferenceError> {
        (self.0)(request.clone()).await
    }
}

pub(crate) fn backend_fn<F, Fut>(f: F) -> Arc<dyn LlmBackend>
where
    F: Fn(CompletionRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Completion, InferenceError>> + Send + 'static,
{
    Arc::new(FnBackend(f))
}

/// A backend that answers every request with plain text.
pub(crate) fn text_backend(text: &'static str) -> Arc<dyn LlmBackend> {
    backend_fn(move |_req| async move { Ok(Completion::text(text)) })
}

pub(crate) fn driver(
    registry: AgentRegistry,
    tools: ToolSet,
    backend: Arc<dyn LlmBackend>,
) -> StepDriver {
    let tools: Arc<dyn ToolExecutor> = Arc::new(tools);
    StepDriver::new(Arc::new(registry), tools, backend)
}

/// Install a subscriber so `RUST_LOG`-style output shows up in failing tests.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
