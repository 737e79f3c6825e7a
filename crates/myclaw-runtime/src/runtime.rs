use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use myclaw_core::ContentBlock;

use crate::error::Result;

/// Request to the model runtime (§6 "Runtime request/response").
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub prompt: String,
    pub content_blocks: Vec<ContentBlock>,
    pub session_id: String,
}

/// Response from the model runtime. The orchestrator reads only `output`
/// and never interprets tool calls — tool use is out of scope (§6, §9).
#[derive(Debug, Clone)]
pub struct RunResult {
    pub output: String,
}

/// Narrow interface the gateway orchestrator drives the model through.
///
/// Deliberately smaller than a full agent-loop interface: one request, one
/// response, no streaming, no tool dispatch. `ctx` cancellation must surface
/// as [`crate::error::RuntimeError::Cancelled`].
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    async fn run(&self, ctx: CancellationToken, req: RunRequest) -> Result<RunResult>;
}
