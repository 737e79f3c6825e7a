//! Wires a fired cron job to the model runtime and, optionally, back onto
//! the outbound bus (§4.8 step 2, §4.9 composition step 4: "OnJob =
//! runAgent(job.payload.message)").

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use myclaw_bus::MessageBus;
use myclaw_core::OutboundMessage;
use myclaw_runtime::{ModelRuntime, RunRequest};
use myclaw_scheduler::{CronJob, JobHandler};

pub struct OnJobHandler {
    runtime: Arc<dyn ModelRuntime>,
    bus: Arc<MessageBus>,
}

impl OnJobHandler {
    pub fn new(runtime: Arc<dyn ModelRuntime>, bus: Arc<MessageBus>) -> Self {
        Self { runtime, bus }
    }
}

#[async_trait]
impl JobHandler for OnJobHandler {
    async fn handle(&self, job: &CronJob) -> std::result::Result<(), String> {
        let req = RunRequest {
            prompt: job.payload.message.clone(),
            content_blocks: Vec::new(),
            session_id: format!("cron:{}", job.id),
        };
        let result = self
            .runtime
            .run(CancellationToken::new(), req)
            .await
            .map_err(|e| e.to_string())?;

        if job.payload.deliver {
            match (&job.payload.channel, &job.payload.chat_id) {
                (Some(channel), Some(chat_id)) => {
                    let msg = OutboundMessage::new(channel.clone(), chat_id.clone(), result.output);
                    if let Err(e) = self.bus.publish_outbound(msg).await {
                        return Err(e.to_string());
                    }
                }
                _ => {
                    warn!(job_id = %job.id, "job requests delivery but is missing channel/chat_id");
                }
            }
        }
        Ok(())
    }
}
