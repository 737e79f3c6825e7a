//! `Channel` implementation for the embedded web UI (§4.2, §6).

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use myclaw_bus::MessageBus;
use myclaw_channels::{error::ChannelError, types::ChannelStatus, Allowlist, Channel};
use myclaw_core::OutboundMessage;

use crate::server::{self, WebuiState};

pub struct WebuiChannel {
    port: u16,
    state: Arc<WebuiState>,
    status: Mutex<ChannelStatus>,
}

impl WebuiChannel {
    pub fn new(
        port: u16,
        static_dir: impl Into<String>,
        allowlist: Allowlist,
        bus: Arc<MessageBus>,
    ) -> Self {
        Self {
            port,
            state: Arc::new(WebuiState {
                bus,
                allowlist,
                sessions: DashMap::new(),
                static_dir: static_dir.into(),
            }),
            status: Mutex::new(ChannelStatus::Stopped),
        }
    }

    fn set_status(&self, status: ChannelStatus) {
        *self.status.lock().unwrap() = status;
    }
}

#[async_trait]
impl Channel for WebuiChannel {
    fn name(&self) -> &str {
        "webui"
    }

    async fn start(&self, ctx: CancellationToken) -> Result<(), ChannelError> {
        let router = server::router(self.state.clone());
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ChannelError::StartFailed(e.to_string()))?;

        tokio::spawn(async move {
            let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
                ctx.cancelled().await;
            });
            if let Err(e) = serve.await {
                warn!(error = %e, "webui http server exited with error");
            }
        });

        self.set_status(ChannelStatus::Running);
        info!(port = self.port, "webui channel started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        self.set_status(ChannelStatus::Stopped);
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError> {
        let tx = self
            .state
            .sessions
            .get(&msg.chat_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ChannelError::NoReplyRoute(msg.chat_id.clone()))?;

        let payload = serde_json::json!({ "type": "message", "content": msg.content }).to_string();
        tx.send(payload)
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_without_an_open_session_errors() {
        let bus = Arc::new(MessageBus::new(10));
        let channel = WebuiChannel::new(0, "static", Allowlist::default(), bus);
        assert_eq!(channel.status(), ChannelStatus::Stopped);

        let msg = OutboundMessage::new("webui".to_string(), "nobody".to_string(), "hi".to_string());
        let err = channel.send(&msg).await.unwrap_err();
        assert!(matches!(err, ChannelError::NoReplyRoute(_)));
    }
}
