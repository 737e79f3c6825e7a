//! `Channel` implementation for the Feishu webhook transport (§4.2, §6).

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use myclaw_bus::MessageBus;
use myclaw_channels::{error::ChannelError, types::ChannelStatus, Allowlist, Channel};
use myclaw_core::OutboundMessage;

use crate::server::{self, FeishuState};
use crate::token::TenantTokenCache;

const SEND_API_URL: &str = "https://open.feishu.cn/open-apis/im/v1/messages?receive_id_type=chat_id";

pub struct FeishuChannel {
    port: u16,
    state: Arc<FeishuState>,
    tokens: TenantTokenCache,
    http: reqwest::Client,
    status: Mutex<ChannelStatus>,
}

impl FeishuChannel {
    pub fn new(
        app_id: impl Into<String>,
        app_secret: impl Into<String>,
        port: u16,
        verification_token: Option<String>,
        allowlist: Allowlist,
        bus: Arc<MessageBus>,
    ) -> Self {
        let app_id = app_id.into();
        let app_secret = app_secret.into();
        Self {
            port,
            state: Arc::new(FeishuState {
                verification_token,
                allowlist,
                bus,
                status: Mutex::new(ChannelStatus::Stopped),
            }),
            tokens: TenantTokenCache::new(app_id, app_secret),
            http: reqwest::Client::new(),
            status: Mutex::new(ChannelStatus::Stopped),
        }
    }

    fn set_status(&self, status: ChannelStatus) {
        *self.status.lock().unwrap() = status.clone();
        *self.state.status.lock().unwrap() = status;
    }
}

#[async_trait]
impl Channel for FeishuChannel {
    fn name(&self) -> &str {
        "feishu"
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
                warn!(error = %e, "feishu http server exited with error");
            }
        });

        self.set_status(ChannelStatus::Running);
        info!(port = self.port, "feishu channel started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        self.set_status(ChannelStatus::Stopped);
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError> {
        let token = self
            .tokens
            .get(&self.http)
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;

        let content = serde_json::json!({ "text": msg.content }).to_string();
        let resp = self
            .http
            .post(SEND_API_URL)
            .bearer_auth(token)
            .json(&serde_json::json!({
                "receive_id": msg.chat_id,
                "msg_type": "text",
                "content": content,
            }))
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        match body.get("code").and_then(serde_json::Value::as_i64) {
            Some(0) | None => Ok(()),
            Some(code) => Err(ChannelError::SendFailed(format!(
                "feishu api error {code}: {}",
                body.get("msg").and_then(serde_json::Value::as_str).unwrap_or("")
            ))),
        }
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_channel_starts_stopped() {
        let bus = Arc::new(MessageBus::new(10));
        let channel = FeishuChannel::new("app", "secret", 0, None, Allowlist::default(), bus);
        assert_eq!(channel.status(), ChannelStatus::Stopped);
        assert_eq!(channel.name(), "feishu");
    }
}
