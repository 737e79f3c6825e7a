//! `Channel` implementation for the WeCom encrypted bot callback (§4.2, §4.3).
//!
//! `start` binds the axum server (`GET`/`POST /wecom/bot`); `send` looks up
//! the single-use response URL cached for the chat and POSTs a markdown
//! reply with the documented retry policy.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use myclaw_bus::MessageBus;
use myclaw_channels::{error::ChannelError, types::ChannelStatus, Allowlist, Channel};
use myclaw_core::OutboundMessage;

use crate::cache::{DedupCache, ReplyCache};
use crate::crypto;
use crate::server::{self, WecomState};

const MAX_REPLY_BYTES: usize = 20_480;
const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ATTEMPTS: u32 = 3;

pub struct WecomChannel {
    port: u16,
    state: Arc<WecomState>,
    status: Mutex<ChannelStatus>,
}

impl WecomChannel {
    pub fn new(
        token: impl Into<String>,
        encoding_aes_key: &str,
        receive_id: impl Into<String>,
        port: u16,
        allowlist: Allowlist,
        reply_cache_ttl: Duration,
        dedup_ttl: Duration,
        bus: Arc<MessageBus>,
    ) -> Result<Self, ChannelError> {
        let aes_key = crypto::decode_aes_key(encoding_aes_key)
            .map_err(|e| ChannelError::ConfigError(e.to_string()))?;
        let state = Arc::new(WecomState {
            token: token.into(),
            aes_key,
            receive_id: receive_id.into(),
            allowlist,
            bus,
            reply_cache: ReplyCache::new(reply_cache_ttl),
            dedup_cache: DedupCache::new(dedup_ttl),
            http: reqwest::Client::new(),
            status: Mutex::new(ChannelStatus::Stopped),
        });
        Ok(Self {
            port,
            state,
            status: Mutex::new(ChannelStatus::Stopped),
        })
    }

    fn set_status(&self, status: ChannelStatus) {
        *self.status.lock().unwrap() = status.clone();
        *self.state.status.lock().unwrap() = status;
    }
}

#[async_trait]
impl Channel for WecomChannel {
    fn name(&self) -> &str {
        "wecom"
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
                warn!(error = %e, "wecom http server exited with error");
            }
        });

        self.set_status(ChannelStatus::Running);
        info!(port = self.port, "wecom channel started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        self.set_status(ChannelStatus::Stopped);
        Ok(())
    }

    /// Looks up the cached response URL for `msg.chat_id` and POSTs a
    /// markdown reply, retrying up to 3 times with `attempt^2 * 100ms`
    /// backoff on retryable failures (§4.3 "Outbound send").
    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError> {
        let response_url = self
            .state
            .reply_cache
            .get(&msg.chat_id)
            .ok_or_else(|| ChannelError::NoReplyRoute(msg.chat_id.clone()))?;

        let content = truncate_to_bytes(&msg.content, MAX_REPLY_BYTES);
        let body = serde_json::json!({
            "msgtype": "markdown",
            "markdown": { "content": content },
        });

        let mut last_err = ChannelError::SendFailed("no attempts made".to_string());
        for attempt in 1..=MAX_ATTEMPTS {
            match self.try_send(&response_url, &body).await {
                Ok(()) => return Ok(()),
                Err((retryable, err)) => {
                    last_err = err;
                    if !retryable || attempt == MAX_ATTEMPTS {
                        return Err(last_err);
                    }
                    let backoff = Duration::from_millis((attempt as u64).pow(2) * 100);
                    tokio::time::sleep(backoff).await;
                }
            }
        }
        Err(last_err)
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().unwrap().clone()
    }
}

impl WecomChannel {
    /// Returns `Ok(())` on success, or `Err((retryable, error))`.
    async fn try_send(
        &self,
        response_url: &str,
        body: &serde_json::Value,
    ) -> Result<(), (bool, ChannelError)> {
        let resp = self
            .state
            .http
            .post(response_url)
            .timeout(SEND_TIMEOUT)
            .json(body)
            .send()
            .await
            .map_err(|e| (true, ChannelError::SendFailed(e.to_string())))?;

        let status = resp.status();
        if status.as_u16() >= 500 {
            return Err((true, ChannelError::SendFailed(format!("http {status}"))));
        }
        if !status.is_success() {
            return Err((
                false,
                ChannelError::SendFailed(format!("http {status}")),
            ));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| (true, ChannelError::SendFailed(e.to_string())))?;
        if bytes.is_empty() {
            return Ok(());
        }

        let parsed: serde_json::Value = match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(_) => return Ok(()),
        };
        let errcode = parsed.get("errcode").and_then(|v| v.as_i64());
        match errcode {
            None | Some(0) => Ok(()),
            Some(-1) | Some(6000) => Err((
                true,
                ChannelError::SendFailed(format!("errcode {}", errcode.unwrap())),
            )),
            Some(code) => Err((false, ChannelError::SendFailed(format!("errcode {code}")))),
        }
    }
}

/// UTF-8-safe truncation to at most `max_bytes`, cutting on a rune boundary.
fn truncate_to_bytes(content: &str, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    content[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundary() {
        let content = "héllo world".repeat(5000);
        let truncated = truncate_to_bytes(&content, 100);
        assert!(truncated.len() <= 100);
        assert!(content.starts_with(&truncated));
    }

    #[test]
    fn truncate_is_noop_under_limit() {
        assert_eq!(truncate_to_bytes("short", 100), "short");
    }
}
