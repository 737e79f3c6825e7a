//! Telegram long-poll channel (§4.2, §6 "Telegram splits outbound at 4000
//! characters on newlines"). Out-of-core per spec §1 — this crate provides
//! only the `Channel` interface plus the sender-allowlist policy; the
//! transport itself is teloxide's long-poll `getUpdates` loop.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use myclaw_bus::MessageBus;
use myclaw_channels::{error::ChannelError, types::ChannelStatus, Allowlist, Channel};
use myclaw_core::{ContentBlock, InboundMessage, OutboundMessage};

const SPLIT_LIMIT: usize = 4000;
const LONG_POLL_TIMEOUT_SECS: u32 = 30;

pub struct TelegramChannel {
    bot: Bot,
    bus: Arc<MessageBus>,
    allowlist: Allowlist,
    status: Mutex<ChannelStatus>,
}

impl TelegramChannel {
    pub fn new(token: impl Into<String>, bus: Arc<MessageBus>, allowlist: Allowlist) -> Self {
        Self {
            bot: Bot::new(token.into()),
            bus,
            allowlist,
            status: Mutex::new(ChannelStatus::Stopped),
        }
    }

    fn set_status(&self, status: ChannelStatus) {
        *self.status.lock().unwrap() = status;
    }

    async fn poll_loop(bot: Bot, bus: Arc<MessageBus>, allowlist: Allowlist, ctx: CancellationToken) {
        let mut offset: i32 = 0;
        loop {
            if ctx.is_cancelled() {
                break;
            }
            let updates = tokio::select! {
                _ = ctx.cancelled() => break,
                result = bot.get_updates().offset(offset).timeout(LONG_POLL_TIMEOUT_SECS).send() => result,
            };
            let updates = match updates {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(error = %e, "telegram getUpdates failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.id.0 as i32 + 1);
                let UpdateKind::Message(message) = update.kind else {
                    continue;
                };
                let Some(sender) = message.from() else {
                    continue;
                };
                let sender_id = sender.id.0.to_string();
                if !allowlist.is_allowed(&sender_id) {
                    info!(sender_id, "telegram message rejected by allowlist");
                    continue;
                }
                let text = message.text().unwrap_or_default().to_string();
                let inbound = InboundMessage {
                    channel: "telegram".to_string(),
                    sender_id,
                    chat_id: message.chat.id.0.to_string(),
                    content: text,
                    timestamp: chrono::Utc::now().timestamp_millis(),
                    metadata: Default::default(),
                    blocks: Vec::<ContentBlock>::new(),
                };
                if inbound.is_empty() {
                    continue;
                }
                if let Err(e) = bus.publish_inbound(inbound).await {
                    warn!(error = %e, "failed to publish telegram inbound message");
                }
            }
        }
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self, ctx: CancellationToken) -> Result<(), ChannelError> {
        let bot = self.bot.clone();
        let bus = self.bus.clone();
        let allowlist = self.allowlist.clone();
        tokio::spawn(Self::poll_loop(bot, bus, allowlist, ctx));
        self.set_status(ChannelStatus::Running);
        info!("telegram channel started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        self.set_status(ChannelStatus::Stopped);
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError> {
        let chat_id_raw: i64 = msg
            .chat_id
            .parse()
            .map_err(|_| ChannelError::SendFailed(format!("invalid telegram chat id: {}", msg.chat_id)))?;
        let chat_id = ChatId(chat_id_raw);

        for chunk in myclaw_channels::split::split_for_transport(&msg.content, SPLIT_LIMIT) {
            self.bot
                .send_message(chat_id, chunk)
                .send()
                .await
                .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        }
        Ok(())
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
        let channel = TelegramChannel::new("dummy-token", bus, Allowlist::default());
        assert_eq!(channel.status(), ChannelStatus::Stopped);
        assert_eq!(channel.name(), "telegram");
    }
}
