//! WhatsApp channel: a WebSocket *client* that connects out to a bridge
//! process speaking a narrow JSON inbound/outbound frame contract (§2
//! component 9, §4.2). The bridge itself (pairing, media handling, the
//! WhatsApp wire protocol) is out-of-core; only the channel contract matters
//! here (§1).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use myclaw_bus::MessageBus;
use myclaw_channels::{error::ChannelError, types::ChannelStatus, Allowlist, Channel};
use myclaw_core::{ContentBlock, InboundMessage, OutboundMessage};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const SEND_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Serialize)]
struct WireOutbound<'a> {
    chat_id: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct WireInbound {
    sender_id: String,
    chat_id: String,
    #[serde(default)]
    content: String,
}

pub struct WhatsappChannel {
    ws_url: String,
    bus: Arc<MessageBus>,
    allowlist: Allowlist,
    status: Mutex<ChannelStatus>,
    /// Set by the active connection loop; `send` writes into it. `None`
    /// while disconnected. Shared (not rebuilt) across reconnects so `send`
    /// always reads the current connection's sender.
    outbound_tx: Arc<Mutex<Option<mpsc::Sender<String>>>>,
}

impl WhatsappChannel {
    pub fn new(ws_url: impl Into<String>, bus: Arc<MessageBus>, allowlist: Allowlist) -> Self {
        Self {
            ws_url: ws_url.into(),
            bus,
            allowlist,
            status: Mutex::new(ChannelStatus::Stopped),
            outbound_tx: Arc::new(Mutex::new(None)),
        }
    }

    fn set_status(&self, status: ChannelStatus) {
        *self.status.lock().unwrap() = status;
    }

    async fn connect_loop(
        ws_url: String,
        bus: Arc<MessageBus>,
        allowlist: Allowlist,
        outbound_slot: Arc<Mutex<Option<mpsc::Sender<String>>>>,
        ctx: CancellationToken,
    ) {
        loop {
            if ctx.is_cancelled() {
                break;
            }
            match tokio_tungstenite::connect_async(&ws_url).await {
                Ok((stream, _response)) => {
                    info!(url = %ws_url, "whatsapp bridge connected");
                    let (mut write, mut read) = stream.split();
                    let (tx, mut rx) = mpsc::channel::<String>(SEND_QUEUE_CAPACITY);
                    *outbound_slot.lock().unwrap() = Some(tx);

                    loop {
                        tokio::select! {
                            _ = ctx.cancelled() => {
                                let _ = write.send(WsMessage::Close(None)).await;
                                break;
                            }
                            outgoing = rx.recv() => {
                                match outgoing {
                                    Some(payload) => {
                                        if write.send(WsMessage::Text(payload.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                    None => break,
                                }
                            }
                            incoming = read.next() => {
                                match incoming {
                                    Some(Ok(WsMessage::Text(text))) => {
                                        Self::handle_frame(&text, &bus, &allowlist).await;
                                    }
                                    Some(Ok(WsMessage::Close(_))) | None => break,
                                    Some(Err(e)) => {
                                        warn!(error = %e, "whatsapp websocket read error");
                                        break;
                                    }
                                    _ => {}
                                }
                            }
                        }
                    }

                    *outbound_slot.lock().unwrap() = None;
                }
                Err(e) => {
                    warn!(error = %e, "whatsapp bridge connect failed, retrying");
                }
            }

            if ctx.is_cancelled() {
                break;
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn handle_frame(text: &str, bus: &Arc<MessageBus>, allowlist: &Allowlist) {
        let frame: WireInbound = match serde_json::from_str(text) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "whatsapp bridge sent an unparsable frame");
                return;
            }
        };
        if !allowlist.is_allowed(&frame.sender_id) {
            info!(sender_id = %frame.sender_id, "whatsapp message rejected by allowlist");
            return;
        }
        let inbound = InboundMessage {
            channel: "whatsapp".to_string(),
            sender_id: frame.sender_id,
            chat_id: frame.chat_id,
            content: frame.content,
            timestamp: chrono::Utc::now().timestamp_millis(),
            metadata: Default::default(),
            blocks: Vec::<ContentBlock>::new(),
        };
        if inbound.is_empty() {
            return;
        }
        if let Err(e) = bus.publish_inbound(inbound).await {
            warn!(error = %e, "failed to publish whatsapp inbound message");
        }
    }
}

#[async_trait]
impl Channel for WhatsappChannel {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn start(&self, ctx: CancellationToken) -> Result<(), ChannelError> {
        let ws_url = self.ws_url.clone();
        let bus = self.bus.clone();
        let allowlist = self.allowlist.clone();
        let outbound_slot = self.outbound_tx.clone();

        tokio::spawn(Self::connect_loop(ws_url, bus, allowlist, outbound_slot, ctx));

        self.set_status(ChannelStatus::Running);
        info!("whatsapp channel started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        self.set_status(ChannelStatus::Stopped);
        *self.outbound_tx.lock().unwrap() = None;
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError> {
        let tx = self
            .outbound_tx
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ChannelError::SendFailed("whatsapp bridge not connected".to_string()))?;

        let payload = serde_json::to_string(&WireOutbound {
            chat_id: &msg.chat_id,
            content: &msg.content,
        })
        .map_err(|e| ChannelError::SendFailed(e.to_string()))?;

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
    async fn new_channel_starts_stopped() {
        let bus = Arc::new(MessageBus::new(10));
        let channel = WhatsappChannel::new("ws://dummy", bus, Allowlist::default());
        assert_eq!(channel.status(), ChannelStatus::Stopped);
        assert_eq!(channel.name(), "whatsapp");
    }

    #[tokio::test]
    async fn handle_frame_publishes_allowed_sender() {
        let bus = Arc::new(MessageBus::new(10));
        let allow = Allowlist::new(["zhangsan".to_string()]);
        let frame = r#"{"sender_id":"zhangsan","chat_id":"c1","content":"hello"}"#;
        WhatsappChannel::handle_frame(frame, &bus, &allow).await;

        let mut rx = bus.take_inbound_receiver().await.unwrap();
        let msg = rx.try_recv().expect("message should be published");
        assert_eq!(msg.content, "hello");
        assert_eq!(msg.chat_id, "c1");
        assert_eq!(msg.channel, "whatsapp");
    }

    #[tokio::test]
    async fn handle_frame_drops_disallowed_sender() {
        let bus = Arc::new(MessageBus::new(10));
        let allow = Allowlist::new(["zhangsan".to_string()]);
        let frame = r#"{"sender_id":"lisi","chat_id":"c1","content":"hello"}"#;
        WhatsappChannel::handle_frame(frame, &bus, &allow).await;

        let mut rx = bus.take_inbound_receiver().await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn handle_frame_drops_empty_content() {
        let bus = Arc::new(MessageBus::new(10));
        let allow = Allowlist::default();
        let frame = r#"{"sender_id":"zhangsan","chat_id":"c1","content":""}"#;
        WhatsappChannel::handle_frame(frame, &bus, &allow).await;

        let mut rx = bus.take_inbound_receiver().await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn handle_frame_ignores_unparsable_json() {
        let bus = Arc::new(MessageBus::new(10));
        let allow = Allowlist::default();
        WhatsappChannel::handle_frame("not json", &bus, &allow).await;

        let mut rx = bus.take_inbound_receiver().await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn wire_outbound_serializes_chat_id_and_content() {
        let wire = WireOutbound {
            chat_id: "c1",
            content: "hi",
        };
        let json = serde_json::to_string(&wire).unwrap();
        assert_eq!(json, r#"{"chat_id":"c1","content":"hi"}"#);
    }
}
