use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One element of a multimodal message payload.
///
/// Union of text, image, and document — mirrors the content-block shape the
/// model runtime's request contract expects (see `myclaw-runtime`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    Document {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ContentBlock::Text { text } => text.trim().is_empty(),
            ContentBlock::Image { data, url, .. } => data.is_none() && url.is_none(),
            ContentBlock::Document { data, url, .. } => data.is_none() && url.is_none(),
        }
    }
}

/// A message received from an external channel, published onto the bus.
///
/// Created by a channel adapter, consumed by the gateway orchestrator, and
/// never retained after processing — no inbound message is persisted
/// verbatim; only what the extraction/memory pipeline derives from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Logical channel name (e.g. "telegram", "wecom").
    pub channel: String,
    /// Platform-native identifier for the sender.
    pub sender_id: String,
    /// Platform-native identifier for the chat/conversation.
    pub chat_id: String,
    /// Plain text content, may be empty when only content blocks carry data.
    pub content: String,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
    /// Opaque per-channel metadata (e.g. WeCom's `response_url`).
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Ordered multimodal content blocks.
    #[serde(default)]
    pub blocks: Vec<ContentBlock>,
}

impl InboundMessage {
    /// Deterministic session key: `channel:chat_id`.
    pub fn session_key(&self) -> String {
        session_key(&self.channel, &self.chat_id)
    }

    /// An inbound message with neither text nor any non-empty block carries
    /// nothing worth routing and must be dropped by the channel before
    /// publishing (§4.2).
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.blocks.iter().all(ContentBlock::is_empty)
    }
}

/// A message to be delivered to an external channel, produced by the
/// orchestrator or by cron jobs and consumed by at most one channel
/// subscriber per channel name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Logical channel name this message must be routed to.
    pub channel: String,
    /// Platform-native identifier for the recipient chat/conversation.
    pub chat_id: String,
    /// Content to deliver.
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl OutboundMessage {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            metadata: HashMap::new(),
        }
    }
}

/// Deterministic per-conversation identifier passed to the model runtime.
pub fn session_key(channel: &str, chat_id: &str) -> String {
    format!("{channel}:{chat_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_key_format() {
        assert_eq!(session_key("wecom", "zhangsan"), "wecom:zhangsan");
    }

    #[test]
    fn inbound_session_key_matches_free_fn() {
        let msg = InboundMessage {
            channel: "telegram".into(),
            sender_id: "u1".into(),
            chat_id: "c1".into(),
            content: "hi".into(),
            timestamp: 0,
            metadata: HashMap::new(),
            blocks: vec![],
        };
        assert_eq!(msg.session_key(), "telegram:c1");
    }

    #[test]
    fn inbound_empty_with_no_text_or_blocks() {
        let msg = InboundMessage {
            channel: "wecom".into(),
            sender_id: "u1".into(),
            chat_id: "c1".into(),
            content: "   ".into(),
            timestamp: 0,
            metadata: HashMap::new(),
            blocks: vec![],
        };
        assert!(msg.is_empty());
    }

    #[test]
    fn inbound_not_empty_with_block() {
        let msg = InboundMessage {
            channel: "wecom".into(),
            sender_id: "u1".into(),
            chat_id: "c1".into(),
            content: String::new(),
            timestamp: 0,
            metadata: HashMap::new(),
            blocks: vec![ContentBlock::Image {
                media_type: Some("image/png".into()),
                data: Some("AAAA".into()),
                url: None,
            }],
        };
        assert!(!msg.is_empty());
    }
}
