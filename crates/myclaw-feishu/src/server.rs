//! Axum webhook server for the Feishu event API (§6 "Feishu webhook answers
//! a `challenge` field for URL verification").

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use tracing::{info, warn};

use myclaw_bus::MessageBus;
use myclaw_channels::{types::ChannelStatus, Allowlist};
use myclaw_core::InboundMessage;

pub struct FeishuState {
    pub verification_token: Option<String>,
    pub allowlist: Allowlist,
    pub bus: Arc<MessageBus>,
    pub status: std::sync::Mutex<ChannelStatus>,
}

pub fn router(state: Arc<FeishuState>) -> Router {
    Router::new()
        .route("/feishu/webhook", post(webhook))
        .with_state(state)
}

async fn webhook(State(state): State<Arc<FeishuState>>, Json(body): Json<Value>) -> Json<Value> {
    if let Some(expected) = &state.verification_token {
        if let Some(token) = body.get("token").and_then(Value::as_str) {
            if token != expected {
                warn!("feishu webhook rejected: verification token mismatch");
                return Json(serde_json::json!({}));
            }
        }
    }

    if body.get("type").and_then(Value::as_str) == Some("url_verification") {
        let challenge = body.get("challenge").cloned().unwrap_or(Value::Null);
        return Json(serde_json::json!({ "challenge": challenge }));
    }

    let event_type = body
        .get("header")
        .and_then(|h| h.get("event_type"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    if event_type == "im.message.receive_v1" {
        tokio::spawn(handle_message_event(state, body));
    }

    Json(serde_json::json!({}))
}

async fn handle_message_event(state: Arc<FeishuState>, body: Value) {
    let Some(event) = body.get("event") else {
        return;
    };
    let Some(sender_id) = event
        .get("sender")
        .and_then(|s| s.get("sender_id"))
        .and_then(|s| s.get("open_id"))
        .and_then(Value::as_str)
        .map(str::to_string)
    else {
        return;
    };
    if !state.allowlist.is_allowed(&sender_id) {
        info!(sender_id, "feishu message rejected by allowlist");
        return;
    }

    let Some(message) = event.get("message") else {
        return;
    };
    let Some(chat_id) = message.get("chat_id").and_then(Value::as_str) else {
        return;
    };
    let message_type = message.get("message_type").and_then(Value::as_str).unwrap_or_default();
    let content = match message_type {
        "text" => message
            .get("content")
            .and_then(Value::as_str)
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
            .and_then(|v| v.get("text").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default(),
        other => {
            info!(message_type = other, "feishu inbound dropped: unsupported message type");
            return;
        }
    };

    let inbound = InboundMessage {
        channel: "feishu".to_string(),
        sender_id,
        chat_id: chat_id.to_string(),
        content,
        timestamp: chrono::Utc::now().timestamp_millis(),
        metadata: Default::default(),
        blocks: Vec::new(),
    };
    if inbound.is_empty() {
        return;
    }
    if let Err(e) = state.bus.publish_inbound(inbound).await {
        warn!(error = %e, "failed to publish feishu inbound message");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;

    fn test_state() -> (Arc<FeishuState>, Arc<MessageBus>) {
        let bus = Arc::new(MessageBus::new(10));
        let state = Arc::new(FeishuState {
            verification_token: Some("verify-tok".to_string()),
            allowlist: Allowlist::default(),
            bus: bus.clone(),
            status: std::sync::Mutex::new(ChannelStatus::Stopped),
        });
        (state, bus)
    }

    #[tokio::test]
    async fn url_verification_echoes_challenge() {
        let (state, _bus) = test_state();
        let app = router(state);
        let body = serde_json::json!({
            "type": "url_verification",
            "token": "verify-tok",
            "challenge": "abc123",
        })
        .to_string();
        let request = Request::builder()
            .method("POST")
            .uri("/feishu/webhook")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["challenge"], "abc123");
    }

    #[tokio::test]
    async fn message_event_publishes_inbound() {
        let (state, bus) = test_state();
        let mut inbound_rx = bus.take_inbound_receiver().await.unwrap();
        let app = router(state);
        let body = serde_json::json!({
            "token": "verify-tok",
            "header": {"event_type": "im.message.receive_v1"},
            "event": {
                "sender": {"sender_id": {"open_id": "ou_1"}},
                "message": {
                    "chat_id": "oc_1",
                    "message_type": "text",
                    "content": "{\"text\":\"hi there\"}",
                },
            },
        })
        .to_string();
        let request = Request::builder()
            .method("POST")
            .uri("/feishu/webhook")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert!(response.status().is_success());

        let inbound = tokio::time::timeout(Duration::from_secs(1), inbound_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(inbound.content, "hi there");
        assert_eq!(inbound.chat_id, "oc_1");
    }
}
