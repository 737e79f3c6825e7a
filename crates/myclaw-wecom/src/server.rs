//! Axum HTTP server for the WeCom encrypted callback (§4.3).
//!
//! Both routes are `/wecom/bot`: `GET` does URL verification, `POST` is the
//! real inbound callback. Signature verification always precedes decryption
//! so a bad request never triggers a decrypt attempt (padding-oracle
//! avoidance, §4.3).

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use tracing::{info, warn};

use myclaw_bus::MessageBus;
use myclaw_channels::{types::ChannelStatus, Allowlist};
use myclaw_core::InboundMessage;

use crate::cache::{DedupCache, ReplyCache};
use crate::crypto;
use crate::media;
use crate::parse;

const MAX_BODY_BYTES: usize = 1024 * 1024;

pub struct WecomState {
    pub token: String,
    pub aes_key: [u8; 32],
    pub receive_id: String,
    pub allowlist: Allowlist,
    pub bus: Arc<MessageBus>,
    pub reply_cache: ReplyCache,
    pub dedup_cache: DedupCache,
    pub http: reqwest::Client,
    pub status: std::sync::Mutex<ChannelStatus>,
}

pub fn router(state: Arc<WecomState>) -> Router {
    Router::new()
        .route("/wecom/bot", get(verify_url).post(receive_callback))
        .with_state(state)
}

#[derive(Debug, serde::Deserialize)]
struct VerifyQuery {
    msg_signature: Option<String>,
    timestamp: Option<String>,
    nonce: Option<String>,
    echostr: Option<String>,
}

async fn verify_url(
    State(state): State<Arc<WecomState>>,
    Query(query): Query<VerifyQuery>,
) -> Result<String, StatusCode> {
    let msg_signature = query.msg_signature.ok_or(StatusCode::BAD_REQUEST)?;
    let timestamp = query.timestamp.ok_or(StatusCode::BAD_REQUEST)?;
    let nonce = query.nonce.ok_or(StatusCode::BAD_REQUEST)?;
    let echostr = query.echostr.ok_or(StatusCode::BAD_REQUEST)?;

    if !crypto::verify_signature(&state.token, &timestamp, &nonce, &echostr, &msg_signature) {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let receive_id = (!state.receive_id.is_empty()).then(|| state.receive_id.as_str());
    let plaintext = crypto::decrypt(&state.aes_key, &echostr, receive_id)
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    Ok(plaintext)
}

#[derive(Debug, serde::Deserialize)]
struct CallbackQuery {
    msg_signature: Option<String>,
    timestamp: Option<String>,
    nonce: Option<String>,
}

async fn receive_callback(
    State(state): State<Arc<WecomState>>,
    Query(query): Query<CallbackQuery>,
    body: axum::body::Bytes,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if body.len() > MAX_BODY_BYTES {
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }
    let msg_signature = query.msg_signature.ok_or(StatusCode::BAD_REQUEST)?;
    let timestamp = query.timestamp.ok_or(StatusCode::BAD_REQUEST)?;
    let nonce = query.nonce.ok_or(StatusCode::BAD_REQUEST)?;

    let envelope: serde_json::Value =
        serde_json::from_slice(&body).map_err(|_| StatusCode::BAD_REQUEST)?;
    let ciphertext = parse::outer_ciphertext(&envelope)
        .ok_or(StatusCode::BAD_REQUEST)?
        .to_string();

    if !crypto::verify_signature(&state.token, &timestamp, &nonce, &ciphertext, &msg_signature) {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let receive_id = (!state.receive_id.is_empty()).then(|| state.receive_id.as_str());
    let plaintext = crypto::decrypt(&state.aes_key, &ciphertext, receive_id)
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let reply_plain = serde_json::to_string(&serde_json::json!("success")).unwrap();
    let reply_cipher = crypto::encrypt(&state.aes_key, &reply_plain, &state.receive_id);
    let reply_signature =
        crypto::signature(&state.token, &timestamp, &nonce, &reply_cipher);

    tokio::spawn(process_async(state, plaintext));

    Ok(Json(serde_json::json!({
        "encrypt": reply_cipher,
        "msgsignature": reply_signature,
        "msg_signature": reply_signature,
        "timestamp": timestamp,
        "nonce": nonce,
    })))
}

/// Asynchronous handling after the 200 has already gone out (§4.3 state
/// machine: `REPLIED(200) -> (async) PARSED -> ALLOWED -> ... -> PUBLISHED|DROPPED`).
async fn process_async(state: Arc<WecomState>, plaintext: String) {
    let body: serde_json::Value = match serde_json::from_str(&plaintext) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "wecom callback payload was not valid json after decrypt");
            return;
        }
    };
    let parsed = parse::parse_inbound(&body);

    let Some(sender_id) = parsed.sender_id.clone() else {
        warn!("wecom inbound dropped: no sender id");
        return;
    };

    if !state.allowlist.is_allowed(&sender_id) {
        info!(sender_id, "wecom inbound rejected by allowlist");
        return;
    }

    if let Some(msgid) = &parsed.msgid {
        if !state.dedup_cache.check_and_insert(msgid) {
            info!(msgid, "wecom inbound dropped: duplicate msgid");
            return;
        }
    }

    let Some(chat_id) = parsed.resolve_chat_id().map(str::to_string) else {
        return;
    };

    let mut metadata = HashMap::new();
    if let Some(response_url) = &parsed.response_url {
        state.reply_cache.insert(chat_id.clone(), response_url.clone());
        metadata.insert("response_url".to_string(), response_url.clone());
    }

    let mut content = String::new();
    let mut blocks = Vec::new();
    match parsed.msgtype.as_deref() {
        Some("text") => content = parsed.text_content().unwrap_or_default().to_string(),
        Some("voice") => content = parsed.voice_content().unwrap_or_default().to_string(),
        Some("image") => {
            content = "[image]".to_string();
            if let Some(url) = parsed.image_url() {
                match media::fetch_image_block(&state.http, url).await {
                    Ok(block) => blocks.push(block),
                    Err(e) => warn!(error = %e, "wecom image fetch failed"),
                }
            } else if parsed.image_media_id().is_some() {
                warn!("wecom image via media_id without url is not implemented");
            }
        }
        Some("mixed") => content = parsed.mixed_text(),
        Some(other) => {
            info!(msgtype = other, "wecom inbound dropped: unsupported message type");
            return;
        }
        None => {
            info!("wecom inbound dropped: missing msgtype");
            return;
        }
    }

    let inbound = InboundMessage {
        channel: "wecom".to_string(),
        sender_id,
        chat_id,
        content,
        timestamp: chrono::Utc::now().timestamp_millis(),
        metadata,
        blocks,
    };
    if inbound.is_empty() {
        return;
    }
    if let Err(e) = state.bus.publish_inbound(inbound).await {
        warn!(error = %e, "failed to publish wecom inbound message");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;

    const TOKEN: &str = "verify-token";
    const AES_KEY_NO_PAD: &str = "abcdefghijklmnopqrstuvwxyz0123456789ABCDEFG";
    const RECEIVE_ID: &str = "recv-id-1";

    fn test_state(bus: Arc<MessageBus>) -> Arc<WecomState> {
        Arc::new(WecomState {
            token: TOKEN.to_string(),
            aes_key: crypto::decode_aes_key(AES_KEY_NO_PAD).unwrap(),
            receive_id: RECEIVE_ID.to_string(),
            allowlist: Allowlist::new(["zhangsan".to_string()]),
            bus,
            reply_cache: ReplyCache::new(Duration::from_secs(3600)),
            dedup_cache: DedupCache::new(Duration::from_secs(300)),
            http: reqwest::Client::new(),
            status: std::sync::Mutex::new(ChannelStatus::Stopped),
        })
    }

    fn encrypted_post_request(state: &WecomState, plaintext: &str) -> Request<Body> {
        let ciphertext = crypto::encrypt(&state.aes_key, plaintext, &state.receive_id);
        let timestamp = "1700000000";
        let nonce = "nonce-1";
        let sig = crypto::signature(&state.token, timestamp, nonce, &ciphertext);
        let uri = format!("/wecom/bot?msg_signature={sig}&timestamp={timestamp}&nonce={nonce}");
        let body = serde_json::json!({ "encrypt": ciphertext }).to_string();
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn text_callback_round_trips_and_publishes_once() {
        let bus = Arc::new(MessageBus::new(10));
        let mut inbound_rx = bus.take_inbound_receiver().await.unwrap();
        let state = test_state(bus);
        let plaintext = serde_json::json!({
            "msgid": "10001",
            "chattype": "single",
            "from": {"userid": "zhangsan"},
            "response_url": "https://example.com/resp",
            "msgtype": "text",
            "text": {"content": "hello"},
        })
        .to_string();

        let app = router(state.clone());
        let request = encrypted_post_request(&state, &plaintext);
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let envelope: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let reply_cipher = envelope["encrypt"].as_str().unwrap();
        let decrypted = crypto::decrypt(&state.aes_key, reply_cipher, Some(RECEIVE_ID)).unwrap();
        let decrypted_json: serde_json::Value = serde_json::from_str(&decrypted).unwrap();
        assert_eq!(decrypted_json, serde_json::json!("success"));

        let inbound = tokio::time::timeout(Duration::from_secs(1), inbound_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(inbound.content, "hello");
        assert_eq!(inbound.chat_id, "zhangsan");
        assert_eq!(inbound.channel, "wecom");
        assert_eq!(
            inbound.metadata.get("response_url").map(String::as_str),
            Some("https://example.com/resp")
        );
    }

    #[tokio::test]
    async fn repeated_msgid_publishes_only_once() {
        let bus = Arc::new(MessageBus::new(10));
        let mut inbound_rx = bus.take_inbound_receiver().await.unwrap();
        let state = test_state(bus);
        let plaintext = serde_json::json!({
            "msgid": "10001",
            "chattype": "single",
            "from": {"userid": "zhangsan"},
            "response_url": "https://example.com/resp",
            "msgtype": "text",
            "text": {"content": "hello"},
        })
        .to_string();

        let app = router(state.clone());
        for _ in 0..2 {
            let request = encrypted_post_request(&state, &plaintext);
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let first = tokio::time::timeout(Duration::from_secs(1), inbound_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.content, "hello");

        let second = tokio::time::timeout(Duration::from_millis(200), inbound_rx.recv()).await;
        assert!(second.is_err(), "expected no second publication within the window");
    }

    #[tokio::test]
    async fn unknown_message_type_is_dropped() {
        let bus = Arc::new(MessageBus::new(10));
        let mut inbound_rx = bus.take_inbound_receiver().await.unwrap();
        let state = test_state(bus);
        let plaintext = serde_json::json!({
            "msgid": "20001",
            "from": {"userid": "zhangsan"},
            "msgtype": "sticker",
        })
        .to_string();

        let app = router(state.clone());
        let request = encrypted_post_request(&state, &plaintext);
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let result = tokio::time::timeout(Duration::from_millis(200), inbound_rx.recv()).await;
        assert!(result.is_err());
    }
}
