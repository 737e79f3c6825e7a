//! Embedded static UI plus a WebSocket endpoint at `/ws` (§4.2, §6).
//!
//! Each WS connection is assigned a session id on connect and announced to
//! the client in a `{"type":"hello","session_id":...}` frame; the client
//! echoes that id back on nothing — it is purely so the client can display
//! it, since this channel has no concept of a pre-existing chat id. Inbound
//! text frames are published using the session id as both `sender_id` and
//! `chat_id`; outbound delivery looks the live connection back up by that
//! same id.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tower_http::services::ServeDir;
use tracing::{info, warn};

use myclaw_bus::MessageBus;
use myclaw_channels::Allowlist;
use myclaw_core::{ContentBlock, InboundMessage};

pub struct WebuiState {
    pub bus: Arc<MessageBus>,
    pub allowlist: Allowlist,
    /// session_id -> sender half feeding that connection's write loop.
    pub sessions: DashMap<String, mpsc::Sender<String>>,
    pub static_dir: String,
}

pub fn router(state: Arc<WebuiState>) -> Router {
    let serve_dir = ServeDir::new(&state.static_dir);
    Router::new()
        .route("/ws", get(ws_upgrade))
        .fallback_service(serve_dir)
        .with_state(state)
}

async fn ws_upgrade(
    State(state): State<Arc<WebuiState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: Arc<WebuiState>, socket: WebSocket) {
    let session_id = uuid::Uuid::new_v4().to_string();
    if !state.allowlist.is_allowed(&session_id) {
        warn!(session_id, "webui session rejected by allowlist");
        return;
    }

    let (mut write, mut read) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(32);
    state.sessions.insert(session_id.clone(), tx);

    let hello = serde_json::json!({ "type": "hello", "session_id": session_id }).to_string();
    if write.send(WsMessage::Text(hello.into())).await.is_err() {
        state.sessions.remove(&session_id);
        return;
    }

    info!(session_id, "webui session connected");

    loop {
        tokio::select! {
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
                        handle_inbound_text(&state, &session_id, &text).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(error = %e, session_id, "webui websocket read error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    state.sessions.remove(&session_id);
    info!(session_id, "webui session disconnected");
}

async fn handle_inbound_text(state: &Arc<WebuiState>, session_id: &str, text: &str) {
    let inbound = InboundMessage {
        channel: "webui".to_string(),
        sender_id: session_id.to_string(),
        chat_id: session_id.to_string(),
        content: text.to_string(),
        timestamp: chrono::Utc::now().timestamp_millis(),
        metadata: Default::default(),
        blocks: Vec::<ContentBlock>::new(),
    };
    if inbound.is_empty() {
        return;
    }
    if let Err(e) = state.bus.publish_inbound(inbound).await {
        warn!(error = %e, "failed to publish webui inbound message");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> Arc<WebuiState> {
        Arc::new(WebuiState {
            bus: Arc::new(MessageBus::new(8)),
            allowlist: Allowlist::default(),
            sessions: DashMap::new(),
            static_dir: std::env::temp_dir().to_string_lossy().to_string(),
        })
    }

    #[tokio::test]
    async fn unknown_path_falls_back_to_static_service() {
        let state = test_state();
        let router = router(state);
        let resp = router
            .oneshot(
                Request::builder()
                    .uri("/does-not-exist.html")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::NOT_FOUND);
    }
}
