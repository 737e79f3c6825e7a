//! Minimal `/health` surface: channel statuses plus memory row counts, the
//! gateway's only owned HTTP endpoint (every channel transport lives in its
//! own crate).

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::app::GatewayState;

#[derive(Serialize)]
struct HealthResponse {
    channels: Vec<ChannelStatusEntry>,
    memory: Option<MemorySummary>,
}

#[derive(Serialize)]
struct ChannelStatusEntry {
    name: String,
    status: String,
}

#[derive(Serialize)]
struct MemorySummary {
    total: i64,
    archived: i64,
    active_tier1: i64,
    active_tier2: i64,
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> Json<HealthResponse> {
    let channels = state
        .channels
        .statuses()
        .into_iter()
        .map(|(name, status)| ChannelStatusEntry {
            name,
            status: format!("{status:?}"),
        })
        .collect();

    let memory = state.memory.as_ref().and_then(|memory| match memory.stats() {
        Ok(stats) => Some(MemorySummary {
            total: stats.total,
            archived: stats.archived,
            active_tier1: stats.active_tier1,
            active_tier2: stats.active_tier2,
        }),
        Err(e) => {
            tracing::warn!(error = %e, "failed to read memory stats for health endpoint");
            None
        }
    });

    Json(HealthResponse { channels, memory })
}

pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use tower::ServiceExt;

    use super::*;

    #[tokio::test]
    async fn health_reports_empty_channels_when_none_registered() {
        let config = myclaw_core::MyclawConfig::default();
        let state = GatewayState::build_for_test(config).await;
        let app = router(state);

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
