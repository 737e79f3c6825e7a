use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use myclaw_core::ContentBlock;

use crate::error::{Result, RuntimeError};
use crate::runtime::{ModelRuntime, RunRequest, RunResult};

const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic Messages API client implementing [`ModelRuntime`].
///
/// `system` is the orchestrator's assembled system prompt (§4.9 composition
/// step 1: `AGENTS.md` + `SOUL.md` + recent memory context), fixed for the
/// lifetime of the client rather than rebuilt per request.
pub struct AnthropicRuntime {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    system: String,
}

impl AnthropicRuntime {
    pub fn new(api_key: String, base_url: String, model: String, system: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            model,
            system,
        }
    }
}

#[async_trait]
impl ModelRuntime for AnthropicRuntime {
    async fn run(&self, ctx: CancellationToken, req: RunRequest) -> Result<RunResult> {
        let body = build_request_body(&self.model, &self.system, &req);
        let url = format!("{}/v1/messages", self.base_url);

        debug!(model = %self.model, session_id = %req.session_id, "sending request to Anthropic runtime");

        let send = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send();

        let resp = tokio::select! {
            _ = ctx.cancelled() => return Err(RuntimeError::Cancelled),
            result = send => result?,
        };

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000)
                .unwrap_or(5000);
            return Err(RuntimeError::RateLimited {
                retry_after_ms: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(RuntimeError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| RuntimeError::Parse(e.to_string()))?;

        let output = api_resp
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(RunResult { output })
    }
}

fn build_request_body(model: &str, system: &str, req: &RunRequest) -> serde_json::Value {
    let mut content = Vec::new();

    // Workaround (§4.9): when both text and content blocks are present, the
    // underlying client drops plain text once blocks appear — fold the
    // prompt into a synthesized text block instead.
    if !req.content_blocks.is_empty() {
        if !req.prompt.is_empty() {
            content.push(serde_json::json!({ "type": "text", "text": req.prompt }));
        }
        for block in &req.content_blocks {
            if let Some(v) = content_block_to_anthropic(block) {
                content.push(v);
            }
        }
    } else {
        content.push(serde_json::json!({ "type": "text", "text": req.prompt }));
    }

    serde_json::json!({
        "model": model,
        "system": system,
        "max_tokens": DEFAULT_MAX_TOKENS,
        "messages": [{
            "role": "user",
            "content": content,
        }],
    })
}

fn content_block_to_anthropic(block: &ContentBlock) -> Option<serde_json::Value> {
    match block {
        ContentBlock::Text { text } => Some(serde_json::json!({ "type": "text", "text": text })),
        ContentBlock::Image {
            media_type,
            data,
            url,
        } => {
            let source = if let Some(data) = data {
                serde_json::json!({
                    "type": "base64",
                    "media_type": media_type.clone().unwrap_or_else(|| "image/png".to_string()),
                    "data": data,
                })
            } else if let Some(url) = url {
                serde_json::json!({ "type": "url", "url": url })
            } else {
                return None;
            };
            Some(serde_json::json!({ "type": "image", "source": source }))
        }
        ContentBlock::Document {
            media_type,
            data,
            url,
        } => {
            let source = if let Some(data) = data {
                serde_json::json!({
                    "type": "base64",
                    "media_type": media_type.clone().unwrap_or_else(|| "application/pdf".to_string()),
                    "data": data,
                })
            } else if let Some(url) = url {
                serde_json::json!({ "type": "url", "url": url })
            } else {
                return None;
            };
            Some(serde_json::json!({ "type": "document", "source": source }))
        }
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ApiContentBlock>,
}

#[derive(Deserialize)]
struct ApiContentBlock {
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_folds_prompt_into_text_block_when_blocks_present() {
        let req = RunRequest {
            prompt: "describe this".to_string(),
            content_blocks: vec![ContentBlock::Image {
                media_type: Some("image/png".into()),
                data: Some("AAAA".into()),
                url: None,
            }],
            session_id: "wecom:zhangsan".to_string(),
        };
        let body = build_request_body("claude-sonnet-4-6", "you are helpful", &req);
        let content = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 2);
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[1]["type"], "image");
    }

    #[test]
    fn request_body_with_text_only_has_single_block() {
        let req = RunRequest {
            prompt: "hello".to_string(),
            content_blocks: vec![],
            session_id: "telegram:1".to_string(),
        };
        let body = build_request_body("claude-sonnet-4-6", "sys", &req);
        let content = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 1);
    }
}
