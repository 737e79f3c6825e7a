//! LLM JSON contracts backing the extraction and compression services
//! (§4.6 "call LLM Extract", §4.7 "ask LLM Compress"/"ask LLM UpdateProfile").
//!
//! These are OpenAI-compatible chat-completion calls with a JSON system
//! prompt, the same shape as [`crate::embedder::LlmQueryExpander`].

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{MemoryError, Result};
use crate::types::{CompressResult, ExtractResult, ProfileEntry};

#[async_trait]
pub trait ExtractionLlm: Send + Sync {
    /// `chat` is the formatted `[role][channel]: content\n` transcript.
    async fn extract(&self, chat: &str) -> Result<ExtractResult>;
}

#[async_trait]
pub trait CompressionLlm: Send + Sync {
    async fn compress(&self, joined_summaries: &str) -> Result<CompressResult>;
}

#[async_trait]
pub trait ProfileLlm: Send + Sync {
    async fn update_profile(&self, current_profile: &str, top_facts: &str) -> Result<Vec<ProfileEntry>>;
}

/// Shared OpenAI-compatible chat-completion client used by all three
/// memory-pipeline LLM contracts; each call differs only in its system
/// prompt and response envelope.
pub struct HttpMemoryLlm {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl HttpMemoryLlm {
    pub fn new(base_url: String, api_key: Option<String>, model: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url,
            api_key,
            model,
        }
    }

    async fn chat_json(&self, system: &str, user: &str) -> Result<serde_json::Value> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });
        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(|e| MemoryError::Extraction(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(MemoryError::Extraction(format!("HTTP {status}: {text}")));
        }
        let value: serde_json::Value = resp.json().await.map_err(|e| MemoryError::Extraction(e.to_string()))?;
        let content = value["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| MemoryError::Extraction("missing content in response".into()))?;
        serde_json::from_str(content).map_err(|e| MemoryError::Extraction(format!("invalid JSON: {e}")))
    }
}

const EXTRACT_SYSTEM_PROMPT: &str = "Extract durable facts and a short summary from this conversation \
excerpt. Respond with JSON: {\"facts\": [{\"content\": \"...\", \"project\": \"...\", \"topic\": \"...\", \
\"category\": \"identity|config|credential|decision|solution|event|conversation|temp|debug\", \
\"importance\": 0.0}], \"summary\": \"...\"}.";

#[async_trait]
impl ExtractionLlm for HttpMemoryLlm {
    async fn extract(&self, chat: &str) -> Result<ExtractResult> {
        let value = self.chat_json(EXTRACT_SYSTEM_PROMPT, chat).await?;
        serde_json::from_value(value).map_err(|e| MemoryError::Extraction(format!("invalid extract envelope: {e}")))
    }
}

const COMPRESS_SYSTEM_PROMPT: &str = "Merge these summaries into a minimal set of durable facts, \
deduplicating overlapping information. Respond with JSON: {\"facts\": [{\"content\": \"...\", \
\"project\": \"...\", \"topic\": \"...\", \"category\": \"identity|config|credential|decision|solution|\
event|conversation|temp|debug\", \"importance\": 0.0}]}.";

#[async_trait]
impl CompressionLlm for HttpMemoryLlm {
    async fn compress(&self, joined_summaries: &str) -> Result<CompressResult> {
        let value = self.chat_json(COMPRESS_SYSTEM_PROMPT, joined_summaries).await?;
        serde_json::from_value(value)
            .map_err(|e| MemoryError::Compression(format!("invalid compress envelope: {e}")))
    }
}

const PROFILE_SYSTEM_PROMPT: &str = "You maintain a durable user/assistant profile. Given the current \
profile text and the highest-importance known facts, produce the updated profile as a list of \
standalone statements. Respond with JSON: {\"entries\": [{\"content\": \"...\"}]}. Return an empty list \
if nothing should change.";

#[derive(Debug, serde::Deserialize)]
struct ProfileEnvelope {
    #[serde(default)]
    entries: Vec<ProfileEntry>,
}

#[async_trait]
impl ProfileLlm for HttpMemoryLlm {
    async fn update_profile(&self, current_profile: &str, top_facts: &str) -> Result<Vec<ProfileEntry>> {
        let user = format!("Current profile:\n{current_profile}\n\nTop facts:\n{top_facts}");
        let value = self.chat_json(PROFILE_SYSTEM_PROMPT, &user).await?;
        let envelope: ProfileEnvelope = serde_json::from_value(value)
            .map_err(|e| MemoryError::Compression(format!("invalid profile envelope: {e}")))?;
        Ok(envelope.entries)
    }
}
