//! OpenAI-compatible embedding, rerank, and LLM-JSON query-expansion clients
//! (§2 component 6, §4.5 enhanced pipeline, §4.4 embedding backfill).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{MemoryError, Result};

/// Produces an embedding vector for a piece of text.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    /// Stable model identifier recorded alongside the embedding.
    fn model_name(&self) -> &str;
}

/// Reorders `(content)` candidates against `query`, returning a normalized
/// relevance score per input index.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, query: &str, docs: &[String]) -> Result<Vec<f32>>;
}

/// Expands a query into additional search tokens via an LLM-JSON call.
#[async_trait]
pub trait QueryExpander: Send + Sync {
    async fn expand(&self, query: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// OpenAI-compatible `/v1/embeddings` client.
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl HttpEmbedder {
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
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/v1/embeddings", self.base_url.trim_end_matches('/'));
        let mut req = self.client.post(&url).json(&EmbeddingRequest {
            model: &self.model,
            input: text,
        });
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(MemoryError::Embedding(format!("HTTP {status}: {body}")));
        }
        let parsed: EmbeddingResponse = resp.json().await?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| MemoryError::Embedding("empty embedding response".into()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    documents: &'a [String],
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Debug, Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f32,
}

/// OpenAI-compatible `/v1/rerank` client.
pub struct HttpReranker {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpReranker {
    pub fn new(base_url: String, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(&self, query: &str, docs: &[String]) -> Result<Vec<f32>> {
        let url = format!("{}/v1/rerank", self.base_url.trim_end_matches('/'));
        let mut req = self.client.post(&url).json(&RerankRequest {
            query,
            documents: docs,
        });
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(MemoryError::Rerank(format!("HTTP {status}: {body}")));
        }
        let parsed: RerankResponse = resp.json().await?;
        let mut scores = vec![0.0f32; docs.len()];
        for r in parsed.results {
            if let Some(slot) = scores.get_mut(r.index) {
                *slot = r.relevance_score;
            }
        }
        Ok(scores)
    }
}

#[derive(Debug, Deserialize)]
struct ExpansionPayload {
    #[serde(default)]
    tokens: Vec<String>,
}

/// Calls a chat-completion endpoint asking it to return `{"tokens": [...]}`.
pub struct LlmQueryExpander {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl LlmQueryExpander {
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
}

#[async_trait]
impl QueryExpander for LlmQueryExpander {
    async fn expand(&self, query: &str) -> Result<Vec<String>> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "response_format": { "type": "json_object" },
            "messages": [
                {
                    "role": "system",
                    "content": "Expand the user's query into related search keywords. Respond with JSON: {\"tokens\": [\"...\"]}",
                },
                { "role": "user", "content": query },
            ],
        });
        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(MemoryError::Expansion(format!("HTTP {status}: {text}")));
        }
        let value: serde_json::Value = resp.json().await?;
        let content = value["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| MemoryError::Expansion("missing content in response".into()))?;
        let payload: ExpansionPayload = serde_json::from_str(content)
            .map_err(|e| MemoryError::Expansion(format!("invalid expansion JSON: {e}")))?;
        Ok(payload.tokens)
    }
}
