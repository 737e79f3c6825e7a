use figment::{
    providers::{Env, Format, Json},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{MyclawError, Result};

/// Default bounded-queue capacity for the message bus (§3 MessageBus).
pub const DEFAULT_BUS_CAPACITY: usize = 100;
/// Default WeCom reply-cache TTL, seconds.
pub const DEFAULT_REPLY_CACHE_TTL_SECS: u64 = 3600;
/// Default WeCom dedup-cache TTL, seconds.
pub const DEFAULT_DEDUP_TTL_SECS: u64 = 300;
/// Default extraction quiet-gap, seconds.
pub const DEFAULT_QUIET_GAP_SECS: u64 = 180;
/// Default daily flush/compress time.
pub const DEFAULT_DAILY_FLUSH: &str = "03:00";
/// Default enhanced-retrieval candidate pool size.
pub const DEFAULT_CANDIDATE_LIMIT: usize = 40;
/// Default enhanced-retrieval rerank pool size.
pub const DEFAULT_RERANK_LIMIT: usize = 20;

/// Top-level config (`~/.myclaw/config.json` + `MYCLAW_*` env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MyclawConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

impl Default for MyclawConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            bus: BusConfig::default(),
            database: DatabaseConfig::default(),
            runtime: RuntimeConfig::default(),
            channels: ChannelsConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Directory of `SKILL.md` files loaded as system-prompt overlays.
    pub skills_dir: Option<String>,
    /// Workspace root containing `AGENTS.md`, `SOUL.md`, legacy `memory/`.
    pub workspace: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            skills_dir: None,
            workspace: None,
        }
    }
}

fn default_port() -> u16 {
    8088
}
fn default_bind() -> String {
    "127.0.0.1".to_string()
}

/// Bounded-channel sizing for the inbound/outbound bus (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: default_bus_capacity(),
        }
    }
}

fn default_bus_capacity() -> usize {
    DEFAULT_BUS_CAPACITY
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.myclaw/memory/memory.db")
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.myclaw/config.json")
}

fn default_cron_jobs_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.myclaw/data/cron/jobs.json")
}

/// Model runtime endpoint (§6 "Runtime request/response").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    /// Normalizes to one of {low, medium, high, xhigh}; unrecognized -> empty.
    #[serde(default)]
    pub reasoning_effort: Option<String>,
    #[serde(default = "default_cron_jobs_path")]
    pub cron_jobs_path: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_url: default_anthropic_base_url(),
            api_key: None,
            model: default_model(),
            reasoning_effort: None,
            cron_jobs_path: default_cron_jobs_path(),
        }
    }
}

fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_model() -> String {
    "claude-sonnet-4-6".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    pub telegram: Option<TelegramConfig>,
    pub feishu: Option<FeishuConfig>,
    pub wecom: Option<WecomConfig>,
    pub whatsapp: Option<WhatsappConfig>,
    pub webui: Option<WebuiConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    #[serde(default)]
    pub allow_from: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeishuConfig {
    pub app_id: String,
    pub app_secret: String,
    #[serde(default = "default_feishu_port")]
    pub port: u16,
    /// Present when the Feishu app has "verification token" configured;
    /// checked against the `token` field of each event callback.
    #[serde(default)]
    pub verification_token: Option<String>,
    #[serde(default)]
    pub allow_from: Vec<String>,
}

fn default_feishu_port() -> u16 {
    8091
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WecomConfig {
    pub token: String,
    pub encoding_aes_key: String,
    pub receive_id: String,
    #[serde(default = "default_wecom_port")]
    pub port: u16,
    #[serde(default)]
    pub allow_from: Vec<String>,
    #[serde(default = "default_reply_cache_ttl")]
    pub reply_cache_ttl_secs: u64,
    #[serde(default = "default_dedup_ttl")]
    pub dedup_ttl_secs: u64,
}

fn default_wecom_port() -> u16 {
    8089
}
fn default_reply_cache_ttl() -> u64 {
    DEFAULT_REPLY_CACHE_TTL_SECS
}
fn default_dedup_ttl() -> u64 {
    DEFAULT_DEDUP_TTL_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsappConfig {
    pub ws_url: String,
    #[serde(default)]
    pub allow_from: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebuiConfig {
    #[serde(default = "default_webui_port")]
    pub port: u16,
    #[serde(default)]
    pub allow_from: Vec<String>,
}

fn default_webui_port() -> u16 {
    8090
}

/// Retrieval mode (§4.5); unrecognized values normalize to `Classic`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    #[default]
    Classic,
    Enhanced,
}

impl RetrievalMode {
    /// Parses a free-form string, normalizing anything unrecognized to `Classic`.
    pub fn normalize(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "enhanced" => RetrievalMode::Enhanced,
            _ => RetrievalMode::Classic,
        }
    }
}

/// Memory-pipeline overrides (§4.4-§4.7, §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub retrieval_mode: String,
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
    #[serde(default = "default_rerank_limit")]
    pub rerank_limit: usize,
    #[serde(default = "default_quiet_gap_secs")]
    pub quiet_gap_secs: u64,
    /// Fraction in (0, 1]; `token_cap = max(1000, 10000 * token_budget)`.
    #[serde(default = "default_token_budget")]
    pub token_budget: f64,
    #[serde(default = "default_daily_flush")]
    pub daily_flush: String,
    #[serde(default = "default_embedding_timeout_secs")]
    pub embedding_timeout_secs: u64,
    #[serde(default = "default_rerank_timeout_secs")]
    pub rerank_timeout_secs: u64,
    #[serde(default = "default_query_expansion_timeout_secs")]
    pub query_expansion_timeout_secs: u64,
    #[serde(default = "default_image_fetch_timeout_secs")]
    pub image_fetch_timeout_secs: u64,
    pub embedder_url: Option<String>,
    pub reranker_url: Option<String>,
    pub query_expander_url: Option<String>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            retrieval_mode: "classic".to_string(),
            candidate_limit: default_candidate_limit(),
            rerank_limit: default_rerank_limit(),
            quiet_gap_secs: default_quiet_gap_secs(),
            token_budget: default_token_budget(),
            daily_flush: default_daily_flush(),
            embedding_timeout_secs: default_embedding_timeout_secs(),
            rerank_timeout_secs: default_rerank_timeout_secs(),
            query_expansion_timeout_secs: default_query_expansion_timeout_secs(),
            image_fetch_timeout_secs: default_image_fetch_timeout_secs(),
            embedder_url: None,
            reranker_url: None,
            query_expander_url: None,
        }
    }
}

impl MemoryConfig {
    pub fn retrieval_mode(&self) -> RetrievalMode {
        RetrievalMode::normalize(&self.retrieval_mode)
    }

    /// `token_cap = max(1000, 10000 * token_budget)`, per §4.6.
    pub fn token_cap(&self) -> f64 {
        (10_000.0 * self.token_budget).max(1000.0)
    }
}

fn default_candidate_limit() -> usize {
    DEFAULT_CANDIDATE_LIMIT
}
fn default_rerank_limit() -> usize {
    DEFAULT_RERANK_LIMIT
}
fn default_quiet_gap_secs() -> u64 {
    DEFAULT_QUIET_GAP_SECS
}
fn default_token_budget() -> f64 {
    1.0
}
fn default_daily_flush() -> String {
    DEFAULT_DAILY_FLUSH.to_string()
}
fn default_embedding_timeout_secs() -> u64 {
    30
}
fn default_rerank_timeout_secs() -> u64 {
    30
}
fn default_query_expansion_timeout_secs() -> u64 {
    20
}
fn default_image_fetch_timeout_secs() -> u64 {
    10
}

impl MyclawConfig {
    /// Load config from `~/.myclaw/config.json` (or an explicit path) with
    /// `MYCLAW_*` env var overrides layered on top.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let mut config: MyclawConfig = Figment::new()
            .merge(Json::file(&path))
            .merge(Env::prefixed("MYCLAW_").split("__"))
            .extract()
            .map_err(|e| MyclawError::Config(e.to_string()))?;

        if let Some(key) = resolve_api_key() {
            config.runtime.api_key = Some(key);
        }
        if let Ok(base_url) = std::env::var("MYCLAW_BASE_URL").or_else(|_| std::env::var("ANTHROPIC_BASE_URL")) {
            config.runtime.base_url = base_url;
        }
        config.runtime.reasoning_effort = config
            .runtime
            .reasoning_effort
            .as_deref()
            .map(normalize_reasoning_effort)
            .filter(|s| !s.is_empty());

        Ok(config)
    }
}

/// First non-empty environment variable wins, in documented priority order
/// (§6): `MYCLAW_API_KEY`, `ANTHROPIC_API_KEY`, `ANTHROPIC_AUTH_TOKEN`,
/// `OPENAI_API_KEY`.
pub fn resolve_api_key() -> Option<String> {
    for var in [
        "MYCLAW_API_KEY",
        "ANTHROPIC_API_KEY",
        "ANTHROPIC_AUTH_TOKEN",
        "OPENAI_API_KEY",
    ] {
        if let Ok(value) = std::env::var(var) {
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    None
}

/// Normalizes a reasoning-effort value to lowercase; returns empty string
/// for anything outside `{low, medium, high, xhigh}`.
pub fn normalize_reasoning_effort(raw: &str) -> String {
    let lower = raw.to_ascii_lowercase();
    match lower.as_str() {
        "low" | "medium" | "high" | "xhigh" => lower,
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retrieval_mode_normalizes_unknown_to_classic() {
        assert_eq!(RetrievalMode::normalize("bogus"), RetrievalMode::Classic);
        assert_eq!(RetrievalMode::normalize("ENHANCED"), RetrievalMode::Enhanced);
    }

    #[test]
    fn reasoning_effort_normalizes_case_and_rejects_unknown() {
        assert_eq!(normalize_reasoning_effort("HIGH"), "high");
        assert_eq!(normalize_reasoning_effort("ultra"), "");
    }

    #[test]
    fn token_cap_respects_floor() {
        let mut cfg = MemoryConfig::default();
        cfg.token_budget = 0.01;
        assert_eq!(cfg.token_cap(), 1000.0);
        cfg.token_budget = 1.0;
        assert_eq!(cfg.token_cap(), 10_000.0);
    }
}
