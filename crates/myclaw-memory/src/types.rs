use serde::{Deserialize, Serialize};

/// Category of a tier-1/tier-2 memory row (§3 Memory).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    Identity,
    Config,
    Credential,
    Decision,
    Solution,
    Event,
    Conversation,
    Temp,
    Debug,
}

impl std::fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Identity => "identity",
            Self::Config => "config",
            Self::Credential => "credential",
            Self::Decision => "decision",
            Self::Solution => "solution",
            Self::Event => "event",
            Self::Conversation => "conversation",
            Self::Temp => "temp",
            Self::Debug => "debug",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for MemoryCategory {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "identity" => Ok(Self::Identity),
            "config" => Ok(Self::Config),
            "credential" => Ok(Self::Credential),
            "decision" => Ok(Self::Decision),
            "solution" => Ok(Self::Solution),
            "event" => Ok(Self::Event),
            "conversation" => Ok(Self::Conversation),
            "temp" => Ok(Self::Temp),
            "debug" => Ok(Self::Debug),
            other => Err(format!("unknown memory category: {other}")),
        }
    }
}

/// Storage tier: 1 is the durable core profile, 2 is the queryable fact
/// store (§3 Memory).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Tier {
    Profile = 1,
    Fact = 2,
}

pub const DEFAULT_PROJECT: &str = "_global";
pub const DEFAULT_TOPIC: &str = "_general";

/// A tier-1 or tier-2 memory row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: i64,
    pub tier: Tier,
    pub project: String,
    pub topic: String,
    pub category: MemoryCategory,
    pub content: String,
    pub importance: f64,
    pub source: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_accessed: i64,
    pub access_count: i64,
    pub is_archived: bool,
    pub embedding: Option<Vec<u8>>,
    pub embedding_model: Option<String>,
    pub embedding_dim: i64,
}

/// A fresh memory row being written by the extraction or compression
/// pipelines; the timestamp/id/access-count fields are assigned by the
/// engine on insert.
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub tier: Tier,
    pub project: String,
    pub topic: String,
    pub category: MemoryCategory,
    pub content: String,
    pub importance: f64,
    pub source: String,
}

impl NewMemory {
    pub fn tier2(
        category: MemoryCategory,
        content: impl Into<String>,
        importance: f64,
        source: impl Into<String>,
    ) -> Self {
        Self {
            tier: Tier::Fact,
            project: DEFAULT_PROJECT.to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            category,
            content: content.into(),
            importance,
            source: source.into(),
        }
    }
}

/// Tier-3 daily event row (§3 EventEntry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEntry {
    pub id: i64,
    /// `YYYY-MM-DD`.
    pub event_date: String,
    pub channel: String,
    pub sender_id: String,
    pub summary: String,
    pub raw_tokens: i64,
    pub is_compressed: bool,
    pub created_at: i64,
}

/// Extraction buffer row (§3 BufferMessage).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferMessage {
    pub id: i64,
    pub channel: String,
    pub sender_id: String,
    pub role: String,
    pub content: String,
    pub token_count: f64,
    pub created_at: i64,
}

/// Fact produced by the extraction/compression LLM calls — not persisted
/// verbatim, only used to construct [`NewMemory`] rows (§3 FactEntry).
#[derive(Debug, Clone, Deserialize)]
pub struct FactEntry {
    pub content: String,
    #[serde(default = "default_project")]
    pub project: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    pub category: MemoryCategory,
    pub importance: f64,
}

fn default_project() -> String {
    DEFAULT_PROJECT.to_string()
}
fn default_topic() -> String {
    DEFAULT_TOPIC.to_string()
}

/// Tier-1 profile entry produced by `UpdateProfile` (§3 ProfileEntry).
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileEntry {
    pub content: String,
}

/// LLM extraction response envelope (§4.6 flush protocol step 2).
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractResult {
    pub facts: Vec<FactEntry>,
    pub summary: String,
}

/// LLM compression response envelope (§4.7).
#[derive(Debug, Clone, Deserialize)]
pub struct CompressResult {
    pub facts: Vec<FactEntry>,
}
