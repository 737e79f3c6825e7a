//! Job model persisted to the scheduler's JSON file (§4.8).

use serde::{Deserialize, Serialize};

/// Schedule kind. Adjacently tagged so a job's on-disk JSON reads as
/// `"kind": "cron", "expression": "..."` etc.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobKind {
    /// 6-field expression including seconds, registered with the cron
    /// engine (§4.8). Matched at minute granularity — see `cron.rs`.
    Cron { expression: String },
    /// Interval in milliseconds; re-fires when `now - last_run_ms >= interval_ms`.
    Every { interval_ms: i64 },
    /// Absolute epoch milliseconds; fires once, then the job is disabled.
    At { at_ms: i64 },
}

/// What firing the job actually does: invoke the LLM runtime with `message`,
/// optionally delivering the result to a channel/chat id (§4.8, §4.9).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CronPayload {
    pub message: String,
    #[serde(default)]
    pub deliver: bool,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
}

/// Mutable run-state tracked alongside a job (§4.8 step 3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct JobState {
    pub last_run_ms: Option<i64>,
    pub last_status: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CronJob {
    pub id: String,
    pub name: String,
    pub kind: JobKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub delete_after_run: bool,
    pub payload: CronPayload,
    #[serde(default)]
    pub state: JobState,
}

fn default_true() -> bool {
    true
}

impl CronJob {
    pub fn new(name: impl Into<String>, kind: JobKind, payload: CronPayload) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            kind,
            enabled: true,
            delete_after_run: false,
            payload,
            state: JobState::default(),
        }
    }
}
