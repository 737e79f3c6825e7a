//! Extraction service: buffer, quiet-gap/token-cap/daily flush, LLM extract,
//! write-back on failure (§4.6).

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Timelike;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Result;
use crate::llm::ExtractionLlm;
use crate::manager::MemoryEngine;
use crate::types::NewMemory;

const DRAIN_BATCH: usize = 500;
const TICK: Duration = Duration::from_secs(1);

pub struct ExtractionConfig {
    pub quiet_gap: Duration,
    pub token_cap: f64,
    /// `HH:MM`, compared against local wall-clock minute on each daily tick.
    pub daily_flush: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            quiet_gap: Duration::from_secs(180),
            token_cap: 10_000.0,
            daily_flush: "03:00".to_string(),
        }
    }
}

pub struct ExtractionService {
    memory: Arc<MemoryEngine>,
    llm: Arc<dyn ExtractionLlm>,
    config: ExtractionConfig,
    last_message_at: Mutex<Option<Instant>>,
}

impl ExtractionService {
    pub fn new(memory: Arc<MemoryEngine>, llm: Arc<dyn ExtractionLlm>, config: ExtractionConfig) -> Self {
        Self {
            memory,
            llm,
            config,
            last_message_at: Mutex::new(None),
        }
    }

    /// Persist one conversation turn, reset the quiet-gap clock, and trigger
    /// an async flush if the buffer has crossed `token_cap` (§4.6).
    pub fn buffer_message(&self, channel: &str, sender_id: &str, role: &str, content: &str) -> Result<()> {
        let tokens = estimate_tokens(content);
        self.memory.buffer_message(channel, sender_id, role, content, tokens)?;
        *self.last_message_at.lock().unwrap() = Some(Instant::now());

        let total = self.memory.buffer_token_total()?;
        if total >= self.config.token_cap {
            let memory = self.memory.clone();
            let llm = self.llm.clone();
            tokio::spawn(async move {
                if let Err(e) = flush_once(&memory, llm.as_ref()).await {
                    warn!(error = %e, "token-cap triggered flush failed");
                }
            });
        }
        Ok(())
    }

    /// Launches the quiet-gap watcher and the daily-flush ticker. Both loops
    /// exit when `ctx` is cancelled.
    pub fn start(self: &Arc<Self>, ctx: CancellationToken) {
        let quiet_gap = self.clone();
        let quiet_ctx = ctx.clone();
        tokio::spawn(async move {
            let mut ticker = interval(TICK);
            loop {
                tokio::select! {
                    _ = quiet_ctx.cancelled() => break,
                    _ = ticker.tick() => {
                        let due = {
                            let guard = quiet_gap.last_message_at.lock().unwrap();
                            guard.map(|t| t.elapsed() >= quiet_gap.config.quiet_gap).unwrap_or(false)
                        };
                        if due {
                            *quiet_gap.last_message_at.lock().unwrap() = None;
                            if let Err(e) = flush_once(&quiet_gap.memory, quiet_gap.llm.as_ref()).await {
                                warn!(error = %e, "quiet-gap flush failed");
                            }
                        }
                    }
                }
            }
        });

        let daily = self.clone();
        let daily_ctx = ctx;
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = daily_ctx.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = chrono::Local::now();
                        let hhmm = format!("{:02}:{:02}", now.hour(), now.minute());
                        if hhmm == daily.config.daily_flush {
                            if let Err(e) = flush_once(&daily.memory, daily.llm.as_ref()).await {
                                warn!(error = %e, "daily flush failed");
                            }
                        }
                    }
                }
            }
        });
    }

    /// Final synchronous flush performed on shutdown (§4.6 `Stop`).
    pub async fn stop(&self) {
        if let Err(e) = flush_once(&self.memory, self.llm.as_ref()).await {
            warn!(error = %e, "final flush on stop failed");
        }
    }
}

async fn flush_once(memory: &Arc<MemoryEngine>, llm: &dyn ExtractionLlm) -> Result<()> {
    let rows = memory.drain_buffer(DRAIN_BATCH)?;
    if rows.is_empty() {
        return Ok(());
    }

    let chat: String = rows
        .iter()
        .map(|r| format!("[{}][{}]: {}\n", r.role, r.channel, r.content))
        .collect();

    match llm.extract(&chat).await {
        Ok(result) => {
            for fact in result.facts {
                memory.insert(NewMemory {
                    tier: crate::types::Tier::Fact,
                    project: fact.project,
                    topic: fact.topic,
                    category: fact.category,
                    content: fact.content,
                    importance: fact.importance,
                    source: "extraction".to_string(),
                })?;
            }
            let first = &rows[0];
            let sum_tokens: f64 = rows.iter().map(|r| r.token_count).sum();
            let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
            memory.insert_event(&today, &first.channel, &first.sender_id, &result.summary, sum_tokens as i64)?;
            info!(facts = "extracted", rows = rows.len(), "extraction flush complete");
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "extraction LLM call failed, re-queueing buffered rows");
            memory.requeue_buffer(&rows)?;
            Ok(())
        }
    }
}

/// `chineseChars * 1.5 + ascii_words * 0.75`, floored at 1 (§4.6).
pub fn estimate_tokens(text: &str) -> f64 {
    let chinese_chars = text.chars().filter(|c| is_han(*c)).count();
    let ascii_words = text
        .split_whitespace()
        .filter(|w| w.chars().all(|c| c.is_ascii()))
        .count();
    let estimate = chinese_chars as f64 * 1.5 + ascii_words as f64 * 0.75;
    estimate.max(1.0)
}

fn is_han(c: char) -> bool {
    matches!(c as u32,
        0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0xF900..=0xFAFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_tokens_counts_han_and_ascii_words() {
        let t = estimate_tokens("你好 hello world");
        assert!((t - (2.0 * 1.5 + 2.0 * 0.75)).abs() < 1e-9);
    }

    #[test]
    fn estimate_tokens_has_a_floor_of_one() {
        assert_eq!(estimate_tokens(""), 1.0);
    }
}
