//! Compression service: daily/weekly compression, tier-1 profile refresh,
//! decayed-row cleanup (§4.7).

use std::sync::Arc;

use tracing::warn;

use crate::error::Result;
use crate::llm::{CompressionLlm, ProfileLlm};
use crate::manager::MemoryEngine;
use crate::retrieval::{days_since, relevance_score};
use crate::types::{MemoryCategory, NewMemory, Tier, DEFAULT_PROJECT, DEFAULT_TOPIC};

const DEEP_COMPRESS_MIN_ENTRIES: i64 = 10;
const DEEP_COMPRESS_BATCH: usize = 500;
const PROFILE_TOP_FACTS: usize = 200;
const PROFILE_MIN_IMPORTANCE: f64 = 0.7;
const DECAY_THRESHOLD: f64 = 0.001;

pub struct CompressionService {
    memory: Arc<MemoryEngine>,
    compress_llm: Arc<dyn CompressionLlm>,
    profile_llm: Arc<dyn ProfileLlm>,
}

impl CompressionService {
    pub fn new(
        memory: Arc<MemoryEngine>,
        compress_llm: Arc<dyn CompressionLlm>,
        profile_llm: Arc<dyn ProfileLlm>,
    ) -> Self {
        Self {
            memory,
            compress_llm,
            profile_llm,
        }
    }

    /// Compress yesterday's (or any given `event_date`'s) uncompressed
    /// events into tier-2 facts. Empty days and LLM failures both return
    /// `Ok(())` — a failure simply leaves the day uncompressed for retry
    /// (§4.7, §7).
    pub async fn daily_compress(&self, event_date: &str) -> Result<()> {
        let events = self.memory.uncompressed_events(event_date)?;
        if events.is_empty() {
            self.memory.mark_date_compressed(event_date)?;
            return Ok(());
        }

        let joined: String = events.iter().map(|e| e.summary.clone()).collect::<Vec<_>>().join("\n");
        match self.compress_llm.compress(&joined).await {
            Ok(result) => {
                for fact in result.facts {
                    self.memory.insert(NewMemory {
                        tier: Tier::Fact,
                        project: fact.project,
                        topic: fact.topic,
                        category: fact.category,
                        content: fact.content,
                        importance: fact.importance,
                        source: "compression".to_string(),
                    })?;
                }
                self.memory.mark_date_compressed(event_date)?;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, event_date, "daily compress LLM call failed, leaving day uncompressed");
                Ok(())
            }
        }
    }

    /// Merge over-large `(project, topic)` partitions, refresh the tier-1
    /// profile, and archive decayed temp/debug rows (§4.7).
    pub async fn weekly_deep_compress(&self) -> Result<()> {
        let partitions = self.memory.tier2_partitions()?;
        for (project, topic, count) in partitions {
            if count < DEEP_COMPRESS_MIN_ENTRIES {
                continue;
            }
            let entries = self.memory.partition_entries(&project, &topic, DEEP_COMPRESS_BATCH)?;
            if entries.is_empty() {
                continue;
            }
            let joined: String = entries.iter().map(|e| e.content.clone()).collect::<Vec<_>>().join("\n");
            match self.compress_llm.compress(&joined).await {
                Ok(result) => {
                    let ids: Vec<i64> = entries.iter().map(|e| e.id).collect();
                    self.memory.archive_ids(&ids)?;
                    for fact in result.facts {
                        self.memory.insert(NewMemory {
                            tier: Tier::Fact,
                            project: fact.project,
                            topic: fact.topic,
                            category: fact.category,
                            content: fact.content,
                            importance: fact.importance,
                            source: "compression".to_string(),
                        })?;
                    }
                }
                Err(e) => {
                    warn!(error = %e, project, topic, "weekly deep compress LLM call failed, partition left as-is");
                }
            }
        }

        self.refresh_tier1().await?;
        self.cleanup_decayed()?;
        Ok(())
    }

    async fn refresh_tier1(&self) -> Result<()> {
        let current = self.memory.active_tier1()?;
        let profile_text: String = current.iter().map(|m| m.content.clone()).collect::<Vec<_>>().join("\n");
        let facts = self.memory.high_importance_facts(PROFILE_MIN_IMPORTANCE, PROFILE_TOP_FACTS)?;
        let facts_text: String = facts.iter().map(|m| m.content.clone()).collect::<Vec<_>>().join("\n");

        match self.profile_llm.update_profile(&profile_text, &facts_text).await {
            Ok(entries) if !entries.is_empty() => {
                self.memory.archive_all_tier1()?;
                for entry in entries {
                    self.memory.insert(NewMemory {
                        tier: Tier::Profile,
                        project: DEFAULT_PROJECT.to_string(),
                        topic: DEFAULT_TOPIC.to_string(),
                        category: MemoryCategory::Identity,
                        content: entry.content,
                        importance: 1.0,
                        source: "compression".to_string(),
                    })?;
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "profile refresh LLM call failed, tier-1 left unchanged"),
        }
        Ok(())
    }

    fn cleanup_decayed(&self) -> Result<()> {
        let candidates = self.memory.decay_candidates()?;
        let now = crate::manager::now_ms();
        let ids: Vec<i64> = candidates
            .iter()
            .filter(|m| relevance_score(m, days_since(m.last_accessed, now)) <= DECAY_THRESHOLD)
            .map(|m| m.id)
            .collect();
        self.memory.archive_ids(&ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;
    use crate::types::{CompressResult, FactEntry, MemoryCategory};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct MockCompressLlm {
        fail: bool,
        facts: Vec<FactEntry>,
    }

    #[async_trait]
    impl CompressionLlm for MockCompressLlm {
        async fn compress(&self, _joined: &str) -> Result<CompressResult> {
            if self.fail {
                return Err(crate::error::MemoryError::Compression("boom".to_string()));
            }
            Ok(CompressResult {
                facts: self.facts.clone(),
            })
        }
    }

    struct MockProfileLlm {
        entries: Vec<crate::types::ProfileEntry>,
        called: AtomicBool,
    }

    #[async_trait]
    impl ProfileLlm for MockProfileLlm {
        async fn update_profile(&self, _current: &str, _facts: &str) -> Result<Vec<crate::types::ProfileEntry>> {
            self.called.store(true, Ordering::SeqCst);
            Ok(self.entries.clone())
        }
    }

    fn fact(content: &str) -> FactEntry {
        FactEntry {
            content: content.to_string(),
            project: DEFAULT_PROJECT.to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            category: MemoryCategory::Event,
            importance: 0.5,
        }
    }

    fn engine() -> Arc<MemoryEngine> {
        let conn = schema::open(":memory:").unwrap();
        Arc::new(MemoryEngine::new(conn, None))
    }

    #[tokio::test]
    async fn daily_compress_marks_empty_day_compressed() {
        let memory = engine();
        let compress_llm = Arc::new(MockCompressLlm {
            fail: false,
            facts: vec![],
        });
        let profile_llm = Arc::new(MockProfileLlm {
            entries: vec![],
            called: AtomicBool::new(false),
        });
        let service = CompressionService::new(memory.clone(), compress_llm, profile_llm);
        service.daily_compress("2026-01-01").await.unwrap();
        assert!(memory.uncompressed_events("2026-01-01").unwrap().is_empty());
    }

    #[tokio::test]
    async fn daily_compress_writes_facts_and_marks_compressed() {
        let memory = engine();
        memory.insert_event("2026-01-02", "telegram", "u1", "talked about hotfix", 10).unwrap();
        let compress_llm = Arc::new(MockCompressLlm {
            fail: false,
            facts: vec![fact("hotfix shipped")],
        });
        let profile_llm = Arc::new(MockProfileLlm {
            entries: vec![],
            called: AtomicBool::new(false),
        });
        let service = CompressionService::new(memory.clone(), compress_llm, profile_llm);
        service.daily_compress("2026-01-02").await.unwrap();
        assert!(memory.uncompressed_events("2026-01-02").unwrap().is_empty());
        let stats = memory.stats().unwrap();
        assert_eq!(stats.active_tier2, 1);
    }

    #[tokio::test]
    async fn daily_compress_llm_failure_leaves_day_uncompressed() {
        let memory = engine();
        memory.insert_event("2026-01-03", "telegram", "u1", "talked about hotfix", 10).unwrap();
        let compress_llm = Arc::new(MockCompressLlm {
            fail: true,
            facts: vec![],
        });
        let profile_llm = Arc::new(MockProfileLlm {
            entries: vec![],
            called: AtomicBool::new(false),
        });
        let service = CompressionService::new(memory.clone(), compress_llm, profile_llm);
        service.daily_compress("2026-01-03").await.unwrap();
        assert_eq!(memory.uncompressed_events("2026-01-03").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn weekly_deep_compress_refreshes_profile_when_entries_returned() {
        let memory = engine();
        memory
            .insert(NewMemory {
                tier: Tier::Profile,
                project: DEFAULT_PROJECT.to_string(),
                topic: DEFAULT_TOPIC.to_string(),
                category: MemoryCategory::Identity,
                content: "name is bob".to_string(),
                importance: 1.0,
                source: "test".to_string(),
            })
            .unwrap();

        let compress_llm = Arc::new(MockCompressLlm {
            fail: false,
            facts: vec![],
        });
        let profile_llm = Arc::new(MockProfileLlm {
            entries: vec![crate::types::ProfileEntry {
                content: "name is robert".to_string(),
            }],
            called: AtomicBool::new(false),
        });
        let service = CompressionService::new(memory.clone(), compress_llm, profile_llm.clone());
        service.weekly_deep_compress().await.unwrap();
        assert!(profile_llm.called.load(Ordering::SeqCst));
        let active = memory.active_tier1().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].content, "name is robert");
    }

    #[tokio::test]
    async fn weekly_deep_compress_leaves_profile_on_empty_update() {
        let memory = engine();
        memory
            .insert(NewMemory {
                tier: Tier::Profile,
                project: DEFAULT_PROJECT.to_string(),
                topic: DEFAULT_TOPIC.to_string(),
                category: MemoryCategory::Identity,
                content: "name is bob".to_string(),
                importance: 1.0,
                source: "test".to_string(),
            })
            .unwrap();
        let compress_llm = Arc::new(MockCompressLlm {
            fail: false,
            facts: vec![],
        });
        let profile_llm = Arc::new(MockProfileLlm {
            entries: vec![],
            called: AtomicBool::new(false),
        });
        let service = CompressionService::new(memory.clone(), compress_llm, profile_llm);
        service.weekly_deep_compress().await.unwrap();
        let active = memory.active_tier1().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].content, "name is bob");
    }
}
