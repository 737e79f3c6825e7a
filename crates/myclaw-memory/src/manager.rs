//! Tiered memory store: tier-1/tier-2 CRUD, touch/archive, and embedding
//! backfill (§4.4).
//!
//! Writes are serialized under a process-level mutex; reads take their own
//! short-lived lock and never block on an in-flight embedder call — the
//! background embedding job completes its HTTP round trip before it ever
//! reacquires the mutex for the update step (§4.4 "Background job MUST NOT
//! be holding the mutex while calling the embedder").

use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::embedder::Embedder;
use crate::error::{MemoryError, Result};
use crate::types::*;
use crate::vector;

/// Default embedding-backfill batch size (§4.4).
pub const DEFAULT_BACKFILL_BATCH: usize = 16;

pub struct MemoryEngine {
    db: Arc<Mutex<Connection>>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl MemoryEngine {
    pub fn new(conn: Connection, embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
            embedder,
        }
    }

    /// Exposes a clone of the shared connection handle for components that
    /// need their own read path (retrieval, compression) without taking a
    /// lock through this struct.
    pub fn db_handle(&self) -> Arc<Mutex<Connection>> {
        self.db.clone()
    }

    /// Insert a tier-1 or tier-2 row. Never fails because an embedder is
    /// unavailable (fail-open); when one is wired, a background job is
    /// spawned after the write completes to backfill the embedding.
    pub fn insert(&self, new: NewMemory) -> Result<i64> {
        let now = now_ms();
        let id = {
            let db = self.db.lock().unwrap();
            db.execute(
                "INSERT INTO memories
                 (tier, project, topic, category, content, importance, source,
                  created_at, updated_at, last_accessed, access_count, is_archived,
                  embedding_dim)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?8,?8,0,0,0)",
                params![
                    new.tier as u8,
                    new.project,
                    new.topic,
                    new.category.to_string(),
                    new.content,
                    new.importance,
                    new.source,
                    now,
                ],
            )?;
            db.last_insert_rowid()
        };

        if let Some(embedder) = self.embedder.clone() {
            let db = self.db.clone();
            let content = self
                .get(id)?
                .map(|m| m.content)
                .unwrap_or_default();
            tokio::spawn(async move {
                match embedder.embed(&content).await {
                    Ok(vector) => {
                        if let Err(e) = write_embedding(&db, id, &vector, embedder.model_name()) {
                            warn!(memory_id = id, error = %e, "failed to persist backfilled embedding");
                        }
                    }
                    Err(e) => {
                        debug!(memory_id = id, error = %e, "embedding request failed, row stays unembedded");
                    }
                }
            });
        }

        Ok(id)
    }

    pub fn get(&self, id: i64) -> Result<Option<Memory>> {
        let db = self.db.lock().unwrap();
        db.query_row(SELECT_MEMORY_SQL_BY_ID, params![id], row_to_memory)
            .optional()
            .map_err(MemoryError::from)
    }

    /// Increment `access_count` and set `last_accessed = now`.
    pub fn touch(&self, id: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE memories SET access_count = access_count + 1, last_accessed = ?1 WHERE id = ?2",
            params![now_ms(), id],
        )?;
        Ok(())
    }

    /// Flip the archived flag; never a physical delete.
    pub fn archive(&self, id: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE memories SET is_archived = 1, updated_at = ?1 WHERE id = ?2",
            params![now_ms(), id],
        )?;
        Ok(())
    }

    /// Archive every active tier-1 row (used by `refreshTier1`, §4.7).
    pub fn archive_all_tier1(&self) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE memories SET is_archived = 1, updated_at = ?1 WHERE tier = 1 AND is_archived = 0",
            params![now_ms()],
        )?;
        Ok(())
    }

    /// Archive rows matching a category set whose relevance score (computed
    /// by the caller) is at or below threshold — used by `cleanupDecayed`.
    pub fn archive_ids(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let db = self.db.lock().unwrap();
        let now = now_ms();
        for id in ids {
            db.execute(
                "UPDATE memories SET is_archived = 1, updated_at = ?1 WHERE id = ?2",
                params![now, id],
            )?;
        }
        Ok(())
    }

    /// Active (non-archived) tier-1 profile rows, newest first.
    pub fn active_tier1(&self) -> Result<Vec<Memory>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "{SELECT_MEMORY_SQL} WHERE tier = 1 AND is_archived = 0 ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map([], row_to_memory)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Base tier-2 candidate query (§4.5 classic pipeline step 1).
    pub fn base_candidates(&self, project: Option<&str>, limit: usize) -> Result<Vec<Memory>> {
        let db = self.db.lock().unwrap();
        let rows: Vec<Memory> = match project {
            Some(p) => {
                let mut stmt = db.prepare(&format!(
                    "{SELECT_MEMORY_SQL} WHERE tier = 2 AND is_archived = 0
                     AND (project = ?1 OR project = '_global')
                     ORDER BY importance DESC LIMIT ?2"
                ))?;
                stmt.query_map(params![p, limit as i64], row_to_memory)?
                    .filter_map(|r| r.ok())
                    .collect()
            }
            None => {
                let mut stmt = db.prepare(&format!(
                    "{SELECT_MEMORY_SQL} WHERE tier = 2 AND is_archived = 0
                     ORDER BY importance DESC LIMIT ?1"
                ))?;
                stmt.query_map(params![limit as i64], row_to_memory)?
                    .filter_map(|r| r.ok())
                    .collect()
            }
        };
        Ok(rows)
    }

    /// Scored FTS match: returns `(memory, raw bm25 score)`. `sanitized_query`
    /// must already be built by [`crate::retrieval::build_fts_query`].
    pub fn fts_search(&self, sanitized_query: &str, limit: usize) -> Result<Vec<(Memory, f64)>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {MEMORY_COLUMNS}, bm25(memories_fts) AS score
             FROM memories
             JOIN memories_fts ON memories_fts.rowid = memories.id
             WHERE memories_fts MATCH ?1 AND memories.is_archived = 0 AND memories.tier = 2
             ORDER BY score LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![sanitized_query, limit as i64], |row| {
            let mem = row_to_memory(row)?;
            let score: f64 = row.get(16)?;
            Ok((mem, score))
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// All non-archived tier-2 rows carrying an embedding, optionally
    /// restricted to `project`/`_global` (§4.5 enhanced vector search).
    pub fn embedded_candidates(&self, project: Option<&str>) -> Result<Vec<(Memory, Vec<f32>)>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "{SELECT_MEMORY_SQL} WHERE tier = 2 AND is_archived = 0 AND embedding_dim > 0"
        ))?;
        let rows = stmt.query_map([], row_to_memory)?;
        let mut out = Vec::new();
        for row in rows.filter_map(|r| r.ok()) {
            if let Some(p) = project {
                if row.project != p && row.project != DEFAULT_PROJECT {
                    continue;
                }
            }
            if let Some(blob) = &row.embedding {
                if let Ok(vec) = vector::decode(blob) {
                    out.push((row, vec));
                }
            }
        }
        Ok(out)
    }

    /// Idempotently backfill embeddings for rows with `embedding IS NULL OR
    /// embedding_dim = 0`, ascending id, in batches (§4.4). Returns the
    /// number of rows updated before `cancelled` fired or a batch failed.
    pub async fn backfill_embeddings(
        &self,
        batch_size: usize,
        cancelled: impl Fn() -> bool,
    ) -> Result<usize> {
        let Some(embedder) = self.embedder.clone() else {
            return Ok(0);
        };
        let batch_size = batch_size.max(1);
        let mut updated = 0usize;
        let mut after_id = 0i64;

        loop {
            if cancelled() {
                break;
            }
            let batch: Vec<(i64, String)> = {
                let db = self.db.lock().unwrap();
                let mut stmt = db.prepare(
                    "SELECT id, content FROM memories
                     WHERE (embedding IS NULL OR embedding_dim = 0) AND id > ?1
                     ORDER BY id ASC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![after_id, batch_size as i64], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })?;
                rows.filter_map(|r| r.ok()).collect()
            };
            if batch.is_empty() {
                break;
            }

            for (id, content) in &batch {
                if cancelled() {
                    return Ok(updated);
                }
                let vec = embedder.embed(content).await?;
                write_embedding(&self.db, *id, &vec, embedder.model_name())?;
                updated += 1;
                after_id = *id;
            }
        }
        Ok(updated)
    }

    /// Total/active/archived row counts, for the gateway health surface.
    pub fn stats(&self) -> Result<MemoryStats> {
        let db = self.db.lock().unwrap();
        let total: i64 = db.query_row("SELECT count(*) FROM memories", [], |r| r.get(0))?;
        let archived: i64 =
            db.query_row("SELECT count(*) FROM memories WHERE is_archived = 1", [], |r| r.get(0))?;
        let tier1: i64 = db.query_row(
            "SELECT count(*) FROM memories WHERE tier = 1 AND is_archived = 0",
            [],
            |r| r.get(0),
        )?;
        let tier2: i64 = db.query_row(
            "SELECT count(*) FROM memories WHERE tier = 2 AND is_archived = 0",
            [],
            |r| r.get(0),
        )?;
        Ok(MemoryStats {
            total,
            archived,
            active_tier1: tier1,
            active_tier2: tier2,
        })
    }
}

impl MemoryEngine {
    /// Persist one extraction-buffer row (§4.6 `BufferMessage`).
    pub fn buffer_message(&self, channel: &str, sender_id: &str, role: &str, content: &str, token_count: f64) -> Result<i64> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO extraction_buffer (channel, sender_id, role, content, token_count, created_at)
             VALUES (?1,?2,?3,?4,?5,?6)",
            params![channel, sender_id, role, content, token_count, now_ms()],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Sum of `token_count` across all buffered rows.
    pub fn buffer_token_total(&self) -> Result<f64> {
        let db = self.db.lock().unwrap();
        db.query_row("SELECT COALESCE(SUM(token_count), 0) FROM extraction_buffer", [], |r| r.get(0))
            .map_err(MemoryError::from)
    }

    /// Drain up to `limit` buffer rows (oldest first), deleting them in the
    /// same transaction (§4.6 flush protocol step 1).
    pub fn drain_buffer(&self, limit: usize) -> Result<Vec<BufferMessage>> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        let rows: Vec<BufferMessage> = {
            let mut stmt = tx.prepare(
                "SELECT id, channel, sender_id, role, content, token_count, created_at
                 FROM extraction_buffer ORDER BY id ASC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], |row| {
                Ok(BufferMessage {
                    id: row.get(0)?,
                    channel: row.get(1)?,
                    sender_id: row.get(2)?,
                    role: row.get(3)?,
                    content: row.get(4)?,
                    token_count: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?;
            rows.filter_map(|r| r.ok()).collect()
        };
        if !rows.is_empty() {
            let ids: Vec<String> = rows.iter().map(|r| r.id.to_string()).collect();
            tx.execute(
                &format!("DELETE FROM extraction_buffer WHERE id IN ({})", ids.join(",")),
                [],
            )?;
        }
        tx.commit()?;
        Ok(rows)
    }

    /// Re-insert previously drained rows verbatim — the write-back
    /// recoverability path when the LLM extraction call fails (§4.6, §7).
    pub fn requeue_buffer(&self, rows: &[BufferMessage]) -> Result<()> {
        let db = self.db.lock().unwrap();
        for row in rows {
            db.execute(
                "INSERT INTO extraction_buffer (channel, sender_id, role, content, token_count, created_at)
                 VALUES (?1,?2,?3,?4,?5,?6)",
                params![row.channel, row.sender_id, row.role, row.content, row.token_count, row.created_at],
            )?;
        }
        Ok(())
    }

    /// Insert one tier-3 daily-event row.
    pub fn insert_event(&self, event_date: &str, channel: &str, sender_id: &str, summary: &str, raw_tokens: i64) -> Result<i64> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO daily_events (event_date, channel, sender_id, summary, raw_tokens, is_compressed, created_at)
             VALUES (?1,?2,?3,?4,?5,0,?6)",
            params![event_date, channel, sender_id, summary, raw_tokens, now_ms()],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Uncompressed events for one day, joined in creation order.
    pub fn uncompressed_events(&self, event_date: &str) -> Result<Vec<EventEntry>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, event_date, channel, sender_id, summary, raw_tokens, is_compressed, created_at
             FROM daily_events WHERE event_date = ?1 AND is_compressed = 0 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![event_date], row_to_event)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn mark_date_compressed(&self, event_date: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE daily_events SET is_compressed = 1 WHERE event_date = ?1",
            params![event_date],
        )?;
        Ok(())
    }

    /// Distinct `(project, topic)` partitions with an active-row count, over
    /// non-archived tier-2 rows (§4.7 weekly deep compression).
    pub fn tier2_partitions(&self) -> Result<Vec<(String, String, i64)>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT project, topic, count(*) FROM memories
             WHERE tier = 2 AND is_archived = 0 GROUP BY project, topic",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Up to `limit` active tier-2 rows for one `(project, topic)` partition.
    pub fn partition_entries(&self, project: &str, topic: &str, limit: usize) -> Result<Vec<Memory>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "{SELECT_MEMORY_SQL} WHERE tier = 2 AND is_archived = 0 AND project = ?1 AND topic = ?2 LIMIT ?3"
        ))?;
        let rows = stmt.query_map(params![project, topic, limit as i64], row_to_memory)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// `importance >= 0.7` tier-2 facts, most important first, for tier-1
    /// profile refresh (§4.7).
    pub fn high_importance_facts(&self, min_importance: f64, limit: usize) -> Result<Vec<Memory>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "{SELECT_MEMORY_SQL} WHERE tier = 2 AND is_archived = 0 AND importance >= ?1
             ORDER BY importance DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![min_importance, limit as i64], row_to_memory)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Non-archived tier-2 rows restricted to `temp`/`debug` categories, for
    /// `cleanupDecayed` (§4.7); scoring is done by the caller since it needs
    /// the retrieval module's `relevance_score`.
    pub fn decay_candidates(&self) -> Result<Vec<Memory>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "{SELECT_MEMORY_SQL} WHERE tier = 2 AND is_archived = 0 AND category IN ('temp', 'debug')"
        ))?;
        let rows = stmt.query_map([], row_to_memory)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventEntry> {
    Ok(EventEntry {
        id: row.get(0)?,
        event_date: row.get(1)?,
        channel: row.get(2)?,
        sender_id: row.get(3)?,
        summary: row.get(4)?,
        raw_tokens: row.get(5)?,
        is_compressed: row.get::<_, i64>(6)? != 0,
        created_at: row.get(7)?,
    })
}

#[derive(Debug, Clone)]
pub struct MemoryStats {
    pub total: i64,
    pub archived: i64,
    pub active_tier1: i64,
    pub active_tier2: i64,
}

fn write_embedding(db: &Arc<Mutex<Connection>>, id: i64, vector: &[f32], model: &str) -> Result<()> {
    let blob = vector::encode(vector);
    let db = db.lock().unwrap();
    db.execute(
        "UPDATE memories SET embedding = ?1, embedding_model = ?2, embedding_dim = ?3,
         embedding_updated_at = ?4 WHERE id = ?5",
        params![blob, model, vector.len() as i64, now_ms(), id],
    )?;
    Ok(())
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

const MEMORY_COLUMNS: &str = "memories.id, memories.tier, memories.project, memories.topic, \
    memories.category, memories.content, memories.importance, memories.source, \
    memories.created_at, memories.updated_at, memories.last_accessed, memories.access_count, \
    memories.is_archived, memories.embedding, memories.embedding_model, memories.embedding_dim";

const SELECT_MEMORY_SQL: &str = "SELECT memories.id, memories.tier, memories.project, memories.topic, \
    memories.category, memories.content, memories.importance, memories.source, \
    memories.created_at, memories.updated_at, memories.last_accessed, memories.access_count, \
    memories.is_archived, memories.embedding, memories.embedding_model, memories.embedding_dim \
    FROM memories";

const SELECT_MEMORY_SQL_BY_ID: &str = "SELECT id, tier, project, topic, category, content, \
    importance, source, created_at, updated_at, last_accessed, access_count, is_archived, \
    embedding, embedding_model, embedding_dim FROM memories WHERE id = ?1";

pub(crate) fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<Memory> {
    let tier_num: i64 = row.get(1)?;
    let cat_str: String = row.get(4)?;
    Ok(Memory {
        id: row.get(0)?,
        tier: if tier_num == 1 { Tier::Profile } else { Tier::Fact },
        project: row.get(2)?,
        topic: row.get(3)?,
        category: cat_str.parse().unwrap_or(MemoryCategory::Conversation),
        content: row.get(5)?,
        importance: row.get(6)?,
        source: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
        last_accessed: row.get(10)?,
        access_count: row.get(11)?,
        is_archived: row.get::<_, i64>(12)? != 0,
        embedding: row.get(13)?,
        embedding_model: row.get(14)?,
        embedding_dim: row.get(15)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;

    fn engine() -> MemoryEngine {
        let conn = schema::open(":memory:").unwrap();
        MemoryEngine::new(conn, None)
    }

    #[test]
    fn insert_without_embedder_persists_row() {
        let engine = engine();
        let id = engine
            .insert(NewMemory::tier2(MemoryCategory::Event, "hello", 0.5, "test"))
            .unwrap();
        let row = engine.get(id).unwrap().unwrap();
        assert_eq!(row.content, "hello");
        assert_eq!(row.embedding_dim, 0);
    }

    #[test]
    fn touch_increments_access_count_and_last_accessed() {
        let engine = engine();
        let id = engine
            .insert(NewMemory::tier2(MemoryCategory::Event, "hello", 0.5, "test"))
            .unwrap();
        engine.touch(id).unwrap();
        engine.touch(id).unwrap();
        let row = engine.get(id).unwrap().unwrap();
        assert_eq!(row.access_count, 2);
    }

    #[test]
    fn archive_never_deletes_row() {
        let engine = engine();
        let id = engine
            .insert(NewMemory::tier2(MemoryCategory::Event, "hello", 0.5, "test"))
            .unwrap();
        engine.archive(id).unwrap();
        let row = engine.get(id).unwrap().unwrap();
        assert!(row.is_archived);
    }

    #[test]
    fn fts_search_finds_inserted_content() {
        let engine = engine();
        engine
            .insert(NewMemory::tier2(
                MemoryCategory::Decision,
                "hotfix hotfix hotfix retrieval winner",
                0.9,
                "test",
            ))
            .unwrap();
        let hits = engine.fts_search("\"hotfix\"", 10).unwrap();
        assert_eq!(hits.len(), 1);
    }
}
