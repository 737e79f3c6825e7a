//! Classic and enhanced hybrid retrieval (§4.5).
//!
//! Retrieval never surfaces errors to the caller: any stage failure in the
//! enhanced path falls back to classic, and a classic failure returns an
//! empty result set (§4.5 "Failure policy", §7).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use regex::Regex;
use tracing::warn;

use crate::embedder::{Embedder, QueryExpander, Reranker};
use crate::manager::MemoryEngine;
use crate::types::{Memory, MemoryCategory};
use crate::vector;

/// Retrieval strategy (§4.5); unknown config values normalize to `Classic`
/// in `myclaw-core::config::RetrievalMode` before reaching this module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Classic,
    Enhanced,
}

pub struct RetrievalConfig {
    pub mode: Mode,
    pub candidate_limit: usize,
    pub rerank_limit: usize,
    pub known_projects: Vec<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Classic,
            candidate_limit: 40,
            rerank_limit: 20,
            known_projects: Vec::new(),
        }
    }
}

pub struct RetrievalEngine {
    memory: Arc<MemoryEngine>,
    config: RetrievalConfig,
    embedder: Option<Arc<dyn Embedder>>,
    reranker: Option<Arc<dyn Reranker>>,
    expander: Option<Arc<dyn QueryExpander>>,
}

const MAX_RESULTS: usize = 5;

impl RetrievalEngine {
    pub fn new(
        memory: Arc<MemoryEngine>,
        config: RetrievalConfig,
        embedder: Option<Arc<dyn Embedder>>,
        reranker: Option<Arc<dyn Reranker>>,
        expander: Option<Arc<dyn QueryExpander>>,
    ) -> Self {
        Self {
            memory,
            config,
            embedder,
            reranker,
            expander,
        }
    }

    /// Up to 5 memories relevant to `query`. Never returns `Err` — a
    /// failing stage degrades to classic, a failing classic path returns
    /// an empty vector (§4.5, §7).
    pub async fn retrieve(&self, query: &str) -> Vec<Memory> {
        let project = detect_project(query, &self.config.known_projects);
        let keywords = extract_keywords(query);

        let result = match self.config.mode {
            Mode::Classic => self.classic(query, project.as_deref(), &keywords).await,
            Mode::Enhanced => match self.enhanced(query, project.as_deref(), &keywords).await {
                Ok(rows) if !rows.is_empty() => Ok(rows),
                Ok(_) => self.classic(query, project.as_deref(), &keywords).await,
                Err(e) => {
                    warn!(error = %e, "enhanced retrieval failed, falling back to classic");
                    self.classic(query, project.as_deref(), &keywords).await
                }
            },
        };

        let rows = result.unwrap_or_default();
        for row in &rows {
            if let Err(e) = self.memory.touch(row.id) {
                warn!(memory_id = row.id, error = %e, "failed to touch retrieved memory");
            }
        }
        rows
    }

    async fn classic(
        &self,
        query: &str,
        project: Option<&str>,
        keywords: &[String],
    ) -> anyhow::Result<Vec<Memory>> {
        let mut base = self.memory.base_candidates(project, 20)?;

        if base.len() < MAX_RESULTS && !keywords.is_empty() {
            let matches = self.fts_stage(query, keywords).await?;
            base.extend(matches);
        }

        let now = crate::manager::now_ms();
        let mut seen = HashSet::new();
        let mut deduped: Vec<Memory> = Vec::new();
        for m in base {
            if seen.insert(m.id) {
                deduped.push(m);
            }
        }
        deduped.sort_by(|a, b| {
            let sa = relevance_score(a, days_since(a.last_accessed, now));
            let sb = relevance_score(b, days_since(b.last_accessed, now));
            sb.partial_cmp(&sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.importance.partial_cmp(&a.importance).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| a.id.cmp(&b.id))
        });
        deduped.truncate(MAX_RESULTS);
        Ok(deduped)
    }

    /// FTS stage with strong-signal short-circuit (§4.5 classic step 2).
    async fn fts_stage(&self, query: &str, keywords: &[String]) -> anyhow::Result<Vec<Memory>> {
        let fts_query = build_fts_query(keywords);
        let hits = self.memory.fts_search(&fts_query, 10)?;
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let normalized = normalize_bm25(&hits);
        if is_strong_signal(&normalized) {
            // Strong signal: the query expander is NOT consulted (§8).
            return Ok(hits.into_iter().map(|(m, _)| m).collect());
        }

        let Some(expander) = &self.expander else {
            return Ok(hits.into_iter().map(|(m, _)| m).collect());
        };
        let expansion = expander.expand(query).await.unwrap_or_default();
        let mut merged: Vec<String> = keywords.to_vec();
        for tok in expansion {
            if merged.len() >= 16 {
                break;
            }
            if !merged.contains(&tok) {
                merged.push(tok);
            }
        }
        let expanded_query = build_fts_query(&merged);
        let more = self.memory.fts_search(&expanded_query, 10)?;
        Ok(more.into_iter().map(|(m, _)| m).collect())
    }

    async fn enhanced(
        &self,
        query: &str,
        project: Option<&str>,
        keywords: &[String],
    ) -> anyhow::Result<Vec<Memory>> {
        let mut lists: Vec<(Vec<Memory>, f64)> = Vec::new();

        if !keywords.is_empty() {
            let fts_query = build_fts_query(keywords);
            let hits = self
                .memory
                .fts_search(&fts_query, self.config.candidate_limit)?;
            lists.push((hits.into_iter().map(|(m, _)| m).collect(), 2.0));
        }

        let expansion_tokens = if let Some(expander) = &self.expander {
            expander.expand(query).await.unwrap_or_default()
        } else {
            Vec::new()
        };
        if !expansion_tokens.is_empty() {
            let exp_query = build_fts_query(&expansion_tokens);
            let hits = self
                .memory
                .fts_search(&exp_query, self.config.candidate_limit)?;
            lists.push((hits.into_iter().map(|(m, _)| m).collect(), 1.0));
        }

        if let Some(embedder) = &self.embedder {
            if let Ok(qvec) = embedder.embed(query).await {
                let hits = self.vector_search(&qvec, project)?;
                lists.push((hits, 2.0));
            }
            if !expansion_tokens.is_empty() {
                let joined = expansion_tokens.join(" ");
                if let Ok(qvec) = embedder.embed(&joined).await {
                    let hits = self.vector_search(&qvec, project)?;
                    lists.push((hits, 1.0));
                }
            }
        }

        if lists.is_empty() {
            return Ok(Vec::new());
        }

        let fused = reciprocal_rank_fusion(&lists);
        if fused.is_empty() {
            return Ok(Vec::new());
        }

        let mut ordered: Vec<(Memory, f64)> = fused.into_values().collect();
        ordered.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let rerank_scores = if let Some(reranker) = &self.reranker {
            let top_n = ordered.len().min(self.config.rerank_limit);
            let docs: Vec<String> = ordered[..top_n].iter().map(|(m, _)| m.content.clone()).collect();
            match reranker.rerank(query, &docs).await {
                Ok(scores) => {
                    let mut map = HashMap::new();
                    for ((m, _), score) in ordered[..top_n].iter().zip(scores) {
                        map.insert(m.id, score);
                    }
                    Some(map)
                }
                Err(e) => {
                    warn!(error = %e, "reranker call failed, continuing without it");
                    None
                }
            }
        } else {
            None
        };

        let mut finalized: Vec<FinalCandidate> = ordered
            .into_iter()
            .enumerate()
            .map(|(idx, (mem, rrf))| {
                let rerank = rerank_scores.as_ref().and_then(|m| m.get(&mem.id)).copied();
                let has_rerank = rerank.is_some();
                let final_score = match rerank {
                    Some(rk) => {
                        let (w_r, w_k) = blend_weights(idx + 1);
                        rrf * w_r + (rk as f64) * w_k
                    }
                    None => rrf,
                };
                FinalCandidate {
                    memory: mem,
                    rrf,
                    rerank: rerank.unwrap_or(0.0),
                    has_rerank,
                    final_score,
                }
            })
            .collect();

        finalized.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.rrf.partial_cmp(&a.rrf).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| b.rerank.partial_cmp(&a.rerank).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| b.has_rerank.cmp(&a.has_rerank))
                .then_with(|| b.memory.importance.partial_cmp(&a.memory.importance).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| a.memory.id.cmp(&b.memory.id))
        });

        finalized.truncate(MAX_RESULTS);
        Ok(finalized.into_iter().map(|c| c.memory).collect())
    }

    fn vector_search(&self, query_vec: &[f32], project: Option<&str>) -> anyhow::Result<Vec<Memory>> {
        let candidates = self.memory.embedded_candidates(project)?;
        let mut scored: Vec<(Memory, f32)> = candidates
            .into_iter()
            .filter_map(|(mem, vec)| vector::cosine_similarity(query_vec, &vec).ok().map(|s| (mem, s)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.config.candidate_limit);
        Ok(scored.into_iter().map(|(m, _)| m).collect())
    }
}

struct FinalCandidate {
    memory: Memory,
    rrf: f64,
    rerank: f32,
    has_rerank: bool,
    final_score: f64,
}

/// Reciprocal Rank Fusion across ranked lists with per-list weight
/// `w`: `score += w / (60 + rank)`, plus rank-1/2-3 bonuses (§4.5 step 5).
fn reciprocal_rank_fusion(lists: &[(Vec<Memory>, f64)]) -> HashMap<i64, (Memory, f64)> {
    let mut scores: HashMap<i64, (Memory, f64)> = HashMap::new();
    for (list, weight) in lists {
        for (idx, mem) in list.iter().enumerate() {
            let rank = idx + 1;
            let mut score = weight / (60.0 + rank as f64);
            if rank == 1 {
                score += 0.05 * weight;
            } else if rank == 2 || rank == 3 {
                score += 0.02 * weight;
            }
            scores
                .entry(mem.id)
                .and_modify(|(_, s)| *s += score)
                .or_insert_with(|| (mem.clone(), score));
        }
    }
    scores
}

/// Blend weights `(rrf, rerank)` by fused-order position (§4.5 step 7).
fn blend_weights(position: usize) -> (f64, f64) {
    match position {
        1..=3 => (0.75, 0.25),
        4..=10 => (0.60, 0.40),
        _ => (0.40, 0.60),
    }
}

/// Time-decayed relevance score by category (§4.5 table).
pub fn relevance_score(memory: &Memory, days_since_access: f64) -> f64 {
    use MemoryCategory::*;
    match memory.category {
        Identity | Config | Credential => memory.importance,
        Decision | Solution => memory.importance * (0.3 + 0.7 * (-0.004 * days_since_access).exp()),
        Event | Conversation => memory.importance * (0.1 + 0.9 * (-0.023 * days_since_access).exp()),
        Temp | Debug => memory.importance * (-0.099 * days_since_access).exp(),
    }
}

pub(crate) fn days_since(last_accessed_ms: i64, now_ms: i64) -> f64 {
    ((now_ms - last_accessed_ms).max(0) as f64) / 86_400_000.0
}

/// Min-max normalize BM25 scores so the best becomes ~1: `1 - (score - min)
/// / (max - min)`. SQLite FTS5's `bm25()` is unbounded and *lower is
/// better*, hence the inversion (§9 "Strong signal detection on BM25").
fn normalize_bm25(hits: &[(Memory, f64)]) -> Vec<f64> {
    if hits.is_empty() {
        return Vec::new();
    }
    let min = hits.iter().map(|(_, s)| *s).fold(f64::INFINITY, f64::min);
    let max = hits.iter().map(|(_, s)| *s).fold(f64::NEG_INFINITY, f64::max);
    if (max - min).abs() < f64::EPSILON {
        return vec![1.0; hits.len()];
    }
    hits.iter().map(|(_, s)| 1.0 - (*s - min) / (max - min)).collect()
}

const STRONG_SIGNAL_TOP: f64 = 0.85;
const STRONG_SIGNAL_GAP: f64 = 0.15;

fn is_strong_signal(normalized: &[f64]) -> bool {
    if normalized.is_empty() {
        return false;
    }
    let top = normalized[0];
    let second = normalized.get(1).copied().unwrap_or(0.0);
    top >= STRONG_SIGNAL_TOP && (top - second) >= STRONG_SIGNAL_GAP
}

/// Reserved FTS5 keywords elided from any constructed query, case-insensitive.
const RESERVED_TOKENS: [&str; 4] = ["and", "or", "not", "near"];

/// Build a sanitized FTS5 `MATCH` query: quote each token, OR-join, cap 16,
/// strip metacharacters, drop reserved words (§4.5, §8, §9).
pub fn build_fts_query(tokens: &[String]) -> String {
    let mut seen = HashSet::new();
    let parts: Vec<String> = tokens
        .iter()
        .map(|t| sanitize_token(t))
        .filter(|t| !t.is_empty() && !RESERVED_TOKENS.contains(&t.as_str()))
        .filter(|t| seen.insert(t.clone()))
        .take(16)
        .map(|t| format!("\"{t}\""))
        .collect();
    parts.join(" OR ")
}

fn sanitize_token(token: &str) -> String {
    token
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '*' | '(' | ')' | ':' | '"'))
        .collect()
}

/// Match `{Han,2+}` runs and `[A-Za-z][A-Za-z0-9_-]{2+}` runs over lowercased
/// text, deduplicated, capped at 8 (§4.5).
pub fn extract_keywords(query: &str) -> Vec<String> {
    let lower = query.to_lowercase();
    let han_re = Regex::new(r"\p{Han}{2,}").unwrap();
    let latin_re = Regex::new(r"[a-z][a-z0-9_-]{2,}").unwrap();

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for m in han_re.find_iter(&lower).chain(latin_re.find_iter(&lower)) {
        let tok = m.as_str().to_string();
        if seen.insert(tok.clone()) {
            out.push(tok);
        }
        if out.len() >= 8 {
            break;
        }
    }
    out
}

/// First known project name found via case-insensitive substring match
/// (§4.5 "Project detection").
pub fn detect_project(query: &str, known_projects: &[String]) -> Option<String> {
    let lower = query.to_lowercase();
    known_projects
        .iter()
        .find(|p| lower.contains(&p.to_lowercase()))
        .cloned()
}

const CODE_FENCE: &str = "```";

/// Advisory precondition gate applied by the orchestrator before calling
/// `retrieve` (§4.5).
pub fn should_retrieve(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.chars().count() < 5 {
        return false;
    }
    if is_code_heavy(trimmed) {
        return false;
    }
    if is_bare_ack(trimmed) {
        return false;
    }
    contains_trigger_marker(trimmed)
}

fn is_code_heavy(text: &str) -> bool {
    if text.contains(CODE_FENCE) {
        return true;
    }
    let structural_punct = text
        .chars()
        .filter(|c| matches!(c, '{' | '}' | ';' | '(' | ')' | '[' | ']' | '<' | '>' | '='))
        .count();
    let newlines = text.matches('\n').count();
    structural_punct >= 8 && newlines >= 2
}

const BARE_ACKS: [&str; 6] = ["ok", "yes", "no", "好的", "继续", "确认"];

fn is_bare_ack(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    BARE_ACKS.contains(&lower.as_str())
}

const TRIGGER_MARKERS_EN: [&str; 10] = [
    "what", "why", "how", "when", "where", "who", "which", "remember", "recall", "previous",
];
const TRIGGER_MARKERS_ZH: [&str; 8] = [
    "什么", "为什么", "怎么", "如何", "记得", "之前", "上次", "谁",
];

fn contains_trigger_marker(text: &str) -> bool {
    let lower = text.to_lowercase();
    TRIGGER_MARKERS_EN.iter().any(|m| lower.contains(m))
        || TRIGGER_MARKERS_ZH.iter().any(|m| text.contains(m))
        || lower.contains('?')
        || text.contains('?')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_match_han_and_latin_runs() {
        let kws = extract_keywords("hotfix 检索问题怎么修");
        assert!(kws.contains(&"hotfix".to_string()));
        assert!(kws.iter().any(|k| k.contains('检')));
    }

    #[test]
    fn fts_query_strips_metacharacters_and_reserved_words() {
        let tokens = vec!["and".to_string(), "fo:o*".to_string(), "bar".to_string()];
        let q = build_fts_query(&tokens);
        assert!(!q.contains('*'));
        assert!(!q.contains(':'));
        assert!(!q.to_lowercase().split(" or ").any(|t| t.trim_matches('"') == "and"));
    }

    #[test]
    fn should_retrieve_rejects_short_input() {
        assert!(!should_retrieve("hi"));
    }

    #[test]
    fn should_retrieve_rejects_bare_ack() {
        assert!(!should_retrieve("ok"));
        assert!(!should_retrieve("好的"));
    }

    #[test]
    fn should_retrieve_rejects_code_heavy() {
        let code = "```\nfn main() {}\n```";
        assert!(!should_retrieve(code));
    }

    #[test]
    fn should_retrieve_accepts_question() {
        assert!(should_retrieve("what did I say about the hotfix?"));
    }

    #[test]
    fn strong_signal_requires_top_and_gap() {
        assert!(is_strong_signal(&[0.9, 0.5]));
        assert!(!is_strong_signal(&[0.9, 0.8]));
        assert!(!is_strong_signal(&[0.7, 0.1]));
    }

    #[test]
    fn project_detection_is_case_insensitive() {
        let projects = vec!["MyClaw".to_string()];
        assert_eq!(detect_project("issue in myclaw today", &projects), Some("MyClaw".to_string()));
    }

    #[test]
    fn relevance_score_no_decay_for_identity() {
        let mem = Memory {
            id: 1,
            tier: crate::types::Tier::Fact,
            project: "_global".into(),
            topic: "_general".into(),
            category: MemoryCategory::Identity,
            content: String::new(),
            importance: 0.8,
            source: String::new(),
            created_at: 0,
            updated_at: 0,
            last_accessed: 0,
            access_count: 0,
            is_archived: false,
            embedding: None,
            embedding_model: None,
            embedding_dim: 0,
        };
        assert_eq!(relevance_score(&mem, 1000.0), 0.8);
    }
}
