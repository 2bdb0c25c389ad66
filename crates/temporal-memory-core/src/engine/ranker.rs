// ── Engine: Ranker ─────────────────────────────────────────────────────────
//
// Composite ranking: `score = w_sim·sim_norm + w_conf·confidence +
// w_recency·recency + w_freq·frequency`. Recency decays exponentially by
// half-life; frequency is log-scaled and capped. Stable sort, ties broken by
// `learned_at` descending.
//
// NDCG/average-relevancy grounded on the donor's
// `engram/retrieval_quality.rs::compute_ndcg` (composite score stands in for
// the donor's trust-score composite).

use chrono::{DateTime, Utc};

use crate::atoms::config::EngineConfig;
use crate::atoms::types::{RankedMemory, RetrievalQualityMetrics, ScoredMemory};

pub struct Ranker<'a> {
    config: &'a EngineConfig,
}

impl<'a> Ranker<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Rank `candidates` by composite score, descending, ties broken by
    /// `learned_at` descending (most recently learned wins).
    pub fn rank(&self, candidates: Vec<ScoredMemory>, now: DateTime<Utc>) -> Vec<RankedMemory> {
        let mut ranked: Vec<RankedMemory> = candidates
            .into_iter()
            .map(|c| {
                // Graph-only hits have no vector similarity (they were never
                // scored against the query embedding); 0.5 is a neutral
                // substitute rather than penalizing or favoring them.
                let sim_norm = c.vector_similarity.map(|s| s.clamp(0.0, 1.0)).unwrap_or(0.5);
                let recency = recency_score(c.memory.last_accessed.unwrap_or(c.memory.learned_at), now, self.config.half_life_days);
                let frequency = frequency_score(c.memory.access_count, self.config.freq_cap);
                let w = &self.config.ranker_weights;
                let composite = w.sim * sim_norm
                    + w.confidence * c.memory.confidence
                    + w.recency * recency
                    + w.frequency * frequency;

                RankedMemory {
                    memory: c.memory,
                    vector_similarity: c.vector_similarity,
                    bm25_score: c.bm25_score,
                    rrf_score: c.rrf_score,
                    composite_score: composite,
                }
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.composite_score
                .partial_cmp(&a.composite_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.memory.learned_at.cmp(&a.memory.learned_at))
        });

        ranked
    }

    /// Build quality telemetry for a ranked, budget-trimmed result set.
    pub fn quality_metrics(
        &self,
        packed: &[RankedMemory],
        candidates_before_filter: usize,
        candidates_after_filter: usize,
        tokens_consumed: usize,
        search_latency_ms: u64,
    ) -> RetrievalQualityMetrics {
        RetrievalQualityMetrics {
            ndcg: compute_ndcg(packed),
            average_relevancy: compute_average_relevancy(packed),
            candidates_before_filter,
            candidates_after_filter,
            memories_packed: packed.len(),
            tokens_consumed,
            search_latency_ms,
        }
    }
}

/// Exponential half-life decay: `2^(-age_days / half_life_days)`.
fn recency_score(at: DateTime<Utc>, now: DateTime<Utc>, half_life_days: f32) -> f32 {
    let age_days = (now - at).num_seconds().max(0) as f32 / 86_400.0;
    2.0_f32.powf(-age_days / half_life_days)
}

/// Log-scaled access frequency, capped at `cap` accesses.
fn frequency_score(access_count: u32, cap: f32) -> f32 {
    let capped = (access_count as f32).min(cap);
    (1.0 + capped).ln() / (1.0 + cap).ln()
}

/// NDCG using each memory's composite score as its relevance grade.
fn compute_ndcg(memories: &[RankedMemory]) -> f64 {
    if memories.is_empty() {
        return 0.0;
    }
    let dcg: f64 = memories
        .iter()
        .enumerate()
        .map(|(i, m)| m.composite_score as f64 / (i as f64 + 2.0).log2())
        .sum();

    let mut ideal: Vec<f64> = memories.iter().map(|m| m.composite_score as f64).collect();
    ideal.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    let idcg: f64 = ideal.iter().enumerate().map(|(i, &rel)| rel / (i as f64 + 2.0).log2()).sum();

    if idcg == 0.0 {
        0.0
    } else {
        (dcg / idcg).clamp(0.0, 1.0)
    }
}

fn compute_average_relevancy(memories: &[RankedMemory]) -> f64 {
    if memories.is_empty() {
        return 0.0;
    }
    memories.iter().map(|m| m.composite_score as f64).sum::<f64>() / memories.len() as f64
}
