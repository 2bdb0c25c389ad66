// ── Atoms: Engine Configuration ─────────────────────────────────────────────
// Centralized config struct carrying every option in the spec's "external
// interfaces" configuration surface, with a `Default` impl holding the
// nominal values. The only process-wide state besides this is the store
// handle and the model clients — all constructed once and injected.

use serde::{Deserialize, Serialize};

use crate::atoms::types::BudgetStrategy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // ── Extraction ──────────────────────────────────────────────────────
    /// Discard extractor candidates below this confidence.
    pub min_extraction_confidence: f32,

    // ── Retrieval filtering ─────────────────────────────────────────────
    /// Filter retrieved memories below this confidence.
    pub min_retrieval_confidence: f32,
    /// Cosine threshold to treat two same-type memories as contradicting.
    pub contradict_sim_threshold: f32,
    /// Cosine threshold for near-duplicate removal.
    pub dedup_threshold: f32,

    // ── Result shaping ──────────────────────────────────────────────────
    pub top_k: usize,
    /// Retriever overfetch multiplier before Deduplicator/Ranker/BudgetManager run.
    pub overfetch: usize,
    pub budget_tokens: usize,
    pub budget_strategy: BudgetStrategy,
    /// Tokens reserved for formatting overhead, subtracted from `budget_tokens`.
    pub budget_formatting_overhead: usize,

    // ── Fusion parameters ───────────────────────────────────────────────
    pub rrf_k: f64,
    pub w_vec: f64,
    pub w_bm25: f64,
    pub w_graph: f64,
    pub graph_max_hops: usize,
    pub graph_seed_count: usize,

    // ── Ranker weights (sim, confidence, recency, frequency) ────────────
    pub ranker_weights: RankerWeights,
    pub half_life_days: f32,
    pub freq_cap: f32,

    // ── Backfill ─────────────────────────────────────────────────────
    pub backfill_interval_secs: u64,
    pub backfill_batch: usize,

    // ── Concurrency ──────────────────────────────────────────────────
    pub max_concurrent: usize,
    pub access_tracker_queue_capacity: usize,
    pub extraction_queue_capacity: usize,

    // ── Conversation boundary ───────────────────────────────────────────
    pub t_idle_secs: u64,

    // ── Tier transition (AdminTierTransition) ───────────────────────────
    pub promote_threshold: f32,
    pub archive_threshold: f32,

    // ── Embedding ────────────────────────────────────────────────────
    pub embedding_dims: usize,
    pub embedding_base_url: String,
    pub embedding_model: String,
    pub extraction_base_url: String,
    pub extraction_model: String,
}

/// Four-tuple composite-score weights (`score = w_sim·sim + w_conf·conf +
/// w_recency·recency + w_freq·freq`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RankerWeights {
    pub sim: f32,
    pub confidence: f32,
    pub recency: f32,
    pub frequency: f32,
}

impl Default for RankerWeights {
    fn default() -> Self {
        Self {
            sim: 0.40,
            confidence: 0.25,
            recency: 0.20,
            frequency: 0.15,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_extraction_confidence: 0.6,
            min_retrieval_confidence: 0.4,
            contradict_sim_threshold: 0.85,
            dedup_threshold: 0.92,
            top_k: 10,
            overfetch: 3,
            budget_tokens: 2000,
            budget_strategy: BudgetStrategy::HardCutoff,
            budget_formatting_overhead: 50,
            rrf_k: 60.0,
            w_vec: 1.0,
            w_bm25: 0.8,
            w_graph: 0.6,
            graph_max_hops: 2,
            graph_seed_count: 10,
            ranker_weights: RankerWeights::default(),
            half_life_days: 43.0,
            freq_cap: 100.0,
            backfill_interval_secs: 60,
            backfill_batch: 50,
            max_concurrent: 50,
            access_tracker_queue_capacity: 256,
            extraction_queue_capacity: 64,
            t_idle_secs: 600,
            promote_threshold: 0.7,
            archive_threshold: 0.2,
            embedding_dims: 768,
            embedding_base_url: "http://localhost:11434".into(),
            embedding_model: "nomic-embed-text".into(),
            extraction_base_url: "http://localhost:11434".into(),
            extraction_model: "llama3.1".into(),
        }
    }
}
