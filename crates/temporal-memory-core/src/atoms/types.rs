// ── Atoms: Core Data Types ──────────────────────────────────────────────────
// The single first-class `Memory` entity and its satellite types. Pure data,
// no I/O — mirrors the donor's `engram_types.rs` layering (atoms may only
// depend on std and external pure crates).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════
// Memory
// ═══════════════════════════════════════════════════════════════════════════

/// A bi-temporal memory: the single first-class entity of the engine.
///
/// Tracks both when a fact held in the world (`valid_from`/`valid_until`) and
/// when the engine learned it (`learned_at`). Never physically deleted; a
/// "forgotten" memory is just one whose `tier` is `Archived`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Globally unique, immutable, content-independent identifier.
    pub memory_id: String,
    /// The textual claim, as written by the extractor. Never mutated.
    pub content: String,
    /// Free-form label emitted by the extractor (domain + aspect + kind,
    /// lowercase snake_case). Not drawn from a closed set.
    pub memory_type: String,
    /// Calibrated belief in [0, 1]. Never mutated after insert.
    pub confidence: f32,
    /// Fixed-length dense vector, nullable until backfilled. Never changes
    /// once set; a change of content requires a new memory.
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    /// Timestamp at which the fact is believed to have become true.
    pub valid_from: DateTime<Utc>,
    /// Timestamp at which the fact stopped being true, or `None` if current.
    pub valid_until: Option<DateTime<Utc>>,
    /// Timestamp at which the fact was ingested. Immutable once set.
    pub learned_at: DateTime<Utc>,
    /// Foreign reference to the memory that replaced this one.
    pub superseded_by: Option<String>,
    /// Foreign reference to the memory this one replaced.
    pub supersedes: Option<String>,
    /// Coarse lifecycle bucket.
    pub tier: Tier,
    /// Updated on retrieval.
    pub last_accessed: Option<DateTime<Utc>>,
    /// Monotonically non-decreasing.
    pub access_count: u32,
    /// Opaque provenance handle.
    pub source_conversation_id: Option<String>,
    /// Cached token count at the configured tokenizer, filled on first
    /// computation by the BudgetManager.
    pub token_count_cache: Option<usize>,
}

impl Memory {
    /// A memory is currently valid iff its validity interval is still open.
    pub fn is_currently_valid(&self) -> bool {
        self.valid_until.is_none()
    }

    /// Whether this memory's `[valid_from, valid_until)` interval contains `t`.
    pub fn valid_at(&self, t: DateTime<Utc>) -> bool {
        self.valid_from <= t && self.valid_until.map(|u| u > t).unwrap_or(true)
    }

    /// First two whitespace-separated tokens of `memory_type`, used by
    /// TemporalManager/StorageService to scope contradiction search.
    pub fn type_prefix(&self) -> String {
        memory_type_prefix(&self.memory_type)
    }
}

/// First two tokens of a normalized type label, joined by `_`.
pub fn memory_type_prefix(memory_type: &str) -> String {
    memory_type
        .split('_')
        .take(2)
        .collect::<Vec<_>>()
        .join("_")
}

/// Coarse lifecycle bucket governing visibility to retrieval by policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    ShortTerm,
    LongTerm,
    Archived,
}

impl Default for Tier {
    fn default() -> Self {
        Tier::ShortTerm
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::ShortTerm => write!(f, "short_term"),
            Tier::LongTerm => write!(f, "long_term"),
            Tier::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "short_term" => Ok(Tier::ShortTerm),
            "long_term" => Ok(Tier::LongTerm),
            "archived" => Ok(Tier::Archived),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Graph edges
// ═══════════════════════════════════════════════════════════════════════════

/// Edge type in the memory graph. Trimmed to the two kinds the spec
/// actually requires for traversal and superseding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    /// `(new) -[SUPERSEDES]-> (old)` — authoritative; must agree with the
    /// scalar `superseded_by`/`supersedes` pointers on `Memory`.
    Supersedes,
    /// Generic relation used to seed bounded graph expansion in the Retriever.
    RelatedTo,
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeType::Supersedes => write!(f, "supersedes"),
            EdgeType::RelatedTo => write!(f, "related_to"),
        }
    }
}

impl std::str::FromStr for EdgeType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "supersedes" => Ok(EdgeType::Supersedes),
            "related_to" => Ok(EdgeType::RelatedTo),
            other => Err(format!("unknown edge type: {other}")),
        }
    }
}

/// A directed edge connecting two memories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEdge {
    pub source_id: String,
    pub target_id: String,
    pub edge_type: EdgeType,
    pub weight: f32,
    pub created_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Retrieval types
// ═══════════════════════════════════════════════════════════════════════════

/// A memory annotated with the per-source scores the Retriever collected,
/// before RRF fusion. Ranks are 1-indexed within their source; `None` means
/// the sub-query didn't return this memory.
#[derive(Debug, Clone)]
pub struct ScoredMemory {
    pub memory: Memory,
    pub vector_similarity: Option<f32>,
    pub vector_rank: Option<usize>,
    pub bm25_score: Option<f32>,
    pub bm25_rank: Option<usize>,
    pub graph_rank: Option<usize>,
    pub rrf_score: f32,
}

/// A memory after the Ranker's composite scoring pass.
#[derive(Debug, Clone)]
pub struct RankedMemory {
    pub memory: Memory,
    pub vector_similarity: Option<f32>,
    pub bm25_score: Option<f32>,
    pub rrf_score: f32,
    pub composite_score: f32,
}

/// A single item in the final context returned by `Retrieve`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormattedMemory {
    pub memory_id: String,
    pub content: String,
    pub memory_type: String,
    pub confidence: f32,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub composite_score: f32,
    pub source_conversation_id: Option<String>,
    pub token_cost: usize,
}

/// Quality telemetry accompanying a `Retrieve` call (supplemental, §SPEC_FULL §3).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RetrievalQualityMetrics {
    pub ndcg: f64,
    pub average_relevancy: f64,
    pub candidates_before_filter: usize,
    pub candidates_after_filter: usize,
    pub memories_packed: usize,
    pub tokens_consumed: usize,
    pub search_latency_ms: u64,
}

/// Result of `Retrieve`: the formatted, budget-trimmed context plus quality
/// telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveResult {
    pub memories: Vec<FormattedMemory>,
    pub quality: RetrievalQualityMetrics,
}

/// Optional filter applied by the Store to `vector_search`/`bm25_search`.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub type_prefix: Option<String>,
    pub currently_valid_only: bool,
    pub min_confidence: Option<f32>,
    pub at_time: Option<DateTime<Utc>>,
}

/// A candidate memory emitted by the Extractor, not yet a `Memory`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateMemory {
    pub memory_type: String,
    pub content: String,
    pub confidence: f32,
    pub rationale: String,
    /// Extractor-supplied event time, if the statement carries one.
    pub event_time: Option<DateTime<Utc>>,
    /// Set when the extractor tags this as an explicit correction — bypasses
    /// the similarity threshold in contradiction detection (still requires
    /// same type prefix).
    pub is_correction: bool,
}

/// An ordered conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Summary returned by `IngestConversation`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IngestSummary {
    pub extracted_n: usize,
    pub superseded_n: usize,
}

/// Budget trimming strategy (`BudgetManager`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStrategy {
    HardCutoff,
    Truncate,
}

impl Default for BudgetStrategy {
    fn default() -> Self {
        BudgetStrategy::HardCutoff
    }
}

/// Options accepted by `Retriever::retrieve`.
#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    pub expand: bool,
    pub at_time: Option<DateTime<Utc>>,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self {
            expand: true,
            at_time: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_prefix_takes_first_two_tokens() {
        assert_eq!(
            memory_type_prefix("proxmox_cluster_node_configuration"),
            "proxmox_cluster"
        );
        assert_eq!(memory_type_prefix("single"), "single");
    }

    #[test]
    fn currently_valid_iff_no_valid_until() {
        let now = Utc::now();
        let mut m = Memory {
            memory_id: "a".into(),
            content: "c".into(),
            memory_type: "t".into(),
            confidence: 0.9,
            embedding: None,
            valid_from: now,
            valid_until: None,
            learned_at: now,
            superseded_by: None,
            supersedes: None,
            tier: Tier::ShortTerm,
            last_accessed: None,
            access_count: 0,
            source_conversation_id: None,
            token_count_cache: None,
        };
        assert!(m.is_currently_valid());
        m.valid_until = Some(now);
        assert!(!m.is_currently_valid());
    }

    #[test]
    fn tier_round_trips_through_string() {
        for t in [Tier::ShortTerm, Tier::LongTerm, Tier::Archived] {
            let s = t.to_string();
            assert_eq!(s.parse::<Tier>().unwrap(), t);
        }
    }
}
