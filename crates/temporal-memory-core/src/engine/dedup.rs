// ── Engine: Deduplicator ──────────────────────────────────────────────────
//
// Removes exact duplicates, near-duplicates (cosine >= dedup_threshold), and
// superseded memories from a fused candidate set before ranking. O(n²)
// pairwise comparison, acceptable at n<=50 — same tradeoff the donor's MMR
// reranker makes (`engram/reranking.rs`: "O(n²) but n ≤ 50").

use crate::atoms::config::EngineConfig;
use crate::atoms::types::ScoredMemory;
use crate::engine::store::cosine_similarity;

pub struct Deduplicator<'a> {
    config: &'a EngineConfig,
}

impl<'a> Deduplicator<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Drop superseded memories, then exact and near-duplicates, keeping the
    /// highest-confidence member of each duplicate pair. Input order is not
    /// assumed to be sorted; output preserves relative input order among
    /// survivors.
    pub fn dedup(&self, candidates: Vec<ScoredMemory>) -> Vec<ScoredMemory> {
        let candidates: Vec<ScoredMemory> =
            candidates.into_iter().filter(|c| c.memory.superseded_by.is_none()).collect();

        let n = candidates.len();
        let mut dropped = vec![false; n];

        for i in 0..n {
            if dropped[i] {
                continue;
            }
            for j in (i + 1)..n {
                if dropped[j] {
                    continue;
                }
                if self.is_duplicate(&candidates[i], &candidates[j]) {
                    if self.prefer(&candidates[i], &candidates[j]) {
                        dropped[j] = true;
                    } else {
                        dropped[i] = true;
                        break;
                    }
                }
            }
        }

        candidates
            .into_iter()
            .zip(dropped)
            .filter_map(|(c, drop)| if drop { None } else { Some(c) })
            .collect()
    }

    fn is_duplicate(&self, a: &ScoredMemory, b: &ScoredMemory) -> bool {
        if a.memory.content == b.memory.content {
            return true;
        }
        match (a.memory.embedding.as_deref(), b.memory.embedding.as_deref()) {
            (Some(ea), Some(eb)) => cosine_similarity(ea, eb) >= self.config.dedup_threshold,
            _ => false,
        }
    }

    /// Which of a duplicate pair to keep: highest confidence wins; a tie
    /// broken in favor of whichever one supersedes the other; any remaining
    /// tie broken by whichever was learned more recently.
    fn prefer(&self, a: &ScoredMemory, b: &ScoredMemory) -> bool {
        if a.memory.confidence != b.memory.confidence {
            return a.memory.confidence > b.memory.confidence;
        }
        if a.memory.supersedes.as_deref() == Some(b.memory.memory_id.as_str()) {
            return true;
        }
        if b.memory.supersedes.as_deref() == Some(a.memory.memory_id.as_str()) {
            return false;
        }
        a.memory.learned_at >= b.memory.learned_at
    }
}
