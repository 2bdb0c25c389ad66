// ── Engine: Temporal Manager ─────────────────────────────────────────────────
//
// Detects contradictions between an incoming candidate and currently-valid
// memories of the same type, and writes the superseding chain when one is
// found: close the old memory's validity interval, link the scalar
// `superseded_by`/`supersedes` pointers, and add the authoritative
// `SUPERSEDES` edge — all inside one transaction (`Store::set_supersedes`).
//
// Mirrors the donor's consolidation contradiction-resolution branch
// (recency wins, confidence transfers, an edge + audit entry record the
// resolution) adapted to a single bi-temporal entity instead of SPO triples.

use chrono::{DateTime, Utc};
use log::info;
use uuid::Uuid;

use crate::atoms::config::EngineConfig;
use crate::atoms::error::EngineResult;
use crate::atoms::types::{CandidateMemory, Memory, Tier};
use crate::engine::store::{cosine_similarity, Store};

pub struct TemporalManager<'a> {
    store: &'a Store,
    config: &'a EngineConfig,
}

/// Outcome of checking one candidate against current memory.
pub enum Resolution {
    /// No contradiction found; insert as a fresh memory.
    Insert,
    /// Contradicts one or more currently-valid memories; insert the new
    /// memory, then supersede all of them. Ordered highest-confidence first
    /// — `old_ids[0]` is the predecessor the new memory's scalar `supersedes`
    /// pointer names.
    Supersede { old_ids: Vec<String> },
    /// The candidate's `event_time` predates a memory that already supersedes
    /// it in this type scope — reject as out-of-order evidence.
    RejectOutOfOrder,
}

impl<'a> TemporalManager<'a> {
    pub fn new(store: &'a Store, config: &'a EngineConfig) -> Self {
        Self { store, config }
    }

    /// Decide how `candidate` relates to `current` — the near-neighbor
    /// memories the caller scoped to the candidate's type (and, typically,
    /// semantic proximity via the Retriever).
    ///
    /// A contradiction requires: currently valid, cosine similarity >=
    /// `contradict_sim_threshold` (bypassed when the candidate is tagged
    /// `is_correction`), and the candidate's content is not a literal
    /// substring of the existing memory's (which would make it a
    /// corroboration, not a contradiction). If more than one existing memory
    /// qualifies, all are superseded; the scalar `supersedes` pointer on the
    /// new memory names the highest-confidence predecessor.
    pub fn classify(
        &self,
        candidate: &CandidateMemory,
        candidate_embedding: Option<&[f32]>,
        current: &[Memory],
    ) -> EngineResult<Resolution> {
        let event_time = candidate.event_time.unwrap_or_else(Utc::now);
        let mut matches: Vec<&Memory> = Vec::new();

        for existing in current {
            let is_restatement = candidate.content.contains(&existing.content)
                || existing.content.contains(&candidate.content);
            if is_restatement && !candidate.is_correction {
                // Same claim restated — corroboration, not a contradiction.
                continue;
            }

            if event_time < existing.valid_from && !candidate.is_correction {
                return Ok(Resolution::RejectOutOfOrder);
            }

            let similar = if candidate.is_correction {
                true
            } else {
                match (candidate_embedding, existing.embedding.as_deref()) {
                    (Some(a), Some(b)) => {
                        cosine_similarity(a, b) >= self.config.contradict_sim_threshold
                    }
                    _ => false,
                }
            };

            if similar {
                matches.push(existing);
            }
        }

        if matches.is_empty() {
            return Ok(Resolution::Insert);
        }

        matches.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
        let old_ids: Vec<String> = matches.iter().map(|m| m.memory_id.clone()).collect();
        info!(
            "[temporal] contradiction detected: new candidate supersedes {} memory(ies), primary {}",
            old_ids.len(),
            old_ids[0]
        );
        Ok(Resolution::Supersede { old_ids })
    }

    /// Build the `Memory` row for a freshly accepted candidate.
    pub fn build_memory(
        &self,
        candidate: &CandidateMemory,
        embedding: Option<Vec<f32>>,
        source_conversation_id: Option<String>,
    ) -> Memory {
        let now = Utc::now();
        Memory {
            memory_id: Uuid::new_v4().to_string(),
            content: candidate.content.clone(),
            memory_type: candidate.memory_type.clone(),
            confidence: candidate.confidence,
            embedding,
            valid_from: candidate.event_time.unwrap_or(now),
            valid_until: None,
            learned_at: now,
            superseded_by: None,
            supersedes: None,
            tier: Tier::ShortTerm,
            last_accessed: None,
            access_count: 0,
            source_conversation_id,
            token_count_cache: None,
        }
    }

    /// Write the supersede chain: insert the new memory (if not already
    /// present) and close out every predecessor in `old_ids`. The new
    /// memory's scalar `supersedes` pointer names `old_ids[0]`.
    pub fn apply_supersede(&self, old_ids: &[String], new: &Memory, at: DateTime<Utc>) -> EngineResult<()> {
        self.store.upsert_memory(new)?;
        self.store.set_supersedes(old_ids, &new.memory_id, at)?;
        Ok(())
    }
}
