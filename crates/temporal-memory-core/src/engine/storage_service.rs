// ── Engine: Storage Service ───────────────────────────────────────────────
//
// Orchestrates one candidate's path from extraction to rest: confidence
// filter, embed, classify against current memory (TemporalManager), then
// either a plain insert or an insert-plus-supersede. Every write still goes
// through `Store::upsert_memory`, so the whole pipeline is idempotent on
// `memory_id` even if a caller retries it — mirrors the donor's
// `store_memory` helper (`engine/memory.rs`), generalized to cover
// contradiction resolution instead of a flat insert.

use log::{info, warn};

use crate::atoms::config::EngineConfig;
use crate::atoms::error::EngineResult;
use crate::atoms::types::{memory_type_prefix, CandidateMemory, IngestSummary, Turn};
use crate::engine::embedding_client::EmbeddingClient;
use crate::engine::extractor::Extractor;
use crate::engine::retriever::Retriever;
use crate::engine::store::Store;
use crate::engine::temporal::{Resolution, TemporalManager};

pub struct StorageService<'a> {
    store: &'a Store,
    extractor: &'a Extractor,
    embedding_client: &'a EmbeddingClient,
    config: &'a EngineConfig,
}

impl<'a> StorageService<'a> {
    pub fn new(
        store: &'a Store,
        extractor: &'a Extractor,
        embedding_client: &'a EmbeddingClient,
        config: &'a EngineConfig,
    ) -> Self {
        Self { store, extractor, embedding_client, config }
    }

    /// Extract candidates from `turn`, then store each one that clears the
    /// confidence threshold. Best-effort per candidate: a failure embedding
    /// or storing one candidate does not abort the rest of the turn.
    pub async fn ingest_turn(
        &self,
        turn: &Turn,
        source_conversation_id: Option<&str>,
    ) -> IngestSummary {
        let candidates = self.extractor.extract(turn).await;
        let mut summary = IngestSummary::default();

        for candidate in candidates {
            if candidate.confidence < self.config.min_extraction_confidence {
                continue;
            }
            match self.store_candidate(&candidate, source_conversation_id).await {
                Ok(superseded) => {
                    summary.extracted_n += 1;
                    if superseded {
                        summary.superseded_n += 1;
                    }
                }
                Err(e) => warn!("[storage] failed to store candidate: {e}"),
            }
        }

        summary
    }

    /// Store a single candidate; returns whether it superseded an existing
    /// memory.
    async fn store_candidate(
        &self,
        candidate: &CandidateMemory,
        source_conversation_id: Option<&str>,
    ) -> EngineResult<bool> {
        let embedding = match self.embedding_client.embed(&candidate.content).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("[storage] embedding failed, storing without vector: {e}");
                None
            }
        };

        let retriever = Retriever::new(self.store, self.embedding_client, self.config);
        let type_prefix = memory_type_prefix(&candidate.memory_type);
        let neighbors = retriever
            .near_neighbors(&candidate.content, &type_prefix, self.config.top_k)
            .await;

        let tm = TemporalManager::new(self.store, self.config);
        let resolution = tm.classify(candidate, embedding.as_deref(), &neighbors)?;

        let memory = tm.build_memory(candidate, embedding, source_conversation_id.map(String::from));

        match resolution {
            Resolution::Insert => {
                self.store.upsert_memory(&memory)?;
                info!("[storage] inserted memory {}", memory.memory_id);
                Ok(false)
            }
            Resolution::Supersede { old_ids } => {
                tm.apply_supersede(&old_ids, &memory, memory.learned_at)?;
                info!(
                    "[storage] memory {} supersedes {} predecessor(s), primary {}",
                    memory.memory_id,
                    old_ids.len(),
                    old_ids[0]
                );
                Ok(true)
            }
            Resolution::RejectOutOfOrder => {
                warn!(
                    "[storage] rejected out-of-order candidate for type {}",
                    candidate.memory_type
                );
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn turn(role: &str, text: &str) -> Turn {
        Turn { role: role.into(), text: text.into(), timestamp: Utc::now() }
    }

    #[tokio::test]
    async fn ingest_turn_with_unreachable_model_yields_empty_summary() {
        let store = Store::open_in_memory().unwrap();
        let mut config = EngineConfig::default();
        config.extraction_base_url = "http://127.0.0.1:1".into();
        config.embedding_base_url = "http://127.0.0.1:1".into();
        let extractor = Extractor::new(&config);
        let embedding_client = EmbeddingClient::new(&config);
        let service = StorageService::new(&store, &extractor, &embedding_client, &config);

        let summary = service.ingest_turn(&turn("user", "I like pizza"), Some("conv-1")).await;
        assert_eq!(summary.extracted_n, 0);
    }

    #[tokio::test]
    async fn store_candidate_without_embedding_still_inserts() {
        let store = Store::open_in_memory().unwrap();
        let mut config = EngineConfig::default();
        config.embedding_base_url = "http://127.0.0.1:1".into();
        let extractor = Extractor::new(&config);
        let embedding_client = EmbeddingClient::new(&config);
        let service = StorageService::new(&store, &extractor, &embedding_client, &config);

        let candidate = CandidateMemory {
            memory_type: "preference_food".into(),
            content: "likes pizza".into(),
            confidence: 0.9,
            rationale: "stated".into(),
            event_time: None,
            is_correction: false,
        };
        let superseded = service.store_candidate(&candidate, Some("conv-1")).await.unwrap();
        assert!(!superseded);

        let all = store.get_current_by_type_prefix("preference_food").unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].source_conversation_id.as_deref(), Some("conv-1"));
    }

    #[tokio::test]
    async fn second_contradicting_candidate_supersedes_first() {
        let store = Store::open_in_memory().unwrap();
        let mut config = EngineConfig::default();
        config.embedding_base_url = "http://127.0.0.1:1".into();
        let extractor = Extractor::new(&config);
        let embedding_client = EmbeddingClient::new(&config);
        let service = StorageService::new(&store, &extractor, &embedding_client, &config);

        let mut first = CandidateMemory {
            memory_type: "preference_food".into(),
            content: "likes pizza".into(),
            confidence: 0.9,
            rationale: "stated".into(),
            event_time: None,
            is_correction: false,
        };
        service.store_candidate(&first, None).await.unwrap();

        first.is_correction = true;
        first.content = "no longer likes pizza".into();
        let superseded = service.store_candidate(&first, None).await.unwrap();
        assert!(superseded);

        let current = store.get_current_by_type_prefix("preference_food").unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].content, "no longer likes pizza");
    }
}
