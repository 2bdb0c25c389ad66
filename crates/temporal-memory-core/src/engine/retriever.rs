// ── Engine: Retriever ─────────────────────────────────────────────────────
//
// Runs the vector, BM25, and (optionally) graph sub-queries concurrently via
// `tokio::join!`, fuses them with Reciprocal Rank Fusion, and applies the
// confidence/validity filter. A sub-query that fails (e.g. the embedding
// endpoint is down) degrades gracefully — the remaining sub-queries still
// fuse — mirroring the donor's `engram::graph::search` (`Vector search
// skipped (embedding failed)`), generalized to genuine concurrency and a
// single `memories` table instead of the three-tier split.
//
// RRF: `score = Σ w_i / (k_rrf + rank_i)` over whichever sub-queries
// returned the memory, ranks 1-indexed within their own source.

use log::warn;
use std::collections::HashMap;
use std::time::Duration;

use crate::atoms::config::EngineConfig;
use crate::atoms::error::EngineResult;
use crate::atoms::types::{RetrieveOptions, ScoredMemory, SearchFilter};
use crate::engine::embedding_client::EmbeddingClient;
use crate::engine::store::Store;

pub struct Retriever<'a> {
    store: &'a Store,
    embedding_client: &'a EmbeddingClient,
    config: &'a EngineConfig,
}

impl<'a> Retriever<'a> {
    pub fn new(store: &'a Store, embedding_client: &'a EmbeddingClient, config: &'a EngineConfig) -> Self {
        Self { store, embedding_client, config }
    }

    /// Hybrid retrieval for `query`, racing against an overall deadline. If
    /// the deadline elapses before fusion completes, returns the caller its
    /// best-effort result: `Ok` with whatever was ready, empty if nothing
    /// was. Retrieve never surfaces a deadline as an error — a caller on a
    /// tight budget would rather get fewer memories than none at all.
    pub async fn retrieve(
        &self,
        query: &str,
        opts: &RetrieveOptions,
        deadline: Option<Duration>,
    ) -> EngineResult<Vec<ScoredMemory>> {
        let work = self.retrieve_inner(query, opts);
        match deadline {
            Some(d) => match tokio::time::timeout(d, work).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("[retriever] deadline exceeded, returning best-effort empty result");
                    Ok(Vec::new())
                }
            },
            None => work.await,
        }
    }

    async fn retrieve_inner(
        &self,
        query: &str,
        opts: &RetrieveOptions,
    ) -> EngineResult<Vec<ScoredMemory>> {
        let overfetch = self.config.top_k * self.config.overfetch;
        let filter = SearchFilter {
            type_prefix: None,
            currently_valid_only: opts.at_time.is_none(),
            min_confidence: Some(self.config.min_retrieval_confidence),
            at_time: opts.at_time,
        };

        let vector_fut = self.vector_sub_query(query, &filter, overfetch);
        let bm25_fut = self.bm25_sub_query(query, &filter, overfetch);

        let (vector_results, bm25_results) = tokio::join!(vector_fut, bm25_fut);

        let graph_results = if opts.expand {
            let seed_ids: Vec<String> = vector_results
                .iter()
                .map(|(m, _)| m.memory_id.clone())
                .chain(bm25_results.iter().map(|(m, _)| m.memory_id.clone()))
                .take(self.config.graph_seed_count)
                .collect();
            self.graph_sub_query(&seed_ids)
        } else {
            Vec::new()
        };

        Ok(self.fuse(vector_results, bm25_results, graph_results, opts))
    }

    async fn vector_sub_query(
        &self,
        query: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> Vec<(crate::atoms::types::Memory, f32)> {
        match self.embedding_client.embed(query).await {
            Ok(emb) => self.store.vector_search(&emb, filter, limit).unwrap_or_default(),
            Err(e) => {
                warn!("[retriever] vector sub-query skipped (embedding failed): {e}");
                Vec::new()
            }
        }
    }

    async fn bm25_sub_query(
        &self,
        query: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> Vec<(crate::atoms::types::Memory, f32)> {
        match self.store.bm25_search(query, filter, limit) {
            Ok(r) => r,
            Err(e) => {
                warn!("[retriever] bm25 sub-query failed: {e}");
                Vec::new()
            }
        }
    }

    /// Top-`top_k` currently-valid memories of `type_prefix` semantically
    /// near `content` — the near-neighbor lookup `TemporalManager::classify`
    /// needs to scope its contradiction search, routed through the same
    /// embedding + vector search path retrieval uses rather than a raw store
    /// scan. Falls back to a plain type-prefix scan if embedding fails.
    pub async fn near_neighbors(
        &self,
        content: &str,
        type_prefix: &str,
        top_k: usize,
    ) -> Vec<crate::atoms::types::Memory> {
        let filter = SearchFilter {
            type_prefix: Some(type_prefix.to_string()),
            currently_valid_only: true,
            min_confidence: None,
            at_time: None,
        };
        match self.embedding_client.embed(content).await {
            Ok(emb) => self
                .store
                .vector_search(&emb, &filter, top_k)
                .unwrap_or_default()
                .into_iter()
                .map(|(m, _)| m)
                .collect(),
            Err(e) => {
                warn!("[retriever] near-neighbor embedding failed, falling back to type scan: {e}");
                self.store
                    .get_current_by_type_prefix(type_prefix)
                    .unwrap_or_default()
                    .into_iter()
                    .take(top_k)
                    .collect()
            }
        }
    }

    fn graph_sub_query(&self, seed_ids: &[String]) -> Vec<crate::atoms::types::Memory> {
        if seed_ids.is_empty() {
            return Vec::new();
        }
        match self.store.traverse(seed_ids, self.config.graph_max_hops) {
            Ok(r) => r,
            Err(e) => {
                warn!("[retriever] graph sub-query failed: {e}");
                Vec::new()
            }
        }
    }

    fn fuse(
        &self,
        vector_results: Vec<(crate::atoms::types::Memory, f32)>,
        bm25_results: Vec<(crate::atoms::types::Memory, f32)>,
        graph_results: Vec<crate::atoms::types::Memory>,
        opts: &RetrieveOptions,
    ) -> Vec<ScoredMemory> {
        let mut by_id: HashMap<String, ScoredMemory> = HashMap::new();
        let k = self.config.rrf_k;

        for (rank, (mem, sim)) in vector_results.into_iter().enumerate() {
            let entry = by_id.entry(mem.memory_id.clone()).or_insert_with(|| ScoredMemory {
                memory: mem,
                vector_similarity: None,
                vector_rank: None,
                bm25_score: None,
                bm25_rank: None,
                graph_rank: None,
                rrf_score: 0.0,
            });
            entry.vector_similarity = Some(sim);
            entry.vector_rank = Some(rank + 1);
            entry.rrf_score += (self.config.w_vec / (k + (rank + 1) as f64)) as f32;
        }

        for (rank, (mem, score)) in bm25_results.into_iter().enumerate() {
            let entry = by_id.entry(mem.memory_id.clone()).or_insert_with(|| ScoredMemory {
                memory: mem,
                vector_similarity: None,
                vector_rank: None,
                bm25_score: None,
                bm25_rank: None,
                graph_rank: None,
                rrf_score: 0.0,
            });
            entry.bm25_score = Some(score);
            entry.bm25_rank = Some(rank + 1);
            entry.rrf_score += (self.config.w_bm25 / (k + (rank + 1) as f64)) as f32;
        }

        for (rank, mem) in graph_results.into_iter().enumerate() {
            let entry = by_id.entry(mem.memory_id.clone()).or_insert_with(|| ScoredMemory {
                memory: mem,
                vector_similarity: None,
                vector_rank: None,
                bm25_score: None,
                bm25_rank: None,
                graph_rank: None,
                rrf_score: 0.0,
            });
            entry.graph_rank = Some(rank + 1);
            entry.rrf_score += (self.config.w_graph / (k + (rank + 1) as f64)) as f32;
        }

        // Graph traversal walks SUPERSEDES edges unfiltered, so a superseded
        // memory can resurface here even though the vector/bm25 sub-queries
        // already excluded it. Apply the same currently-valid (or
        // point-in-time) filter here so expansion can never leak stale facts.
        let mut fused: Vec<ScoredMemory> = by_id
            .into_values()
            .filter(|s| match opts.at_time {
                Some(at) => s.memory.valid_at(at),
                None => s.memory.is_currently_valid(),
            })
            .filter(|s| s.memory.confidence >= self.config.min_retrieval_confidence)
            .collect();
        fused.sort_by(|a, b| b.rrf_score.partial_cmp(&a.rrf_score).unwrap_or(std::cmp::Ordering::Equal));
        fused
    }
}
