// ── Temporal Memory Engine ──────────────────────────────────────────────────
// Bi-temporal memory graph with contradiction/superseding resolution and
// hybrid (vector + BM25 + graph) retrieval for a conversational assistant.
//
// `Engine` is the library's single entry point: it owns the store, model
// clients, and config, and exposes the four external contracts
// (IngestConversation, Retrieve, PointInTime, AdminTierTransition) as plain
// async methods. Everything else in `engine::` is an implementation detail
// reached only through this handle.

pub mod atoms;
pub mod engine;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::info;

use atoms::config::EngineConfig;
use atoms::error::EngineResult;
use atoms::types::{IngestSummary, Memory, RetrieveOptions, RetrieveResult, Turn};
use engine::access_tracker::AccessTracker;
use engine::backfill::BackfillWorker;
use engine::budget::BudgetManager;
use engine::conversation_tracker::ConversationTracker;
use engine::dedup::Deduplicator;
use engine::embedding_client::EmbeddingClient;
use engine::extractor::Extractor;
use engine::ranker::Ranker;
use engine::retriever::Retriever;
use engine::store::Store;

/// The engine's single entry point. Construct once per process; all
/// components share this handle's store, model clients, and config.
pub struct Engine {
    store: Arc<Store>,
    config: Arc<EngineConfig>,
    extractor: Arc<Extractor>,
    embedding_client: Arc<EmbeddingClient>,
    conversation_tracker: Arc<ConversationTracker>,
    access_tracker: AccessTracker,
    /// Bounds the number of store calls (read or write) the engine services
    /// at once to `config.max_concurrent`. Retrieve rejects at the boundary
    /// when exhausted; writes block for a permit instead.
    concurrency: Arc<tokio::sync::Semaphore>,
    _access_tracker_task: tokio::task::JoinHandle<()>,
    _backfill_task: tokio::task::JoinHandle<()>,
    _idle_sweep_task: tokio::task::JoinHandle<()>,
}

impl Engine {
    /// Open (or create) the database at `path` and start the engine's
    /// background workers (backfill, idle-conversation sweep, access
    /// tracking).
    pub fn open(path: &str, config: EngineConfig) -> EngineResult<Self> {
        let store = Arc::new(Store::open(path)?);
        Self::start(store, config)
    }

    /// In-memory engine, for tests and short-lived tools.
    pub fn open_in_memory(config: EngineConfig) -> EngineResult<Self> {
        let store = Arc::new(Store::open_in_memory()?);
        Self::start(store, config)
    }

    fn start(store: Arc<Store>, config: EngineConfig) -> EngineResult<Self> {
        let config = Arc::new(config);
        let embedding_client = Arc::new(EmbeddingClient::new(&config));
        let extractor = Arc::new(Extractor::new(&config));
        let conversation_tracker = Arc::new(ConversationTracker::new(
            config.t_idle_secs,
            config.extraction_queue_capacity,
        ));
        let concurrency = Arc::new(tokio::sync::Semaphore::new(config.max_concurrent));

        let (access_tracker, access_tracker_task) =
            AccessTracker::spawn(store.clone(), config.access_tracker_queue_capacity);

        let backfill_task =
            BackfillWorker::new(store.clone(), embedding_client.clone(), &config).spawn();

        let idle_sweep_task = ConversationTracker::spawn_idle_sweep(
            conversation_tracker.clone(),
            store.clone(),
            extractor.clone(),
            embedding_client.clone(),
            config.clone(),
            Duration::from_secs(config.t_idle_secs.max(1)),
        );

        info!("[engine] started");
        Ok(Self {
            store,
            config,
            extractor,
            embedding_client,
            conversation_tracker,
            access_tracker,
            concurrency,
            _access_tracker_task: access_tracker_task,
            _backfill_task: backfill_task,
            _idle_sweep_task: idle_sweep_task,
        })
    }

    // ── Contract 1: IngestConversation ──────────────────────────────────

    /// Extract and store memories from an ordered transcript. Idempotent on
    /// `(conversation_id, transcript)` in the sense that re-ingesting the
    /// same transcript re-extracts the same candidates, which upsert onto
    /// the same `memory_id`-keyed rows rather than duplicating.
    pub async fn ingest_conversation(
        &self,
        transcript: Vec<Turn>,
        conversation_id: &str,
        deadline: Option<Duration>,
    ) -> EngineResult<IngestSummary> {
        let work = self.ingest_conversation_inner(transcript, conversation_id);
        match deadline {
            Some(d) => tokio::time::timeout(d, work)
                .await
                .map_err(|_| atoms::error::EngineError::DeadlineExceeded)?,
            None => work.await,
        }
    }

    async fn ingest_conversation_inner(
        &self,
        transcript: Vec<Turn>,
        conversation_id: &str,
    ) -> EngineResult<IngestSummary> {
        // Bound outstanding store calls to `max_concurrent`; writes block for
        // a permit rather than being rejected (only Retrieve rejects at the
        // boundary).
        let _permit = self.concurrency.clone().acquire_owned().await.expect("concurrency semaphore never closed");

        // A full transcript arriving for `conversation_id` supersedes any
        // streaming turns buffered for it via `push_turn` — flush them if the
        // history diverged, so a reused id never mixes two conversations.
        self.conversation_tracker.sync_transcript(conversation_id, &transcript);

        let storage = engine::storage_service::StorageService::new(
            &self.store,
            &self.extractor,
            &self.embedding_client,
            &self.config,
        );

        let mut summary = IngestSummary::default();
        for turn in &transcript {
            let partial = storage.ingest_turn(turn, Some(conversation_id)).await;
            summary.extracted_n += partial.extracted_n;
            summary.superseded_n += partial.superseded_n;
        }
        Ok(summary)
    }

    /// Buffer a turn for later extraction, triggered either by `finish` or
    /// the idle-timeout sweep. Use this for streaming ingestion instead of
    /// `ingest_conversation` when turns arrive one at a time.
    pub fn push_turn(&self, conversation_id: &str, turn: Turn) {
        self.conversation_tracker.push_turn(conversation_id, turn);
    }

    /// End a conversation explicitly, extracting from whatever turns were
    /// buffered via `push_turn`.
    pub async fn finish_conversation(&self, conversation_id: &str) -> IngestSummary {
        let _permit = self.concurrency.clone().acquire_owned().await.expect("concurrency semaphore never closed");
        let turns = self.conversation_tracker.finish(conversation_id);
        let storage = engine::storage_service::StorageService::new(
            &self.store,
            &self.extractor,
            &self.embedding_client,
            &self.config,
        );
        let mut summary = IngestSummary::default();
        for turn in &turns {
            let partial = storage.ingest_turn(turn, Some(conversation_id)).await;
            summary.extracted_n += partial.extracted_n;
            summary.superseded_n += partial.superseded_n;
        }
        summary
    }

    // ── Contract 2: Retrieve ─────────────────────────────────────────────

    /// Hybrid retrieval: vector + BM25 + bounded graph expansion, fused by
    /// RRF, deduplicated, ranked, and packed into `budget_tokens`.
    pub async fn retrieve(
        &self,
        query_text: &str,
        top_k: usize,
        budget_tokens: usize,
        at_time: Option<DateTime<Utc>>,
        deadline: Option<Duration>,
    ) -> EngineResult<RetrieveResult> {
        // Retrieve rejects at the boundary instead of queuing: a caller on a
        // retrieval-latency budget would rather fail fast than wait behind
        // `max_concurrent` other calls.
        let _permit = self.concurrency.clone().try_acquire_owned().map_err(|_| {
            atoms::error::EngineError::TooManyConcurrentRequests(self.config.max_concurrent)
        })?;

        let start = std::time::Instant::now();
        let opts = RetrieveOptions { expand: true, at_time };

        let retriever = Retriever::new(&self.store, &self.embedding_client, &self.config);
        let scored = retriever.retrieve(query_text, &opts, deadline).await?;
        let candidates_before_filter = scored.len();

        let dedup = Deduplicator::new(&self.config);
        let deduped = dedup.dedup(scored);
        let candidates_after_filter = deduped.len();

        let ranker = Ranker::new(&self.config);
        let mut ranked = ranker.rank(deduped, Utc::now());
        ranked.truncate(top_k.max(self.config.top_k).min(ranked.len().max(1)).min(ranked.len()));

        let mut per_call_config = (*self.config).clone();
        per_call_config.budget_tokens = budget_tokens;
        let budget_manager = BudgetManager::new(&self.store, &per_call_config);
        let packed = budget_manager.pack(ranked.clone());

        for item in &packed {
            self.access_tracker.record(&item.memory_id);
        }

        let tokens_consumed: usize = packed.iter().map(|m| m.token_cost).sum();
        let quality = ranker.quality_metrics(
            &ranked,
            candidates_before_filter,
            candidates_after_filter,
            tokens_consumed,
            start.elapsed().as_millis() as u64,
        );

        Ok(RetrieveResult { memories: packed, quality })
    }

    // ── Contract 3: PointInTime ──────────────────────────────────────────

    /// All memories whose `[valid_from, valid_until)` interval contains
    /// `at_time`.
    pub fn point_in_time(&self, at_time: DateTime<Utc>) -> EngineResult<Vec<Memory>> {
        self.store.get_memories_valid_at(at_time, None)
    }

    // ── Contract 4: AdminTierTransition ──────────────────────────────────

    /// Walk all memories, promoting frequently-accessed ones to `LongTerm`
    /// and archiving low-relevance ones, per the configured thresholds.
    /// Never called on the retrieval hot path.
    pub fn admin_tier_transition(&self) -> EngineResult<usize> {
        let now = Utc::now();
        let mut moved = 0usize;

        for memory in self.store.get_memories_valid_at(now, None)? {
            let recency_weight = 2.0_f32.powf(
                -(now - memory.last_accessed.unwrap_or(memory.learned_at))
                    .num_seconds()
                    .max(0) as f32
                    / (self.config.half_life_days * 86_400.0),
            );
            let relevance = 0.5 * memory.confidence + 0.5 * recency_weight;

            if relevance >= self.config.promote_threshold && memory.tier != atoms::types::Tier::LongTerm {
                self.store.set_tier(&memory.memory_id, atoms::types::Tier::LongTerm)?;
                moved += 1;
            } else if relevance <= self.config.archive_threshold && memory.tier != atoms::types::Tier::Archived {
                self.store.set_tier(&memory.memory_id, atoms::types::Tier::Archived)?;
                moved += 1;
            }
        }

        info!("[engine] tier transition moved {moved} memories");
        Ok(moved)
    }

    /// Run one backfill cycle synchronously, outside the periodic
    /// background schedule. Useful for CLI tools and tests.
    pub async fn backfill_once(&self) -> EngineResult<usize> {
        BackfillWorker::new(self.store.clone(), self.embedding_client.clone(), &self.config)
            .run_once()
            .await
    }

    /// Walk the superseding chain and flag any memory whose scalar
    /// `superseded_by` pointer has no matching `SUPERSEDES` edge. Not on the
    /// hot path — a background consistency check, same cadence as
    /// `admin_tier_transition`.
    pub fn check_consistency(&self) -> EngineResult<Vec<String>> {
        self.store.check_consistency()
    }
}
