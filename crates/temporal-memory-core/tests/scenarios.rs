// End-to-end scenarios against the engine's components directly (no live
// model endpoint is available in CI, so these exercise the store/temporal/
// retrieval/dedup/budget/backfill pipeline the way `Engine` wires it,
// without going through the model-calling Extractor).

use chrono::{DateTime, Utc};

use temporal_memory_core::atoms::config::EngineConfig;
use temporal_memory_core::atoms::types::{CandidateMemory, Memory, RetrieveOptions, ScoredMemory, Tier};
use temporal_memory_core::engine::budget::BudgetManager;
use temporal_memory_core::engine::dedup::Deduplicator;
use temporal_memory_core::engine::embedding_client::EmbeddingClient;
use temporal_memory_core::engine::retriever::Retriever;
use temporal_memory_core::engine::store::Store;
use temporal_memory_core::engine::temporal::{Resolution, TemporalManager};

fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn candidate(memory_type: &str, content: &str, confidence: f32, event_time: DateTime<Utc>) -> CandidateMemory {
    CandidateMemory {
        memory_type: memory_type.into(),
        content: content.into(),
        confidence,
        rationale: "test".into(),
        event_time: Some(event_time),
        is_correction: false,
    }
}

fn bare_memory(id: &str, content: &str, embedding: Option<Vec<f32>>, confidence: f32, access_count: u32) -> Memory {
    let now = Utc::now();
    Memory {
        memory_id: id.into(),
        content: content.into(),
        memory_type: "t".into(),
        confidence,
        embedding,
        valid_from: now,
        valid_until: None,
        learned_at: now,
        superseded_by: None,
        supersedes: None,
        tier: Tier::ShortTerm,
        last_accessed: None,
        access_count,
        source_conversation_id: None,
        token_count_cache: None,
    }
}

/// Scenario 1: contradiction then point-in-time.
#[test]
fn contradiction_then_point_in_time() {
    let store = Store::open_in_memory().unwrap();
    let config = EngineConfig::default();
    let tm = TemporalManager::new(&store, &config);

    let t1 = at("2024-10-01T10:00:00Z");
    let first_cand = candidate("proxmox_cluster_node_configuration", "Proxmox cluster has 3 nodes", 0.85, t1);
    let first = tm.build_memory(&first_cand, Some(vec![1.0, 0.0]), None);
    store.upsert_memory(&first).unwrap();

    let t2 = at("2024-12-01T10:00:00Z");
    let second_cand = candidate("proxmox_cluster_node_configuration", "Proxmox cluster has 4 nodes", 0.85, t2);
    let resolution = tm.classify(&second_cand, Some(&[0.99, 0.01]), &[first.clone()]).unwrap();
    let old_ids = match resolution {
        Resolution::Supersede { old_ids } => old_ids,
        _ => panic!("expected a supersede, got a different resolution"),
    };
    assert_eq!(old_ids, vec![first.memory_id.clone()]);

    let second = tm.build_memory(&second_cand, Some(vec![0.99, 0.01]), None);
    tm.apply_supersede(&old_ids, &second, t2).unwrap();

    let as_of_mid_october = store.get_memories_valid_at(at("2024-10-15T12:00:00Z"), None).unwrap();
    assert_eq!(as_of_mid_october.len(), 1);
    assert_eq!(as_of_mid_october[0].memory_id, first.memory_id);

    let as_of_december = store.get_memories_valid_at(at("2024-12-05T12:00:00Z"), None).unwrap();
    assert_eq!(as_of_december.len(), 1);
    assert_eq!(as_of_december[0].memory_id, second.memory_id);

    let closed = store.get_memory(&first.memory_id).unwrap().unwrap();
    assert_eq!(closed.valid_until, Some(t2));
    assert_eq!(closed.superseded_by.as_deref(), Some(second.memory_id.as_str()));

    let reachable_from_second = store.traverse(&[second.memory_id.clone()], 1).unwrap();
    assert!(reachable_from_second.iter().any(|m| m.memory_id == first.memory_id));
}

/// Scenario 2: BM25 must be able to surface a textually-exact hit ahead of
/// a memory that only wins on vector similarity, once fused.
#[tokio::test]
async fn bm25_fusion_ranks_exact_text_match_first() {
    let store = Store::open_in_memory().unwrap();
    let mut config = EngineConfig::default();
    config.embedding_base_url = "http://127.0.0.1:1".into();
    let embedding_client = EmbeddingClient::new(&config);

    let docker = bare_memory("docker", "docker deployment runs in swarm mode", Some(vec![0.1, 0.9]), 0.8, 0);
    let ceph = bare_memory("ceph", "proxmox ceph storage cluster", Some(vec![0.95, 0.05]), 0.8, 0);
    let home = bare_memory("home", "home automation routines", Some(vec![0.0, 1.0]), 0.8, 0);
    for m in [&docker, &ceph, &home] {
        store.upsert_memory(m).unwrap();
    }

    let retriever = Retriever::new(&store, &embedding_client, &config);
    let results = retriever
        .retrieve("docker deployment", &RetrieveOptions { expand: false, at_time: None }, None)
        .await
        .unwrap();

    assert!(!results.is_empty());
    assert_eq!(results[0].memory.memory_id, "docker");
}

/// Scenario 3: deduplication keeps the higher-confidence near-duplicate.
#[test]
fn dedup_keeps_higher_confidence_near_duplicate() {
    let config = EngineConfig::default();
    let dedup = Deduplicator::new(&config);

    let high = bare_memory("high", "likes italian food", Some(vec![1.0, 0.0]), 0.9, 3);
    let low = bare_memory("low", "likes italian cuisine", Some(vec![0.99, 0.02]), 0.7, 9);

    let scored = |m: Memory, rrf: f32| ScoredMemory {
        memory: m,
        vector_similarity: None,
        vector_rank: None,
        bm25_score: None,
        bm25_rank: None,
        graph_rank: None,
        rrf_score: rrf,
    };

    let survivors = dedup.dedup(vec![scored(high, 0.8), scored(low, 0.5)]);
    assert_eq!(survivors.len(), 1);
    assert_eq!(survivors[0].memory.memory_id, "high");
    assert_eq!(survivors[0].memory.access_count, 3);
}

/// Scenario 4: hard-cutoff budgeting keeps only the memories that fit.
#[test]
fn budget_hard_cutoff_keeps_only_what_fits() {
    let store = Store::open_in_memory().unwrap();
    let mut config = EngineConfig::default();
    config.budget_tokens = 20;
    config.budget_formatting_overhead = 0;
    config.budget_strategy = temporal_memory_core::atoms::types::BudgetStrategy::HardCutoff;
    let manager = BudgetManager::new(&store, &config);

    // Token costs roughly track content length under the heuristic
    // tokenizer (chars / 3.5); sized so the first two fit within 20 tokens
    // and the third does not.
    let ranked = |id: &str, content: &str, score: f32| temporal_memory_core::atoms::types::RankedMemory {
        memory: bare_memory(id, content, None, 0.8, 0),
        vector_similarity: None,
        bm25_score: None,
        rrf_score: score,
        composite_score: score,
    };

    let packed = manager.pack(vec![
        ranked("a", "short one", 0.9),
        ranked("b", "short two", 0.8),
        ranked("c", "this one pushes the cumulative count well past the budget", 0.7),
    ]);

    let ids: Vec<&str> = packed.iter().map(|m| m.memory_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
}

/// Scenario 5: backfill converges to every memory carrying a unit-norm
/// embedding, tolerating an unreachable embedding endpoint by leaving rows
/// unembedded rather than erroring the whole batch.
#[tokio::test]
async fn backfill_run_once_is_idempotent_and_never_panics() {
    let store = std::sync::Arc::new(Store::open_in_memory().unwrap());
    for i in 0..10 {
        store.upsert_memory(&bare_memory(&format!("m{i}"), "some fact", None, 0.8, 0)).unwrap();
    }

    let mut config = EngineConfig::default();
    config.embedding_base_url = "http://127.0.0.1:1".into();
    let embedding_client = std::sync::Arc::new(EmbeddingClient::new(&config));
    let worker = temporal_memory_core::engine::backfill::BackfillWorker::new(store.clone(), embedding_client, &config);

    let filled = worker.run_once().await.unwrap();
    assert_eq!(filled, 0);

    for i in 0..10 {
        let m = store.get_memory(&format!("m{i}")).unwrap().unwrap();
        assert!(m.embedding.is_none());
    }
}

/// Scenario 6: a retrieval whose deadline elapses returns its best-effort
/// result — here, an empty list — rather than an error.
#[tokio::test]
async fn retrieval_respects_deadline() {
    let store = Store::open_in_memory().unwrap();
    let mut config = EngineConfig::default();
    config.embedding_base_url = "http://127.0.0.1:1".into();
    let embedding_client = EmbeddingClient::new(&config);
    let retriever = Retriever::new(&store, &embedding_client, &config);

    let result = retriever
        .retrieve("anything", &RetrieveOptions { expand: false, at_time: None }, Some(std::time::Duration::from_nanos(1)))
        .await;

    assert!(result.unwrap().is_empty());
}
