// ── Engine: Store ────────────────────────────────────────────────────────────
//
// Low-level CRUD and search operations over the `memories` table. Follows the
// donor's pattern: `&self`, lock the connection, prepared statements with
// rusqlite params. Schema lives in `engine::schema`; column names here must
// match it.
//
// Vector search is a brute-force in-Rust cosine-similarity scan (no ANN
// index) — acceptable at the scale this engine targets, same tradeoff the
// donor makes for its episodic/semantic tables.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::str::FromStr;

use crate::atoms::error::EngineResult;
use crate::atoms::types::{EdgeType, Memory, MemoryEdge, SearchFilter, Tier};
use crate::engine::schema;

/// Convert a byte slice (from a SQLite BLOB) to `Vec<f32>`.
pub fn bytes_to_f32_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Convert a `Vec<f32>` to bytes for SQLite BLOB storage.
pub fn f32_vec_to_bytes(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Cosine similarity between two vectors. Returns 0.0 if either is empty or
/// the lengths disagree.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-12 {
        0.0
    } else {
        (dot / denom) as f32
    }
}

/// Owns the single SQLite connection backing the engine. All engine
/// components reach the database only through this type.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &str) -> EngineResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::run_migrations(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::run_migrations(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    // ── Row mapping ─────────────────────────────────────────────────────

    fn memory_from_row(row: &Row) -> rusqlite::Result<Memory> {
        let embedding_bytes: Option<Vec<u8>> = row.get("embedding")?;
        let tier_str: String = row.get("tier")?;
        Ok(Memory {
            memory_id: row.get("memory_id")?,
            content: row.get("content")?,
            memory_type: row.get("memory_type")?,
            confidence: row.get("confidence")?,
            embedding: embedding_bytes.map(|b| bytes_to_f32_vec(&b)),
            valid_from: row.get("valid_from")?,
            valid_until: row.get("valid_until")?,
            learned_at: row.get("learned_at")?,
            superseded_by: row.get("superseded_by")?,
            supersedes: row.get("supersedes")?,
            tier: Tier::from_str(&tier_str).unwrap_or(Tier::ShortTerm),
            last_accessed: row.get("last_accessed")?,
            access_count: row.get::<_, i64>("access_count")? as u32,
            source_conversation_id: row.get("source_conversation_id")?,
            token_count_cache: row
                .get::<_, Option<i64>>("token_count_cache")?
                .map(|v| v as usize),
        })
    }

    const SELECT_COLUMNS: &'static str = "memory_id, content, memory_type, confidence, embedding, \
         valid_from, valid_until, learned_at, superseded_by, supersedes, tier, \
         last_accessed, access_count, source_conversation_id, token_count_cache";

    // ── Writes ──────────────────────────────────────────────────────────

    /// Idempotent insert-or-replace keyed on `memory_id` — the sole write
    /// discipline exposed to callers; there is no separate update path.
    pub fn upsert_memory(&self, mem: &Memory) -> EngineResult<()> {
        let conn = self.conn.lock();
        let embedding_bytes = mem.embedding.as_ref().map(|v| f32_vec_to_bytes(v));
        conn.execute(
            "INSERT INTO memories (
                memory_id, content, memory_type, confidence, embedding,
                valid_from, valid_until, learned_at, superseded_by, supersedes,
                tier, last_accessed, access_count, source_conversation_id, token_count_cache
            ) VALUES (?1,?2,?3,?4,?5, ?6,?7,?8,?9,?10, ?11,?12,?13,?14,?15)
            ON CONFLICT(memory_id) DO UPDATE SET
                content = excluded.content,
                memory_type = excluded.memory_type,
                confidence = excluded.confidence,
                embedding = excluded.embedding,
                valid_from = excluded.valid_from,
                valid_until = excluded.valid_until,
                superseded_by = excluded.superseded_by,
                supersedes = excluded.supersedes,
                tier = excluded.tier,
                last_accessed = excluded.last_accessed,
                access_count = excluded.access_count,
                source_conversation_id = excluded.source_conversation_id,
                token_count_cache = excluded.token_count_cache",
            params![
                mem.memory_id,
                mem.content,
                mem.memory_type,
                mem.confidence,
                embedding_bytes,
                mem.valid_from,
                mem.valid_until,
                mem.learned_at,
                mem.superseded_by,
                mem.supersedes,
                mem.tier.to_string(),
                mem.last_accessed,
                mem.access_count as i64,
                mem.source_conversation_id,
                mem.token_count_cache.map(|v| v as i64),
            ],
        )?;
        self.audit(&conn, "upsert", &mem.memory_id, None)?;
        Ok(())
    }

    /// Close every memory in `old_ids`' validity interval and point its
    /// scalar `superseded_by` at `new_id`, plus an authoritative
    /// `SUPERSEDES` edge per predecessor. The new memory's scalar
    /// `supersedes` pointer is set to `old_ids[0]` (the caller's chosen
    /// primary, conventionally the highest-confidence predecessor). Runs in
    /// a single transaction so the scalar pointers and the graph edges never
    /// diverge.
    pub fn set_supersedes(
        &self,
        old_ids: &[String],
        new_id: &str,
        at: DateTime<Utc>,
    ) -> EngineResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for old_id in old_ids {
            tx.execute(
                "UPDATE memories SET valid_until = ?1, superseded_by = ?2 WHERE memory_id = ?3",
                params![at, new_id, old_id],
            )?;
            tx.execute(
                "INSERT OR REPLACE INTO memory_edges (source_id, target_id, edge_type, weight, created_at)
                 VALUES (?1, ?2, ?3, 1.0, ?4)",
                params![new_id, old_id, EdgeType::Supersedes.to_string(), at],
            )?;
        }
        if let Some(primary) = old_ids.first() {
            tx.execute(
                "UPDATE memories SET supersedes = ?1 WHERE memory_id = ?2",
                params![primary, new_id],
            )?;
        }
        tx.execute(
            "INSERT INTO memory_audit_log (operation, memory_id, details_json, created_at)
             VALUES ('supersede', ?1, ?2, ?3)",
            params![
                new_id,
                serde_json::json!({ "supersedes": old_ids }).to_string(),
                at
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn add_edge(&self, edge: &MemoryEdge) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO memory_edges (source_id, target_id, edge_type, weight, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                edge.source_id,
                edge.target_id,
                edge.edge_type.to_string(),
                edge.weight,
                edge.created_at
            ],
        )?;
        Ok(())
    }

    pub fn update_access(&self, memory_id: &str, at: DateTime<Utc>) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE memories SET last_accessed = ?1, access_count = access_count + 1 WHERE memory_id = ?2",
            params![at, memory_id],
        )?;
        Ok(())
    }

    pub fn set_tier(&self, memory_id: &str, tier: Tier) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE memories SET tier = ?1 WHERE memory_id = ?2",
            params![tier.to_string(), memory_id],
        )?;
        self.audit(&conn, "tier_transition", memory_id, Some(&tier.to_string()))?;
        Ok(())
    }

    /// Set the embedding for a memory, but only if it is still null —
    /// guards the BackfillWorker against clobbering a write that raced it.
    pub fn set_embedding_if_null(&self, memory_id: &str, embedding: &[f32]) -> EngineResult<bool> {
        let conn = self.conn.lock();
        let bytes = f32_vec_to_bytes(embedding);
        let changed = conn.execute(
            "UPDATE memories SET embedding = ?1 WHERE memory_id = ?2 AND embedding IS NULL",
            params![bytes, memory_id],
        )?;
        Ok(changed > 0)
    }

    pub fn set_token_count_cache(&self, memory_id: &str, tokens: usize) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE memories SET token_count_cache = ?1 WHERE memory_id = ?2",
            params![tokens as i64, memory_id],
        )?;
        Ok(())
    }

    fn audit(
        &self,
        conn: &Connection,
        operation: &str,
        memory_id: &str,
        details: Option<&str>,
    ) -> EngineResult<()> {
        conn.execute(
            "INSERT INTO memory_audit_log (operation, memory_id, details_json, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![operation, memory_id, details, Utc::now()],
        )?;
        Ok(())
    }

    // ── Reads ───────────────────────────────────────────────────────────

    pub fn get_memory(&self, memory_id: &str) -> EngineResult<Option<Memory>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM memories WHERE memory_id = ?1", Self::SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        Ok(stmt.query_row(params![memory_id], Self::memory_from_row).optional()?)
    }

    /// Memories whose `[valid_from, valid_until)` interval contains `at`,
    /// within an optional type-prefix scope. Backs the PointInTime contract.
    pub fn get_memories_valid_at(
        &self,
        at: DateTime<Utc>,
        type_prefix: Option<&str>,
    ) -> EngineResult<Vec<Memory>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM memories
             WHERE valid_from <= ?1 AND (valid_until IS NULL OR valid_until > ?1)
               AND (?2 IS NULL OR memory_type LIKE ?2 || '%')",
            Self::SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![at, type_prefix], Self::memory_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Memories sharing `type_prefix`, currently valid, used by the
    /// TemporalManager to scope contradiction search.
    pub fn get_current_by_type_prefix(&self, type_prefix: &str) -> EngineResult<Vec<Memory>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM memories
             WHERE memory_type LIKE ?1 || '%' AND valid_until IS NULL
             ORDER BY learned_at DESC",
            Self::SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![type_prefix], Self::memory_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Brute-force cosine-similarity scan over embedded, filter-matching
    /// memories. Returns `(memory, similarity)` sorted descending, truncated
    /// to `limit`.
    pub fn vector_search(
        &self,
        query_embedding: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> EngineResult<Vec<(Memory, f32)>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM memories WHERE embedding IS NOT NULL", Self::SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let mut scored: Vec<(Memory, f32)> = stmt
            .query_map([], Self::memory_from_row)?
            .filter_map(|r| r.ok())
            .filter(|m| apply_filter(m, filter))
            .filter_map(|m| {
                let emb = m.embedding.clone()?;
                let sim = cosine_similarity(&emb, query_embedding);
                Some((m, sim))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    /// FTS5 BM25 keyword search. `rank` (from SQLite's `bm25()` via the
    /// implicit `fts.rank` column) is negative-is-better; we negate it so
    /// callers see a conventional higher-is-better score.
    pub fn bm25_search(
        &self,
        query: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> EngineResult<Vec<(Memory, f32)>> {
        let conn = self.conn.lock();
        let cols: Vec<String> = Self::SELECT_COLUMNS.split(", ").map(|c| format!("m.{c}")).collect();
        let sql = format!(
            "SELECT {}, fts.rank AS fts_rank
             FROM memories m
             JOIN memories_fts fts ON m.rowid = fts.rowid
             WHERE memories_fts MATCH ?1
             ORDER BY fts.rank
             LIMIT ?2",
            cols.join(", ")
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<(Memory, f32)> = stmt
            .query_map(params![query, (limit * 4) as i64], |row| {
                let mem = Self::memory_from_row(row)?;
                let rank: f64 = row.get("fts_rank")?;
                Ok((mem, -rank as f32))
            })?
            .filter_map(|r| r.ok())
            .filter(|(m, _)| apply_filter(m, filter))
            .take(limit)
            .collect();
        Ok(rows)
    }

    /// Bounded BFS outward from `seed_ids` over `memory_edges`, up to
    /// `max_hops`. Returns memories in first-discovered order (used as the
    /// graph sub-query's rank for RRF fusion).
    pub fn traverse(&self, seed_ids: &[String], max_hops: usize) -> EngineResult<Vec<Memory>> {
        let conn = self.conn.lock();
        let mut visited: std::collections::HashSet<String> = seed_ids.iter().cloned().collect();
        let mut frontier: Vec<String> = seed_ids.to_vec();
        let mut ordered_ids: Vec<String> = Vec::new();

        for _ in 0..max_hops {
            if frontier.is_empty() {
                break;
            }
            let mut next_frontier = Vec::new();
            for id in &frontier {
                let mut stmt = conn.prepare(
                    "SELECT target_id FROM memory_edges WHERE source_id = ?1
                     UNION
                     SELECT source_id FROM memory_edges WHERE target_id = ?1",
                )?;
                let neighbors: Vec<String> = stmt
                    .query_map(params![id], |r| r.get::<_, String>(0))?
                    .filter_map(|r| r.ok())
                    .collect();
                for n in neighbors {
                    if visited.insert(n.clone()) {
                        ordered_ids.push(n.clone());
                        next_frontier.push(n);
                    }
                }
            }
            frontier = next_frontier;
        }

        let sql = format!("SELECT {} FROM memories WHERE memory_id = ?1", Self::SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let mut out = Vec::with_capacity(ordered_ids.len());
        for id in &ordered_ids {
            if let Some(m) = stmt.query_row(params![id], Self::memory_from_row).optional()? {
                out.push(m);
            }
        }
        Ok(out)
    }

    /// All memories claimed for backfill: embedding still null, bounded to
    /// `batch`. Used by `BackfillWorker`.
    pub fn get_unembedded(&self, batch: usize) -> EngineResult<Vec<Memory>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM memories WHERE embedding IS NULL ORDER BY learned_at ASC LIMIT ?1",
            Self::SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![batch as i64], Self::memory_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Walk every `superseded_by`/`supersedes` pair and flag any that
    /// disagree with the authoritative `SUPERSEDES` edge table. Returns the
    /// `memory_id`s of memories whose scalar pointers have no matching edge.
    /// Not on the hot path — intended for a periodic background check.
    pub fn check_consistency(&self) -> EngineResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT memory_id, superseded_by FROM memories WHERE superseded_by IS NOT NULL",
        )?;
        let pairs: Vec<(String, String)> = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
            .filter_map(|r| r.ok())
            .collect();

        let mut edge_stmt = conn.prepare(
            "SELECT 1 FROM memory_edges WHERE source_id = ?1 AND target_id = ?2 AND edge_type = 'supersedes'",
        )?;

        let mut inconsistent = Vec::new();
        for (old_id, new_id) in pairs {
            let has_edge = edge_stmt.exists(params![new_id, old_id])?;
            if !has_edge {
                inconsistent.push(old_id);
            }
        }
        Ok(inconsistent)
    }
}

fn apply_filter(m: &Memory, filter: &SearchFilter) -> bool {
    if let Some(ref prefix) = filter.type_prefix {
        if !m.memory_type.starts_with(prefix.as_str()) {
            return false;
        }
    }
    if filter.currently_valid_only && !m.is_currently_valid() {
        return false;
    }
    if let Some(min_conf) = filter.min_confidence {
        if m.confidence < min_conf {
            return false;
        }
    }
    if let Some(at) = filter.at_time {
        if !m.valid_at(at) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::Tier;
    use chrono::Duration;

    fn sample_memory(id: &str, embedding: Option<Vec<f32>>) -> Memory {
        let now = Utc::now();
        Memory {
            memory_id: id.into(),
            content: format!("content for {id}"),
            memory_type: "preference_food".into(),
            confidence: 0.8,
            embedding,
            valid_from: now,
            valid_until: None,
            learned_at: now,
            superseded_by: None,
            supersedes: None,
            tier: Tier::ShortTerm,
            last_accessed: None,
            access_count: 0,
            source_conversation_id: Some("conv-1".into()),
            token_count_cache: None,
        }
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let store = Store::open_in_memory().unwrap();
        let mem = sample_memory("m1", Some(vec![1.0, 0.0, 0.0]));
        store.upsert_memory(&mem).unwrap();
        let fetched = store.get_memory("m1").unwrap().unwrap();
        assert_eq!(fetched.content, mem.content);
        assert_eq!(fetched.embedding, mem.embedding);
    }

    #[test]
    fn upsert_is_idempotent_on_id() {
        let store = Store::open_in_memory().unwrap();
        let mut mem = sample_memory("m1", None);
        store.upsert_memory(&mem).unwrap();
        mem.confidence = 0.95;
        store.upsert_memory(&mem).unwrap();
        let fetched = store.get_memory("m1").unwrap().unwrap();
        assert_eq!(fetched.confidence, 0.95);
    }

    #[test]
    fn set_supersedes_links_both_sides() {
        let store = Store::open_in_memory().unwrap();
        let old = sample_memory("old", None);
        let new = sample_memory("new", None);
        store.upsert_memory(&old).unwrap();
        store.upsert_memory(&new).unwrap();
        store.set_supersedes(&["old".to_string()], "new", Utc::now()).unwrap();

        let old = store.get_memory("old").unwrap().unwrap();
        let new = store.get_memory("new").unwrap().unwrap();
        assert_eq!(old.superseded_by.as_deref(), Some("new"));
        assert_eq!(new.supersedes.as_deref(), Some("old"));
        assert!(!old.is_currently_valid());
    }

    #[test]
    fn set_supersedes_closes_multiple_predecessors() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_memory(&sample_memory("old1", None)).unwrap();
        store.upsert_memory(&sample_memory("old2", None)).unwrap();
        store.upsert_memory(&sample_memory("new", None)).unwrap();
        store
            .set_supersedes(&["old1".to_string(), "old2".to_string()], "new", Utc::now())
            .unwrap();

        let old1 = store.get_memory("old1").unwrap().unwrap();
        let old2 = store.get_memory("old2").unwrap().unwrap();
        let new = store.get_memory("new").unwrap().unwrap();
        assert_eq!(old1.superseded_by.as_deref(), Some("new"));
        assert_eq!(old2.superseded_by.as_deref(), Some("new"));
        assert_eq!(new.supersedes.as_deref(), Some("old1"));
        assert!(store.check_consistency().unwrap().is_empty());
    }

    #[test]
    fn vector_search_ranks_by_similarity() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_memory(&sample_memory("close", Some(vec![1.0, 0.0]))).unwrap();
        store.upsert_memory(&sample_memory("far", Some(vec![0.0, 1.0]))).unwrap();
        let results = store
            .vector_search(&[1.0, 0.0], &SearchFilter::default(), 10)
            .unwrap();
        assert_eq!(results[0].0.memory_id, "close");
        assert!(results[0].1 > results[1].1);
    }

    #[test]
    fn bm25_search_finds_matching_content() {
        let store = Store::open_in_memory().unwrap();
        let mut mem = sample_memory("m1", None);
        mem.content = "the user prefers decaf coffee in the morning".into();
        store.upsert_memory(&mem).unwrap();
        let results = store.bm25_search("decaf", &SearchFilter::default(), 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.memory_id, "m1");
    }

    #[test]
    fn get_memories_valid_at_respects_interval() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let mut mem = sample_memory("m1", None);
        mem.valid_from = now - Duration::days(10);
        mem.valid_until = Some(now - Duration::days(1));
        store.upsert_memory(&mem).unwrap();

        let at_past = store.get_memories_valid_at(now - Duration::days(5), None).unwrap();
        assert_eq!(at_past.len(), 1);
        let at_now = store.get_memories_valid_at(now, None).unwrap();
        assert!(at_now.is_empty());
    }

    #[test]
    fn update_access_increments_count_and_timestamp() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_memory(&sample_memory("m1", None)).unwrap();
        store.update_access("m1", Utc::now()).unwrap();
        store.update_access("m1", Utc::now()).unwrap();
        let fetched = store.get_memory("m1").unwrap().unwrap();
        assert_eq!(fetched.access_count, 2);
        assert!(fetched.last_accessed.is_some());
    }

    #[test]
    fn traverse_follows_edges_bidirectionally() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_memory(&sample_memory("a", None)).unwrap();
        store.upsert_memory(&sample_memory("b", None)).unwrap();
        store.upsert_memory(&sample_memory("c", None)).unwrap();
        store
            .add_edge(&MemoryEdge {
                source_id: "a".into(),
                target_id: "b".into(),
                edge_type: EdgeType::RelatedTo,
                weight: 1.0,
                created_at: Utc::now(),
            })
            .unwrap();
        store
            .add_edge(&MemoryEdge {
                source_id: "c".into(),
                target_id: "b".into(),
                edge_type: EdgeType::RelatedTo,
                weight: 1.0,
                created_at: Utc::now(),
            })
            .unwrap();

        let reached = store.traverse(&["a".to_string()], 2).unwrap();
        let ids: Vec<&str> = reached.iter().map(|m| m.memory_id.as_str()).collect();
        assert!(ids.contains(&"b"));
        assert!(ids.contains(&"c"));
    }

    #[test]
    fn check_consistency_is_clean_after_set_supersedes() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_memory(&sample_memory("old", None)).unwrap();
        store.upsert_memory(&sample_memory("new", None)).unwrap();
        store.set_supersedes(&["old".to_string()], "new", Utc::now()).unwrap();
        assert!(store.check_consistency().unwrap().is_empty());
    }

    #[test]
    fn check_consistency_flags_a_dangling_pointer() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_memory(&sample_memory("old", None)).unwrap();
        store.upsert_memory(&sample_memory("new", None)).unwrap();
        // Set the scalar pointer directly, bypassing set_supersedes, so no
        // SUPERSEDES edge is written.
        {
            let conn = store.conn.lock();
            conn.execute(
                "UPDATE memories SET superseded_by = 'new' WHERE memory_id = 'old'",
                [],
            )
            .unwrap();
        }
        let flagged = store.check_consistency().unwrap();
        assert_eq!(flagged, vec!["old".to_string()]);
    }
}
