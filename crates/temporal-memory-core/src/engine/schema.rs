// ── Engine: Database Schema ─────────────────────────────────────────────────
// Single `memories` table carrying the bi-temporal entity from spec §3, a
// `memory_edges` graph table, and an append-only audit log. All statements
// are idempotent (CREATE IF NOT EXISTS), matching the donor's migration
// idiom (`engram/schema.rs::run_engram_migrations`).

use log::info;
use rusqlite::Connection;

use crate::atoms::error::EngineResult;

/// Run all schema migrations against an open connection. Safe to call on
/// every startup and from integration tests against an in-memory database.
pub fn run_migrations(conn: &Connection) -> EngineResult<()> {
    info!("[schema] running migrations");
    conn.execute_batch(SCHEMA)?;
    info!("[schema] migrations complete");
    Ok(())
}

const SCHEMA: &str = "
    -- ═══════════════════════════════════════════════════════════════
    -- Memory: the single first-class bi-temporal entity.
    -- ═══════════════════════════════════════════════════════════════
    CREATE TABLE IF NOT EXISTS memories (
        memory_id TEXT PRIMARY KEY,
        content TEXT NOT NULL,
        memory_type TEXT NOT NULL,
        confidence REAL NOT NULL,
        embedding BLOB,
        valid_from TEXT NOT NULL,
        valid_until TEXT,
        learned_at TEXT NOT NULL,
        superseded_by TEXT,
        supersedes TEXT,
        tier TEXT NOT NULL DEFAULT 'short_term',
        last_accessed TEXT,
        access_count INTEGER NOT NULL DEFAULT 0,
        source_conversation_id TEXT,
        token_count_cache INTEGER
    );

    CREATE INDEX IF NOT EXISTS idx_memories_valid_from ON memories(valid_from);
    CREATE INDEX IF NOT EXISTS idx_memories_valid_until ON memories(valid_until);
    CREATE INDEX IF NOT EXISTS idx_memories_learned_at ON memories(learned_at);
    CREATE INDEX IF NOT EXISTS idx_memories_valid_range ON memories(valid_from, valid_until);
    CREATE INDEX IF NOT EXISTS idx_memories_type ON memories(memory_type);
    CREATE INDEX IF NOT EXISTS idx_memories_superseded_by ON memories(superseded_by);

    -- FTS5 index for BM25 keyword search, external-content mode over `memories`.
    CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
        memory_id UNINDEXED,
        content,
        memory_type UNINDEXED,
        content=memories,
        content_rowid=rowid,
        tokenize='porter unicode61'
    );

    CREATE TRIGGER IF NOT EXISTS memories_fts_insert AFTER INSERT ON memories
    BEGIN
        INSERT INTO memories_fts(rowid, memory_id, content, memory_type)
        VALUES (NEW.rowid, NEW.memory_id, NEW.content, NEW.memory_type);
    END;

    CREATE TRIGGER IF NOT EXISTS memories_fts_delete AFTER DELETE ON memories
    BEGIN
        INSERT INTO memories_fts(memories_fts, rowid, memory_id, content, memory_type)
        VALUES ('delete', OLD.rowid, OLD.memory_id, OLD.content, OLD.memory_type);
    END;

    CREATE TRIGGER IF NOT EXISTS memories_fts_update AFTER UPDATE ON memories
    BEGIN
        INSERT INTO memories_fts(memories_fts, rowid, memory_id, content, memory_type)
        VALUES ('delete', OLD.rowid, OLD.memory_id, OLD.content, OLD.memory_type);
        INSERT INTO memories_fts(rowid, memory_id, content, memory_type)
        VALUES (NEW.rowid, NEW.memory_id, NEW.content, NEW.memory_type);
    END;

    -- ═══════════════════════════════════════════════════════════════
    -- Memory edges: authoritative SUPERSEDES / RELATED_TO graph.
    -- ═══════════════════════════════════════════════════════════════
    CREATE TABLE IF NOT EXISTS memory_edges (
        source_id TEXT NOT NULL,
        target_id TEXT NOT NULL,
        edge_type TEXT NOT NULL,
        weight REAL NOT NULL DEFAULT 1.0,
        created_at TEXT NOT NULL,
        PRIMARY KEY (source_id, target_id, edge_type)
    );

    CREATE INDEX IF NOT EXISTS idx_edges_source ON memory_edges(source_id);
    CREATE INDEX IF NOT EXISTS idx_edges_target ON memory_edges(target_id);
    CREATE INDEX IF NOT EXISTS idx_edges_type ON memory_edges(edge_type);

    -- ═══════════════════════════════════════════════════════════════
    -- Append-only audit log, read by the background consistency check.
    -- ═══════════════════════════════════════════════════════════════
    CREATE TABLE IF NOT EXISTS memory_audit_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        operation TEXT NOT NULL,
        memory_id TEXT,
        details_json TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE INDEX IF NOT EXISTS idx_audit_memory ON memory_audit_log(memory_id);
    CREATE INDEX IF NOT EXISTS idx_audit_time ON memory_audit_log(created_at);
";
