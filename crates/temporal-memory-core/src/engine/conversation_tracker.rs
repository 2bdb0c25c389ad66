// ── Engine: Conversation Tracker ──────────────────────────────────────────
//
// Buffers turns per conversation and hands the buffer to the StorageService
// when a conversation boundary is reached: an explicit `finish()` call, or
// `t_idle_secs` of inactivity (checked by a background sweep). Mirrors the
// donor's per-session state pattern (`engine/sessions/mod.rs`: one entry per
// conversation, looked up by ID) without the cross-surface routing table the
// donor needed for its many chat backends.

use chrono::Utc;
use log::warn;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use crate::atoms::config::EngineConfig;
use crate::atoms::types::Turn;
use crate::engine::embedding_client::EmbeddingClient;
use crate::engine::extractor::Extractor;
use crate::engine::store::Store;
use crate::engine::storage_service::StorageService;

struct ConversationBuffer {
    turns: Vec<Turn>,
    last_turn_at: chrono::DateTime<Utc>,
    /// Message count as of the last time this conversation's history was
    /// observed (by `push_turn` or `sync_transcript`).
    checkpoint_count: usize,
    /// Hash of the first turn's text, used to detect a conversation id being
    /// reused for an unrelated history.
    first_turn_hash: Option<u64>,
}

fn hash_text(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

pub struct ConversationTracker {
    buffers: Mutex<HashMap<String, ConversationBuffer>>,
    t_idle: Duration,
    extraction_queue_capacity: usize,
}

impl ConversationTracker {
    pub fn new(t_idle_secs: u64, extraction_queue_capacity: usize) -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            t_idle: Duration::from_secs(t_idle_secs),
            extraction_queue_capacity: extraction_queue_capacity.max(1),
        }
    }

    /// Append a turn to a conversation's buffer, creating it if new. If the
    /// buffer exceeds `extraction_queue_capacity`, drops the second-oldest
    /// turn — keeping the first (which anchors `first_turn_hash`) and the
    /// most recent turns, rather than evicting in strict FIFO order.
    pub fn push_turn(&self, conversation_id: &str, turn: Turn) {
        let mut buffers = self.buffers.lock();
        let first_hash = hash_text(&turn.text);
        let entry = buffers.entry(conversation_id.to_string()).or_insert_with(|| ConversationBuffer {
            turns: Vec::new(),
            last_turn_at: turn.timestamp,
            checkpoint_count: 0,
            first_turn_hash: Some(first_hash),
        });
        entry.last_turn_at = turn.timestamp;
        entry.turns.push(turn);
        entry.checkpoint_count = entry.turns.len();

        if entry.turns.len() > self.extraction_queue_capacity {
            warn!(
                "[conversation_tracker] buffer for {conversation_id} exceeded capacity {}, dropping oldest-but-one turn",
                self.extraction_queue_capacity
            );
            if entry.turns.len() > 1 {
                entry.turns.remove(1);
            }
        }
    }

    /// Detect whether `transcript` (a full history supplied to
    /// `IngestConversation`) represents a materially different conversation
    /// than whatever is buffered under `conversation_id` from streaming
    /// `push_turn` calls — the message count dropped by half or more, or the
    /// first turn's content changed — and if so, discard the stale buffer so
    /// the reused id doesn't mix old and new history. Returns whether a
    /// stale buffer was flushed.
    pub fn sync_transcript(&self, conversation_id: &str, transcript: &[Turn]) -> bool {
        let mut buffers = self.buffers.lock();
        let Some(existing) = buffers.get(conversation_id) else {
            return false;
        };

        let incoming_count = transcript.len();
        let incoming_first_hash = transcript.first().map(|t| hash_text(&t.text));

        let count_dropped =
            existing.checkpoint_count > 0 && incoming_count * 2 < existing.checkpoint_count;
        let hash_changed =
            existing.first_turn_hash.is_some() && existing.first_turn_hash != incoming_first_hash;

        if count_dropped || hash_changed {
            warn!("[conversation_tracker] material change detected for {conversation_id}, flushing stale buffer");
            buffers.remove(conversation_id);
            true
        } else {
            false
        }
    }

    /// Explicitly end a conversation, returning its buffered turns for
    /// extraction. Used by the `finish` path of `IngestConversation`.
    pub fn finish(&self, conversation_id: &str) -> Vec<Turn> {
        self.buffers
            .lock()
            .remove(conversation_id)
            .map(|b| b.turns)
            .unwrap_or_default()
    }

    /// Conversation IDs whose buffer has been idle for at least `t_idle`,
    /// removing them from tracking. Called by the idle sweep.
    pub fn drain_idle(&self, now: chrono::DateTime<Utc>) -> Vec<(String, Vec<Turn>)> {
        let mut buffers = self.buffers.lock();
        let idle_ids: Vec<String> = buffers
            .iter()
            .filter(|(_, b)| {
                now.signed_duration_since(b.last_turn_at)
                    .to_std()
                    .map(|d| d >= self.t_idle)
                    .unwrap_or(false)
            })
            .map(|(id, _)| id.clone())
            .collect();

        idle_ids
            .into_iter()
            .filter_map(|id| buffers.remove(&id).map(|b| (id, b.turns)))
            .collect()
    }

    /// Spawn a background sweep that periodically hands idle conversations'
    /// buffered turns to a freshly built `StorageService`. The engine's
    /// shared components are `Arc`-held so the task can outlive the caller.
    pub fn spawn_idle_sweep(
        tracker: Arc<Self>,
        store: Arc<Store>,
        extractor: Arc<Extractor>,
        embedding_client: Arc<EmbeddingClient>,
        config: Arc<EngineConfig>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let idle = tracker.drain_idle(Utc::now());
                if idle.is_empty() {
                    continue;
                }
                let storage = StorageService::new(&store, &extractor, &embedding_client, &config);
                for (conversation_id, turns) in idle {
                    for turn in &turns {
                        storage.ingest_turn(turn, Some(&conversation_id)).await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn turn(text: &str, at: chrono::DateTime<Utc>) -> Turn {
        Turn { role: "user".into(), text: text.into(), timestamp: at }
    }

    #[test]
    fn finish_returns_and_clears_buffered_turns() {
        let tracker = ConversationTracker::new(600, 64);
        let now = Utc::now();
        tracker.push_turn("c1", turn("hello", now));
        tracker.push_turn("c1", turn("world", now));

        let turns = tracker.finish("c1");
        assert_eq!(turns.len(), 2);
        assert!(tracker.finish("c1").is_empty());
    }

    #[test]
    fn drain_idle_only_returns_conversations_past_the_threshold() {
        let tracker = ConversationTracker::new(600, 64);
        let now = Utc::now();
        tracker.push_turn("stale", turn("hi", now - ChronoDuration::seconds(700)));
        tracker.push_turn("fresh", turn("hi", now));

        let idle = tracker.drain_idle(now);
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].0, "stale");
        assert!(tracker.finish("fresh").len() == 1);
    }

    #[test]
    fn push_turn_drops_oldest_but_one_past_capacity() {
        let tracker = ConversationTracker::new(600, 3);
        let now = Utc::now();
        tracker.push_turn("c1", turn("first", now));
        tracker.push_turn("c1", turn("second", now));
        tracker.push_turn("c1", turn("third", now));
        tracker.push_turn("c1", turn("fourth", now));

        let turns = tracker.finish("c1");
        assert_eq!(turns.len(), 3);
        let texts: Vec<&str> = turns.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "third", "fourth"]);
    }

    #[test]
    fn sync_transcript_flushes_buffer_when_message_count_drops_sharply() {
        let tracker = ConversationTracker::new(600, 64);
        let now = Utc::now();
        for i in 0..10 {
            tracker.push_turn("c1", turn(&format!("turn {i}"), now));
        }

        let shrunk_transcript = vec![turn("turn 0", now), turn("turn 1", now)];
        assert!(tracker.sync_transcript("c1", &shrunk_transcript));
        assert!(tracker.finish("c1").is_empty());
    }

    #[test]
    fn sync_transcript_flushes_buffer_when_first_turn_changes() {
        let tracker = ConversationTracker::new(600, 64);
        let now = Utc::now();
        tracker.push_turn("c1", turn("original opener", now));
        tracker.push_turn("c1", turn("second turn", now));

        let different_history = vec![turn("a completely different opener", now), turn("second turn", now)];
        assert!(tracker.sync_transcript("c1", &different_history));
        assert!(tracker.finish("c1").is_empty());
    }

    #[test]
    fn sync_transcript_is_a_no_op_for_a_consistent_history() {
        let tracker = ConversationTracker::new(600, 64);
        let now = Utc::now();
        tracker.push_turn("c1", turn("original opener", now));
        tracker.push_turn("c1", turn("second turn", now));

        let same_history = vec![turn("original opener", now), turn("second turn", now)];
        assert!(!tracker.sync_transcript("c1", &same_history));
        assert_eq!(tracker.finish("c1").len(), 2);
    }
}
