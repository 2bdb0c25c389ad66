// ── Engine: Access Tracker ────────────────────────────────────────────────
//
// Fire-and-forget `last_accessed`/`access_count` updates, off the hot
// retrieval path. The Retriever sends memory IDs into a bounded mpsc
// channel; a single background task drains it and writes through the
// Store. Channel-backed background work follows the donor's event-bus
// idiom (`engine/events.rs`, `engine/channels/`) generalized to one
// dedicated consumer instead of a pub/sub bus.

use log::warn;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::engine::store::Store;

pub struct AccessTracker {
    sender: mpsc::Sender<String>,
}

impl AccessTracker {
    /// Spawn the background writer and return a handle plus its join handle.
    pub fn spawn(store: Arc<Store>, queue_capacity: usize) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<String>(queue_capacity);

        let handle = tokio::spawn(async move {
            while let Some(memory_id) = rx.recv().await {
                if let Err(e) = store.update_access(&memory_id, chrono::Utc::now()) {
                    warn!("[access_tracker] failed to record access for {memory_id}: {e}");
                }
            }
        });

        (Self { sender: tx }, handle)
    }

    /// Record an access. Never blocks the caller: if the queue is full, the
    /// access is dropped and logged rather than backing up the retrieval
    /// path — a missed access-count increment is inconsequential.
    pub fn record(&self, memory_id: &str) {
        if let Err(e) = self.sender.try_send(memory_id.to_string()) {
            warn!("[access_tracker] queue full, dropping access for {memory_id}: {e}");
        }
    }
}
