// ── Engine: Backfill Worker ──────────────────────────────────────────────────
//
// Background loop that finds memories with no embedding yet and fills them
// in on a fixed interval. Each write is conditional on the embedding still
// being null (`Store::set_embedding_if_null`) so it never clobbers a write
// that raced it — e.g. a retry by the StorageService on the same memory.

use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::atoms::config::EngineConfig;
use crate::engine::embedding_client::EmbeddingClient;
use crate::engine::store::Store;

pub struct BackfillWorker {
    store: Arc<Store>,
    embedding_client: Arc<EmbeddingClient>,
    interval: Duration,
    batch: usize,
}

impl BackfillWorker {
    pub fn new(store: Arc<Store>, embedding_client: Arc<EmbeddingClient>, config: &EngineConfig) -> Self {
        Self {
            store,
            embedding_client,
            interval: Duration::from_secs(config.backfill_interval_secs),
            batch: config.backfill_batch,
        }
    }

    /// Spawn the periodic backfill loop; returns its join handle so callers
    /// can await or abort it on shutdown.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    warn!("[backfill] cycle failed: {e}");
                }
            }
        })
    }

    /// Run a single backfill cycle: claim up to `batch` unembedded memories,
    /// embed them, and write back. Returns the number successfully embedded.
    pub async fn run_once(&self) -> crate::atoms::error::EngineResult<usize> {
        let pending = self.store.get_unembedded(self.batch)?;
        if pending.is_empty() {
            return Ok(0);
        }

        info!("[backfill] embedding {} pending memories", pending.len());
        let mut filled = 0usize;
        for mem in &pending {
            match self.embedding_client.embed(&mem.content).await {
                Ok(vec) => {
                    if self.store.set_embedding_if_null(&mem.memory_id, &vec)? {
                        filled += 1;
                    }
                }
                Err(e) => {
                    warn!("[backfill] embed failed for {}: {e}", mem.memory_id);
                }
            }
        }
        info!("[backfill] filled {filled}/{} memories", pending.len());
        Ok(filled)
    }
}
