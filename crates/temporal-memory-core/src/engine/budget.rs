// ── Engine: Budget Manager ────────────────────────────────────────────────
//
// Packs ranked memories into the final formatted context within a token
// budget. `HardCutoff` stops at the first memory that would overflow the
// budget; `Truncate` additionally truncates that one memory to fill the
// remaining space (`Tokenizer::truncate_to_budget`). Token counts are cached
// on the memory's `token_count_cache` field via `Store::set_token_count_cache`
// so repeat retrievals of the same memory don't re-tokenize its content.

use crate::atoms::config::EngineConfig;
use crate::atoms::types::{BudgetStrategy, FormattedMemory, RankedMemory};
use crate::engine::store::Store;
use crate::engine::tokenizer::Tokenizer;

pub struct BudgetManager<'a> {
    store: &'a Store,
    tokenizer: Tokenizer,
    config: &'a EngineConfig,
}

impl<'a> BudgetManager<'a> {
    pub fn new(store: &'a Store, config: &'a EngineConfig) -> Self {
        Self { store, tokenizer: Tokenizer::default(), config }
    }

    /// Pack `ranked` into a budget of `budget_tokens - budget_formatting_overhead`,
    /// highest composite score first. Returns the formatted context.
    pub fn pack(&self, ranked: Vec<RankedMemory>) -> Vec<FormattedMemory> {
        let mut remaining = self
            .config
            .budget_tokens
            .saturating_sub(self.config.budget_formatting_overhead);
        let mut out = Vec::new();

        for r in ranked {
            let tokens = self.token_count(&r);

            if tokens <= remaining {
                remaining -= tokens;
                let content = r.memory.content.clone();
                out.push(self.format(r, content, tokens));
                continue;
            }

            match self.config.budget_strategy {
                BudgetStrategy::HardCutoff => break,
                BudgetStrategy::Truncate => {
                    if remaining == 0 {
                        break;
                    }
                    let (truncated, cost) = self.tokenizer.truncate_to_budget(&r.memory.content, remaining);
                    let truncated = truncated.to_string();
                    out.push(self.format(r, truncated, cost));
                    break;
                }
            }
        }

        out
    }

    fn token_count(&self, r: &RankedMemory) -> usize {
        if let Some(cached) = r.memory.token_count_cache {
            return cached;
        }
        let count = self.tokenizer.count_tokens(&r.memory.content);
        let _ = self.store.set_token_count_cache(&r.memory.memory_id, count);
        count
    }

    fn format(&self, r: RankedMemory, content: String, token_cost: usize) -> FormattedMemory {
        FormattedMemory {
            memory_id: r.memory.memory_id,
            content,
            memory_type: r.memory.memory_type,
            confidence: r.memory.confidence,
            valid_from: r.memory.valid_from,
            valid_until: r.memory.valid_until,
            composite_score: r.composite_score,
            source_conversation_id: r.memory.source_conversation_id,
            token_cost,
        }
    }
}
