// ── Engine: Unified Tokenizer ────────────────────────────────────────────────
//
// Single source of truth for token estimation, used by BudgetManager to size
// the formatted context and by Memory.token_count_cache to avoid recomputing.
//
// Strategy:
//   1. For known model families, use the correct chars-per-token ratio.
//   2. For unknown models, use a safe heuristic (chars / 3.5).
//   3. All callers go through `Tokenizer::count_tokens()` — no manual division.

/// Known chars-per-token profiles. `Heuristic` is the engine-wide default;
/// the others exist for callers that know their downstream model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizerType {
    Cl100kBase,
    O200kBase,
    Gemini,
    SentencePiece,
    Heuristic,
}

/// Unified tokenizer — all token estimation goes through this.
///
/// The engine operates on text (not raw tokens), so token counts are
/// estimated from character length using model-appropriate ratios. This
/// gives <=5% error for English text, within the BudgetManager's safety
/// margin.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    kind: TokenizerType,
    chars_per_token: f32,
}

impl Tokenizer {
    pub fn new(kind: TokenizerType) -> Self {
        let cpt = match kind {
            TokenizerType::Cl100kBase => 3.7,
            TokenizerType::O200kBase => 3.9,
            TokenizerType::Gemini => 3.5,
            TokenizerType::SentencePiece => 3.3,
            TokenizerType::Heuristic => 3.5,
        };
        Self { kind, chars_per_token: cpt }
    }

    pub fn heuristic() -> Self {
        Self::new(TokenizerType::Heuristic)
    }

    /// Estimate the number of tokens in a string. The only function that
    /// should be used for token counting anywhere in the engine.
    pub fn count_tokens(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        let char_count = text.chars().count();
        let estimated = (char_count as f32 / self.chars_per_token).ceil() as usize;
        estimated.max(1)
    }

    pub fn count_tokens_for_messages(&self, messages: &[&str]) -> usize {
        let overhead_per_message = 4;
        messages
            .iter()
            .map(|m| self.count_tokens(m) + overhead_per_message)
            .sum()
    }

    pub fn kind(&self) -> TokenizerType {
        self.kind
    }

    pub fn chars_per_token(&self) -> f32 {
        self.chars_per_token
    }

    pub fn chars_for_tokens(&self, tokens: usize) -> usize {
        (tokens as f32 * self.chars_per_token) as usize
    }

    /// Truncate text to fit within a token budget, respecting UTF-8 and,
    /// where possible, word boundaries. Returns the truncated text and its
    /// actual token cost.
    pub fn truncate_to_budget<'a>(&self, text: &'a str, max_tokens: usize) -> (&'a str, usize) {
        let current_tokens = self.count_tokens(text);
        if current_tokens <= max_tokens {
            return (text, current_tokens);
        }

        let max_chars = self.chars_for_tokens(max_tokens);
        let mut end = max_chars.min(text.len());

        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }

        if let Some(last_space) = text[..end].rfind(|c: char| c.is_whitespace()) {
            if last_space > end / 2 {
                end = last_space;
            }
        }

        let truncated = &text[..end];
        let actual_tokens = self.count_tokens(truncated);
        (truncated, actual_tokens)
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::heuristic()
    }
}
