//! Token counter capability: estimate token usage without a provider call.

/// Counts tokens in a piece of text. Registered under the `token_counter`
/// registry category and selected per-LLM via the `token_count` config key.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Heuristic counter: roughly four characters per token, never fewer than
/// the word count.
pub struct SimpleTokenCounter;

impl TokenCounter for SimpleTokenCounter {
    fn count(&self, text: &str) -> usize {
        let by_chars = text.chars().count().div_ceil(4);
        let by_words = text.split_whitespace().count();
        by_chars.max(by_words)
    }
}
