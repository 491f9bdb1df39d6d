//! Token counting
//!
//! Budget arithmetic throughout the pipeline runs on these counts. Models
//! without a precise tokenizer get a deterministic estimate: the same input
//! always yields the same count, and counts are never derived from raw byte
//! lengths elsewhere in the engine.

use std::{collections::HashMap, sync::Mutex};

use crate::chat::ChatMessage;

/// Fixed token overhead charged per chat message for role tags and framing
const PER_MESSAGE_OVERHEAD: usize = 4;

/// Deterministic token counter with an internal cache
pub struct TokenCounter {
    cache: Mutex<HashMap<String, usize>>,
}

impl TokenCounter {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Count tokens of a text
    pub fn count(&self, content: &str) -> usize {
        if content.is_empty() {
            return 0;
        }

        if let Ok(cache) = self.cache.lock() {
            if let Some(&count) = cache.get(content) {
                return count;
            }
        }

        let estimated = Self::estimate(content);

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(content.to_string(), estimated);
        }

        estimated
    }

    /// Count tokens of a message list, including per-message overhead
    pub fn count_messages(&self, messages: &[ChatMessage]) -> usize {
        messages
            .iter()
            .map(|m| self.count(&m.content) + PER_MESSAGE_OVERHEAD)
            .sum()
    }

    /// Heuristic: roughly one token per four characters, at least one for
    /// non-empty input
    fn estimate(content: &str) -> usize {
        let estimated = content.chars().count().div_ceil(4);
        estimated.max(1)
    }

    /// Clear the cache
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    /// Number of cached entries
    pub fn cache_size(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_counts_zero() {
        let counter = TokenCounter::new();
        assert_eq!(counter.count(""), 0);
    }

    #[test]
    fn non_empty_counts_at_least_one() {
        let counter = TokenCounter::new();
        assert_eq!(counter.count("a"), 1);
        assert!(counter.count("hello world") > 1);
    }

    #[test]
    fn counts_are_cached() {
        let counter = TokenCounter::new();
        let first = counter.count("some content");
        assert_eq!(counter.cache_size(), 1);
        assert_eq!(counter.count("some content"), first);
        assert_eq!(counter.cache_size(), 1);
        counter.clear_cache();
        assert_eq!(counter.cache_size(), 0);
    }

    #[test]
    fn message_counting_adds_overhead() {
        let counter = TokenCounter::new();
        let messages = vec![ChatMessage::system("head"), ChatMessage::user("prompt")];
        let expected = counter.count("head") + counter.count("prompt") + 2 * 4;
        assert_eq!(counter.count_messages(&messages), expected);
    }

    proptest! {
        #[test]
        fn deterministic_for_same_input(content in ".{0,200}") {
            let counter = TokenCounter::new();
            let a = counter.count(&content);
            counter.clear_cache();
            let b = counter.count(&content);
            prop_assert_eq!(a, b);
        }

        #[test]
        fn count_grows_with_repetition(content in ".{1,50}") {
            let counter = TokenCounter::new();
            let doubled = format!("{content}{content}{content}{content}");
            prop_assert!(counter.count(&doubled) >= counter.count(&content));
        }
    }
}
