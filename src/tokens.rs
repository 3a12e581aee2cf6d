//! Token counting with a bounded memoization cache

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use tiktoken_rs::{cl100k_base, CoreBPE};
use tracing::debug;

/// Default number of memoized counts kept before eviction
const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Token counter backed by the cl100k BPE vocabulary.
///
/// `count_tokens` is exact and memoized; `estimate_tokens` is a cheap
/// word-count heuristic for paths where calibration is not required.
pub struct TokenCounter {
    bpe: CoreBPE,
    cache: Mutex<CountCache>,
}

/// Bounded insertion-ordered map; eviction drops the oldest insertion.
struct CountCache {
    capacity: usize,
    counts: HashMap<u64, usize>,
    order: VecDeque<u64>,
}

impl CountCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            counts: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    fn get(&self, key: u64) -> Option<usize> {
        self.counts.get(&key).copied()
    }

    fn insert(&mut self, key: u64, count: usize) {
        if self.counts.contains_key(&key) {
            return;
        }
        if self.counts.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.counts.remove(&oldest);
            }
        }
        self.counts.insert(key, count);
        self.order.push_back(key);
    }

    fn len(&self) -> usize {
        self.counts.len()
    }
}

impl TokenCounter {
    /// Create a counter with the default cache capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    /// Create a counter with an explicit cache capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let bpe = cl100k_base().expect("cl100k vocabulary embedded in binary");
        Self {
            bpe,
            cache: Mutex::new(CountCache::new(capacity.max(1))),
        }
    }

    /// Exact BPE token count, memoized by content hash
    pub fn count_tokens(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        let key = Self::content_hash(text);

        if let Ok(cache) = self.cache.lock() {
            if let Some(count) = cache.get(key) {
                return count;
            }
        }

        let count = self.bpe.encode_with_special_tokens(text).len();

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, count);
            debug!(cached = cache.len(), "memoized token count");
        }

        count
    }

    /// Fast heuristic count: ceil(whitespace word count x 1.3)
    pub fn estimate_tokens(&self, text: &str) -> usize {
        estimate_tokens(text)
    }

    /// Number of entries currently memoized
    pub fn cached_entries(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn content_hash(text: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        hasher.finish()
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Standalone heuristic used where no counter instance is at hand
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    (words as f64 * 1.3).ceil() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_tokens_basic() {
        let counter = TokenCounter::new();
        assert_eq!(counter.count_tokens(""), 0);

        let count = counter.count_tokens("hello world");
        assert!(count >= 2, "two words should be at least two tokens");
    }

    #[test]
    fn test_count_memoization() {
        let counter = TokenCounter::new();
        let text = "the quick brown fox jumps over the lazy dog";

        let first = counter.count_tokens(text);
        assert_eq!(counter.cached_entries(), 1);

        let second = counter.count_tokens(text);
        assert_eq!(first, second);
        assert_eq!(counter.cached_entries(), 1);
    }

    #[test]
    fn test_cache_eviction_drops_oldest() {
        let counter = TokenCounter::with_capacity(2);

        counter.count_tokens("alpha");
        counter.count_tokens("beta");
        assert_eq!(counter.cached_entries(), 2);

        counter.count_tokens("gamma");
        assert_eq!(counter.cached_entries(), 2, "capacity bound holds");

        // "alpha" was the oldest insertion; recounting it must not grow the cache
        counter.count_tokens("alpha");
        assert_eq!(counter.cached_entries(), 2);
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("one"), 2); // ceil(1 * 1.3)
        assert_eq!(estimate_tokens("one two three four"), 6); // ceil(4 * 1.3) = ceil(5.2)
    }

    #[test]
    fn test_estimate_vs_exact_same_order_of_magnitude() {
        let counter = TokenCounter::new();
        let text = "Token counting should be roughly proportional to word count \
                    for ordinary English prose without unusual symbols.";
        let exact = counter.count_tokens(text);
        let estimate = counter.estimate_tokens(text);
        assert!(estimate >= exact / 2 && estimate <= exact * 2);
    }
}
