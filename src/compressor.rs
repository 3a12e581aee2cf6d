//! Token-budgeted chunk compression: full, summary, keywords or drop

use crate::error::Result;
use crate::llm::{system_message, user_message, LlmClient};
use crate::scorer::ScoredChunk;
use crate::tokens::TokenCounter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Summary compression aims at this fraction of the original tokens
const SUMMARY_RATIO: f32 = 0.35;
/// Keyword compression aims at this fraction of the original tokens
const KEYWORD_RATIO: f32 = 0.10;

pub(crate) const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "if", "then", "else", "for", "to", "of", "in", "on",
    "at", "by", "with", "from", "as", "is", "are", "was", "were", "be", "been", "being", "it",
    "its", "this", "that", "these", "those", "you", "your", "we", "our", "they", "their", "he",
    "she", "his", "her", "not", "no", "yes", "do", "does", "did", "will", "would", "can", "could",
    "should", "may", "might", "have", "has", "had", "there", "here", "what", "when", "where",
    "which", "who", "how", "why", "all", "any", "each", "more", "most", "other", "some", "such",
];

/// Fidelity level applied to a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompressionLevel {
    Full,
    Summary,
    Keywords,
}

/// A chunk after compression, immutable per request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressedChunk {
    pub original_chunk_id: Uuid,
    pub document_id: Uuid,
    pub compression_level: CompressionLevel,
    pub content: String,
    pub original_token_count: usize,
    pub compressed_token_count: usize,
    pub relevance_score: f32,
}

/// Per-level counts and token savings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionStats {
    pub full_count: usize,
    pub summary_count: usize,
    pub keywords_count: usize,
    pub dropped_count: usize,
    pub original_tokens: usize,
    pub compressed_tokens: usize,
    /// 1 - compressed/original, in [0,1]
    pub savings_percent: f32,
}

/// Result of compressing a scored chunk list
#[derive(Debug, Clone)]
pub struct CompressionResult {
    pub chunks: Vec<CompressedChunk>,
    pub total_token_count: usize,
    pub stats: CompressionStats,
}

/// Compression tuning for one request
#[derive(Debug, Clone)]
pub struct CompressorOptions {
    pub total_token_budget: usize,
    /// Score at or above which a chunk may stay verbatim
    pub full_threshold: f32,
    /// Score at or above which a chunk is summarized rather than keyworded
    pub summary_threshold: f32,
}

impl Default for CompressorOptions {
    fn default() -> Self {
        Self {
            total_token_budget: 4000,
            full_threshold: 0.7,
            summary_threshold: 0.4,
        }
    }
}

/// Allocates each chunk the highest-fidelity level that fits the budget
pub struct ContextCompressor {
    llm: Option<Arc<dyn LlmClient>>,
    counter: Arc<TokenCounter>,
}

impl ContextCompressor {
    pub fn new(llm: Option<Arc<dyn LlmClient>>, counter: Arc<TokenCounter>) -> Self {
        Self { llm, counter }
    }

    /// Compress chunks into the budget, best scores first
    pub async fn compress(
        &self,
        scored: &[ScoredChunk],
        options: &CompressorOptions,
    ) -> Result<CompressionResult> {
        let mut ordered: Vec<&ScoredChunk> = scored.iter().collect();
        ordered.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut chunks = Vec::new();
        let mut stats = CompressionStats::default();
        let mut remaining = options.total_token_budget;

        for chunk in ordered {
            let original_tokens = self.counter.count_tokens(&chunk.content);
            stats.original_tokens += original_tokens;

            if chunk.final_score >= options.full_threshold && original_tokens <= remaining {
                remaining -= original_tokens;
                stats.full_count += 1;
                stats.compressed_tokens += original_tokens;
                chunks.push(Self::compressed(
                    chunk,
                    CompressionLevel::Full,
                    chunk.content.clone(),
                    original_tokens,
                    original_tokens,
                ));
                continue;
            }

            if chunk.final_score >= options.summary_threshold {
                let target = target_tokens(original_tokens, SUMMARY_RATIO);
                let summary = self.summarize(&chunk.content, target).await;
                let summary_tokens = self.counter.count_tokens(&summary).min(original_tokens);
                if summary_tokens <= remaining {
                    remaining -= summary_tokens;
                    stats.summary_count += 1;
                    stats.compressed_tokens += summary_tokens;
                    chunks.push(Self::compressed(
                        chunk,
                        CompressionLevel::Summary,
                        summary,
                        original_tokens,
                        summary_tokens,
                    ));
                    continue;
                }
            }

            let target = target_tokens(original_tokens, KEYWORD_RATIO);
            let keywords = self.keywords(&chunk.content, target).await;
            let keyword_tokens = self.counter.count_tokens(&keywords).min(original_tokens);
            if keyword_tokens <= remaining && !keywords.is_empty() {
                remaining -= keyword_tokens;
                stats.keywords_count += 1;
                stats.compressed_tokens += keyword_tokens;
                chunks.push(Self::compressed(
                    chunk,
                    CompressionLevel::Keywords,
                    keywords,
                    original_tokens,
                    keyword_tokens,
                ));
                continue;
            }

            stats.dropped_count += 1;
        }

        stats.savings_percent = savings(stats.original_tokens, stats.compressed_tokens);
        let total_token_count = stats.compressed_tokens;

        debug!(
            full = stats.full_count,
            summary = stats.summary_count,
            keywords = stats.keywords_count,
            dropped = stats.dropped_count,
            "compression complete"
        );

        Ok(CompressionResult {
            chunks,
            total_token_count,
            stats,
        })
    }

    /// Budget walk using only token counts; no content is generated.
    /// Produces the same stats structure the full pass would.
    pub fn estimate_compressed_size(
        &self,
        scored: &[ScoredChunk],
        options: &CompressorOptions,
    ) -> CompressionResult {
        let mut ordered: Vec<&ScoredChunk> = scored.iter().collect();
        ordered.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut stats = CompressionStats::default();
        let mut remaining = options.total_token_budget;
        let mut chunks = Vec::new();

        for chunk in ordered {
            let original_tokens = self.counter.count_tokens(&chunk.content);
            stats.original_tokens += original_tokens;

            let (level, tokens) = if chunk.final_score >= options.full_threshold
                && original_tokens <= remaining
            {
                (CompressionLevel::Full, original_tokens)
            } else if chunk.final_score >= options.summary_threshold
                && target_tokens(original_tokens, SUMMARY_RATIO) <= remaining
            {
                (
                    CompressionLevel::Summary,
                    target_tokens(original_tokens, SUMMARY_RATIO),
                )
            } else if target_tokens(original_tokens, KEYWORD_RATIO) <= remaining {
                (
                    CompressionLevel::Keywords,
                    target_tokens(original_tokens, KEYWORD_RATIO),
                )
            } else {
                stats.dropped_count += 1;
                continue;
            };

            remaining -= tokens;
            stats.compressed_tokens += tokens;
            match level {
                CompressionLevel::Full => stats.full_count += 1,
                CompressionLevel::Summary => stats.summary_count += 1,
                CompressionLevel::Keywords => stats.keywords_count += 1,
            }
            chunks.push(Self::compressed(chunk, level, String::new(), original_tokens, tokens));
        }

        stats.savings_percent = savings(stats.original_tokens, stats.compressed_tokens);
        CompressionResult {
            total_token_count: stats.compressed_tokens,
            chunks,
            stats,
        }
    }

    fn compressed(
        chunk: &ScoredChunk,
        level: CompressionLevel,
        content: String,
        original: usize,
        compressed: usize,
    ) -> CompressedChunk {
        CompressedChunk {
            original_chunk_id: chunk.chunk_id,
            document_id: chunk.document_id,
            compression_level: level,
            content,
            original_token_count: original,
            compressed_token_count: compressed,
            relevance_score: chunk.final_score,
        }
    }

    /// LLM summary with a deterministic leading-sentence fallback
    async fn summarize(&self, content: &str, target_tokens: usize) -> String {
        if let Some(llm) = &self.llm {
            let messages = vec![
                system_message(format!(
                    "Summarize the passage in at most {} tokens. Keep concrete facts, \
                     identifiers and numbers. Respond with only the summary.",
                    target_tokens
                )),
                user_message(content),
            ];
            match llm.generate(&messages).await {
                Ok(response) => {
                    let summary = response.text.trim().to_string();
                    if !summary.is_empty()
                        && self.counter.count_tokens(&summary)
                            <= self.counter.count_tokens(content)
                    {
                        return summary;
                    }
                    warn!("LLM summary unusable, using leading sentences");
                }
                Err(e) => warn!(error = %e, "LLM summary failed, using leading sentences"),
            }
        }
        leading_sentences(content, target_tokens, &self.counter)
    }

    /// LLM keyword extraction with a frequency-ranked fallback
    async fn keywords(&self, content: &str, target_tokens: usize) -> String {
        if let Some(llm) = &self.llm {
            let messages = vec![
                system_message(format!(
                    "Extract the most salient terms from the passage as a comma-separated \
                     list of at most {} tokens. Respond with only the list.",
                    target_tokens
                )),
                user_message(content),
            ];
            match llm.generate(&messages).await {
                Ok(response) => {
                    let keywords = response.text.trim().to_string();
                    if !keywords.is_empty()
                        && self.counter.count_tokens(&keywords) <= target_tokens.max(1)
                    {
                        return keywords;
                    }
                    warn!("LLM keywords unusable, using frequency ranking");
                }
                Err(e) => warn!(error = %e, "LLM keywords failed, using frequency ranking"),
            }
        }
        frequency_keywords(content, target_tokens, &self.counter)
    }
}

fn target_tokens(original: usize, ratio: f32) -> usize {
    ((original as f32) * ratio).ceil() as usize
}

fn savings(original: usize, compressed: usize) -> f32 {
    if original == 0 {
        return 0.0;
    }
    (1.0 - compressed as f32 / original as f32).clamp(0.0, 1.0)
}

/// Leading sentences up to the token target; the first sentence is always
/// kept whole so concrete claims survive summarization
fn leading_sentences(content: &str, target: usize, counter: &TokenCounter) -> String {
    let mut out = String::new();
    for sentence in content.split_inclusive(['.', '!', '?']) {
        let candidate = format!("{}{}", out, sentence);
        if !out.is_empty() && counter.count_tokens(&candidate) > target {
            break;
        }
        out = candidate;
        if counter.count_tokens(&out) >= target {
            break;
        }
    }
    if out.trim().is_empty() {
        // No sentence punctuation; take leading words
        let words: Vec<&str> = content.split_whitespace().take(target.max(1)).collect();
        return truncate_to_tokens(words.join(" "), target, counter);
    }
    out.trim().to_string()
}

/// Top unique content words by frequency, stopwords removed
fn frequency_keywords(content: &str, target: usize, counter: &TokenCounter) -> String {
    let mut frequencies: HashMap<String, usize> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for word in content.split_whitespace() {
        let cleaned = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if cleaned.len() < 3 || STOPWORDS.contains(&cleaned.as_str()) {
            continue;
        }
        if !frequencies.contains_key(&cleaned) {
            order.push(cleaned.clone());
        }
        *frequencies.entry(cleaned).or_insert(0) += 1;
    }

    // Frequency descending, first occurrence as the tie-break
    order.sort_by(|a, b| {
        frequencies[b]
            .cmp(&frequencies[a])
            .then_with(|| a.cmp(b))
    });

    let mut keywords = String::new();
    for word in order {
        let candidate = if keywords.is_empty() {
            word.clone()
        } else {
            format!("{}, {}", keywords, word)
        };
        if !keywords.is_empty() && counter.count_tokens(&candidate) > target.max(1) {
            break;
        }
        keywords = candidate;
    }
    keywords
}

/// Hard truncation keeping the result within the token target
fn truncate_to_tokens(text: String, target: usize, counter: &TokenCounter) -> String {
    if counter.count_tokens(&text) <= target.max(1) {
        return text;
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut keep = words.len();
    while keep > 1 {
        let candidate = words[..keep].join(" ");
        if counter.count_tokens(&candidate) <= target.max(1) {
            return candidate;
        }
        keep = keep * 3 / 4;
    }
    words.first().unwrap_or(&"").to_string()
}
