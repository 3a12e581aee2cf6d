//! Splitting extracted text into positioned, token-counted chunks

use crate::error::{ChunkError, Result};
use crate::extract::ExtractMetadata;
use crate::tokens::{estimate_tokens, TokenCounter};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Chunking strategy, chosen from structural hints of the extracted text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStrategy {
    /// Split at heading boundaries, keeping a heading with its body
    HeadingAware,
    /// Preserve function/class boundaries, never split inside a fenced block
    CodeAware,
    /// Paragraph-boundary soft splits against a token target
    Semantic,
}

/// Chunker tuning parameters
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Soft token target per chunk
    pub target_tokens: usize,
    /// Upper soft bound before a split is forced at the next boundary
    pub max_tokens: usize,
    /// Hard cap no chunk may exceed
    pub hard_cap_tokens: usize,
    /// Maximum overlap as a fraction of the chunk
    pub overlap_ratio: f32,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_tokens: 500,
            max_tokens: 800,
            hard_cap_tokens: 1200,
            overlap_ratio: 0.1,
        }
    }
}

/// A positioned slice of a document's text
#[derive(Debug, Clone)]
pub struct TextChunk {
    /// 0-based, stable position within the document
    pub position: usize,
    pub content: String,
    pub token_count: usize,
    pub metadata: HashMap<String, String>,
}

/// Splits one document's extracted text into an ordered chunk sequence
pub struct Chunker {
    config: ChunkerConfig,
    counter: Arc<TokenCounter>,
}

impl Chunker {
    pub fn new(config: ChunkerConfig, counter: Arc<TokenCounter>) -> Self {
        Self { config, counter }
    }

    /// Pick a strategy from the extractor's structural hints
    pub fn select_strategy(metadata: &ExtractMetadata) -> ChunkStrategy {
        if metadata.code_language.is_some() {
            ChunkStrategy::CodeAware
        } else if metadata.has_headings {
            ChunkStrategy::HeadingAware
        } else {
            ChunkStrategy::Semantic
        }
    }

    /// Chunk text using the strategy implied by the structural hints
    pub fn chunk(&self, text: &str, metadata: &ExtractMetadata) -> Result<Vec<TextChunk>> {
        if text.trim().is_empty() {
            return Err(ChunkError::EmptyInput.into());
        }

        let strategy = Self::select_strategy(metadata);
        let segments = match strategy {
            ChunkStrategy::HeadingAware => self.split_by_headings(text)?,
            ChunkStrategy::CodeAware => self.split_code(text)?,
            ChunkStrategy::Semantic => self.split_semantic(text)?,
        };

        let mut pieces = Vec::with_capacity(segments.len());
        for segment in segments {
            pieces.extend(self.enforce_hard_cap(segment)?);
        }

        let mut chunks = Vec::with_capacity(pieces.len());
        for (position, content) in pieces.into_iter().enumerate() {
            let token_count = self.counter.count_tokens(&content);
            let mut meta = HashMap::new();
            meta.insert("strategy".to_string(), format!("{:?}", strategy));
            if let Some(lang) = &metadata.code_language {
                meta.insert("language".to_string(), lang.clone());
            }
            chunks.push(TextChunk {
                position,
                content,
                token_count,
                metadata: meta,
            });
        }

        debug!(
            chunks = chunks.len(),
            ?strategy,
            "chunked document text"
        );
        Ok(chunks)
    }

    /// Split at markdown heading lines, keeping each heading under its body
    fn split_by_headings(&self, text: &str) -> Result<Vec<String>> {
        let mut sections: Vec<String> = Vec::new();
        let mut current = String::new();

        for line in text.lines() {
            let is_heading = line.trim_start().starts_with('#');
            if is_heading && !current.trim().is_empty() {
                sections.push(std::mem::take(&mut current));
            }
            current.push_str(line);
            current.push('\n');
        }
        if !current.trim().is_empty() {
            sections.push(current);
        }

        // Oversized sections fall back to semantic splitting; the heading
        // stays attached to the first piece of its body.
        let mut out = Vec::new();
        for section in sections {
            if estimate_tokens(&section) <= self.config.max_tokens {
                out.push(section.trim().to_string());
            } else {
                out.extend(self.split_semantic(&section)?);
            }
        }
        Ok(out.into_iter().filter(|s| !s.trim().is_empty()).collect())
    }

    /// Split code at top-level boundaries, never inside a fenced block
    fn split_code(&self, text: &str) -> Result<Vec<String>> {
        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut current_tokens = 0usize;
        let mut in_fence = false;

        for line in text.lines() {
            if line.trim_start().starts_with("```") {
                in_fence = !in_fence;
            }

            let at_boundary = !in_fence && Self::is_code_boundary(line);
            if at_boundary && current_tokens >= self.config.target_tokens {
                if !current.trim().is_empty() {
                    chunks.push(std::mem::take(&mut current));
                }
                current_tokens = 0;
            }

            current.push_str(line);
            current.push('\n');
            current_tokens += estimate_tokens(line);

            // Forced split outside fences when the soft max is blown
            if !in_fence && current_tokens >= self.config.max_tokens {
                if !current.trim().is_empty() {
                    chunks.push(std::mem::take(&mut current));
                }
                current_tokens = 0;
            }
        }
        if !current.trim().is_empty() {
            chunks.push(current);
        }

        Ok(chunks
            .into_iter()
            .map(|c| c.trim_end().to_string())
            .filter(|c| !c.trim().is_empty())
            .collect())
    }

    /// Function/class-style definition lines that make good split points
    fn is_code_boundary(line: &str) -> bool {
        let trimmed = line.trim_start();
        const BOUNDARY_PREFIXES: &[&str] = &[
            "fn ", "pub fn ", "pub(crate) fn ", "async fn ", "pub async fn ", "impl ", "struct ",
            "pub struct ", "enum ", "pub enum ", "trait ", "pub trait ", "mod ", "pub mod ",
            "class ", "def ", "function ", "export function ", "export class ", "func ",
        ];
        BOUNDARY_PREFIXES.iter().any(|p| trimmed.starts_with(p))
    }

    /// Accumulate paragraphs against the token target, soft-splitting at
    /// paragraph boundaries and carrying a bounded sentence overlap forward
    fn split_semantic(&self, text: &str) -> Result<Vec<String>> {
        let paragraphs = self.paragraph_units(text)?;
        let mut chunks: Vec<String> = Vec::new();
        let mut current = String::new();
        let mut current_tokens = 0usize;

        for (para, para_tokens) in paragraphs {
            if current_tokens > 0 && current_tokens + para_tokens > self.config.max_tokens {
                let overlap = self.trailing_overlap(&current, current_tokens);
                chunks.push(std::mem::take(&mut current));
                current_tokens = 0;
                if let Some(tail) = overlap {
                    current_tokens = estimate_tokens(&tail);
                    current = tail;
                    current.push_str("\n\n");
                }
            }

            current.push_str(&para);
            current.push_str("\n\n");
            current_tokens += para_tokens;
        }
        if !current.trim().is_empty() {
            chunks.push(current);
        }

        Ok(chunks
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect())
    }

    /// Paragraphs sized under the hard cap; oversized paragraphs are broken
    /// on sentence, then word boundaries
    fn paragraph_units(&self, text: &str) -> Result<Vec<(String, usize)>> {
        let mut units = Vec::new();
        for para in text.split("\n\n") {
            let trimmed = para.trim();
            if trimmed.is_empty() {
                continue;
            }
            let tokens = estimate_tokens(trimmed);
            if tokens <= self.config.max_tokens {
                units.push((trimmed.to_string(), tokens));
                continue;
            }

            // Oversized paragraph: pack sentences up to the soft max
            let mut piece = String::new();
            let mut piece_tokens = 0usize;
            for sentence in split_sentences(trimmed) {
                let sentence_tokens = estimate_tokens(&sentence);
                if sentence_tokens > self.config.hard_cap_tokens {
                    // A single sentence over the hard cap: last resort word split
                    units.extend(self.split_by_words(&sentence)?);
                    continue;
                }
                if piece_tokens > 0 && piece_tokens + sentence_tokens > self.config.max_tokens {
                    units.push((piece.trim().to_string(), piece_tokens));
                    piece = String::new();
                    piece_tokens = 0;
                }
                piece.push_str(&sentence);
                piece.push(' ');
                piece_tokens += sentence_tokens;
            }
            if !piece.trim().is_empty() {
                units.push((piece.trim().to_string(), piece_tokens));
            }
        }
        Ok(units)
    }

    fn split_by_words(&self, text: &str) -> Result<Vec<(String, usize)>> {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.len() <= 1 {
            // Nothing left to split on
            return Err(ChunkError::LimitExceeded(estimate_tokens(text)).into());
        }

        let mut units = Vec::new();
        let mut piece: Vec<&str> = Vec::new();
        let mut piece_tokens = 0usize;
        for word in words {
            let word_tokens = estimate_tokens(word).max(1);
            if piece_tokens + word_tokens > self.config.max_tokens && !piece.is_empty() {
                units.push((piece.join(" "), piece_tokens));
                piece.clear();
                piece_tokens = 0;
            }
            piece.push(word);
            piece_tokens += word_tokens;
        }
        if !piece.is_empty() {
            units.push((piece.join(" "), piece_tokens));
        }
        Ok(units)
    }

    /// Word-estimate splits can undercount BPE tokens for dense text; halve
    /// oversized segments at word boundaries until the exact count fits
    fn enforce_hard_cap(&self, content: String) -> Result<Vec<String>> {
        let count = self.counter.count_tokens(&content);
        if count <= self.config.hard_cap_tokens {
            return Ok(vec![content]);
        }
        let words: Vec<&str> = content.split_whitespace().collect();
        if words.len() <= 1 {
            return Err(ChunkError::LimitExceeded(count).into());
        }
        let mid = words.len() / 2;
        let mut out = self.enforce_hard_cap(words[..mid].join(" "))?;
        out.extend(self.enforce_hard_cap(words[mid..].join(" "))?);
        Ok(out)
    }

    /// Final sentence of the chunk, reused as overlap when within the ratio bound
    fn trailing_overlap(&self, chunk: &str, chunk_tokens: usize) -> Option<String> {
        let max_overlap = (chunk_tokens as f32 * self.config.overlap_ratio) as usize;
        if max_overlap == 0 {
            return None;
        }
        let last = split_sentences(chunk.trim()).into_iter().last()?;
        if estimate_tokens(&last) <= max_overlap {
            Some(last)
        } else {
            None
        }
    }
}

/// Split prose into sentences at terminal punctuation
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker() -> Chunker {
        Chunker::new(ChunkerConfig::default(), Arc::new(TokenCounter::new()))
    }

    fn plain_meta() -> ExtractMetadata {
        ExtractMetadata::default()
    }

    #[test]
    fn test_empty_input_rejected() {
        let c = chunker();
        let err = c.chunk("   \n\t ", &plain_meta()).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_FAILED");
        assert!(err.to_string().contains("no non-whitespace"));
    }

    #[test]
    fn test_short_text_single_chunk() {
        let c = chunker();
        let chunks = c.chunk("Just one short paragraph.", &plain_meta()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].position, 0);
        assert!(chunks[0].token_count > 0);
    }

    #[test]
    fn test_long_text_splits_at_paragraphs() {
        let c = chunker();
        let para = "This sentence repeats to build up a realistically long paragraph. ".repeat(40);
        let text = format!("{}\n\n{}\n\n{}", para, para, para);
        let chunks = c.chunk(&text, &plain_meta()).unwrap();

        assert!(chunks.len() > 1, "long text should split");
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.position, i, "positions are 0-based and dense");
            assert!(chunk.token_count <= 1200, "hard cap holds");
        }
    }

    #[test]
    fn test_heading_aware_keeps_heading_with_body() {
        let c = chunker();
        let meta = ExtractMetadata {
            has_headings: true,
            ..Default::default()
        };
        let text = "# Setup\nInstall the package.\n\n# Usage\nCall the function.";
        let chunks = c.chunk(text, &meta).unwrap();

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].content.starts_with("# Setup"));
        assert!(chunks[0].content.contains("Install"));
        assert!(chunks[1].content.starts_with("# Usage"));
    }

    #[test]
    fn test_code_aware_never_splits_inside_fence() {
        let c = Chunker::new(
            ChunkerConfig {
                target_tokens: 20,
                max_tokens: 40,
                hard_cap_tokens: 1200,
                overlap_ratio: 0.1,
            },
            Arc::new(TokenCounter::new()),
        );
        let meta = ExtractMetadata {
            code_language: Some("rust".to_string()),
            ..Default::default()
        };
        let body = "let value = compute_something_with_a_long_name();\n".repeat(20);
        let text = format!("fn first() {{}}\n\n```\n{}```\n\nfn second() {{}}\n", body);
        let chunks = c.chunk(&text, &meta).unwrap();

        for chunk in &chunks {
            let fences = chunk.content.matches("```").count();
            assert_eq!(fences % 2, 0, "fence must not be split across chunks");
        }
    }

    #[test]
    fn test_unsplittable_giant_token_rejected() {
        let c = chunker();
        // One whitespace-free run that cannot be reduced below the hard cap
        let giant = "x".repeat(40_000);
        let result = c.chunk(&giant, &plain_meta());
        assert!(result.is_err());
    }

    #[test]
    fn test_strategy_selection() {
        assert_eq!(
            Chunker::select_strategy(&ExtractMetadata {
                code_language: Some("py".into()),
                has_headings: true,
                ..Default::default()
            }),
            ChunkStrategy::CodeAware
        );
        assert_eq!(
            Chunker::select_strategy(&ExtractMetadata {
                has_headings: true,
                ..Default::default()
            }),
            ChunkStrategy::HeadingAware
        );
        assert_eq!(
            Chunker::select_strategy(&ExtractMetadata::default()),
            ChunkStrategy::Semantic
        );
    }
}
