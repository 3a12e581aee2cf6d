//! Synthesis: dedup, contradiction detection, sectioning and ranking

use crate::analyzer::{TaskAnalysis, TaskType};
use crate::compressor::CompressedChunk;
use crate::tokens::estimate_tokens;
use crate::websearch::WebSearchResult;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;
use uuid::Uuid;

/// Two texts with word-set Jaccard above this are duplicates
const DUPLICATE_THRESHOLD: f32 = 0.6;

/// Where a block's content came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    ProjectDoc,
    WebSearch,
    ApiResponse,
    UserInput,
}

impl SourceType {
    /// Fixed trust weighting per source kind
    pub fn authority_score(&self) -> f32 {
        match self {
            Self::UserInput => 1.0,
            Self::ProjectDoc => 0.9,
            Self::ApiResponse => 0.7,
            Self::WebSearch => 0.5,
        }
    }
}

/// Attribution entry carried by a synthesized block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub source_type: SourceType,
    pub source_id: String,
    pub title: String,
    pub url: Option<String>,
    pub authority_score: f32,
}

/// Conflicting claims detected across sources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contradiction {
    pub claim: String,
    pub sources: Vec<String>,
    pub alternative: String,
    pub alternative_sources: Vec<String>,
}

/// Output section, in fixed rendering order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Section {
    CoreImplementation,
    Examples,
    BackgroundContext,
    RelatedResources,
}

impl Section {
    /// Fixed output order
    pub const ORDER: [Section; 4] = [
        Self::CoreImplementation,
        Self::Examples,
        Self::BackgroundContext,
        Self::RelatedResources,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            Self::CoreImplementation => "Core Implementation",
            Self::Examples => "Examples",
            Self::BackgroundContext => "Background Context",
            Self::RelatedResources => "Related Resources",
        }
    }
}

/// A unit of output with attribution, section and priority
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizedBlock {
    pub content: String,
    pub sources: Vec<SourceRef>,
    pub section: Section,
    pub priority: f32,
    pub contradictions: Vec<Contradiction>,
}

/// Assembled context before platform rendering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizedContext {
    pub blocks: Vec<SynthesizedBlock>,
    /// Estimated token total across block contents
    pub total_token_count: usize,
    /// Unique source count
    pub source_count: usize,
    pub contradiction_count: usize,
    /// Populated sections in output order
    pub sections: Vec<String>,
}

/// Priority weighting, overridden per task type
#[derive(Debug, Clone, Copy)]
struct PriorityWeights {
    relevance: f32,
    recency: f32,
    authority: f32,
    specificity: f32,
}

impl PriorityWeights {
    fn for_task(task_type: TaskType) -> Self {
        match task_type {
            TaskType::Coding | TaskType::Debugging => Self {
                relevance: 0.35,
                recency: 0.10,
                authority: 0.20,
                specificity: 0.35,
            },
            TaskType::Research => Self {
                relevance: 0.30,
                recency: 0.35,
                authority: 0.20,
                specificity: 0.15,
            },
            _ => Self {
                relevance: 0.40,
                recency: 0.20,
                authority: 0.20,
                specificity: 0.20,
            },
        }
    }
}

/// Builds the synthesized context from compressed chunks and web results
pub struct Synthesizer {
    value_claim: Regex,
    toggle_claim: Regex,
    step_pattern: Regex,
}

impl Synthesizer {
    pub fn new() -> Self {
        Self {
            value_claim: Regex::new(
                r"(?i)\b([a-z_][a-z0-9_.\-]{2,})\s*[=:]\s*(\d+(?:\.\d+)?(?:\s?[a-z%]+)?)",
            )
            .expect("static claim pattern"),
            toggle_claim: Regex::new(
                r"(?i)\b(enabled?|disabled?|supports|does not support|deprecated)\s+([a-z0-9_.\- ]{3,40})",
            )
            .expect("static toggle pattern"),
            step_pattern: Regex::new(r"(?m)^\s*\d+[.)]\s+.*`[^`]+`").expect("static step pattern"),
        }
    }

    /// Run the full synthesis pipeline
    pub fn synthesize(
        &self,
        compressed: &[CompressedChunk],
        web_results: &[WebSearchResult],
        analysis: &TaskAnalysis,
        document_titles: &HashMap<Uuid, String>,
    ) -> SynthesizedContext {
        let deduped = dedup_chunks(compressed);
        let contradictions = self.detect_contradictions(&deduped);
        let weights = PriorityWeights::for_task(analysis.task_type);

        let mut blocks: Vec<SynthesizedBlock> = Vec::new();
        for chunk in &deduped {
            let section = self.classify_section(chunk, analysis);
            let title = document_titles
                .get(&chunk.document_id)
                .cloned()
                .unwrap_or_else(|| format!("document {}", chunk.document_id));

            let source = SourceRef {
                source_type: SourceType::ProjectDoc,
                source_id: chunk.original_chunk_id.to_string(),
                title,
                url: None,
                authority_score: SourceType::ProjectDoc.authority_score(),
            };

            let block_contradictions: Vec<Contradiction> = contradictions
                .iter()
                .filter(|c| c.sources.contains(&chunk.original_chunk_id.to_string()))
                .cloned()
                .collect();

            let priority = weighted_priority(
                &weights,
                chunk.relevance_score,
                0.5, // project docs carry no recency signal
                source.authority_score,
                specificity_of(&chunk.content),
            );

            blocks.push(SynthesizedBlock {
                content: chunk.content.clone(),
                sources: vec![source],
                section,
                priority,
                contradictions: block_contradictions,
            });
        }

        self.merge_web_results(&mut blocks, web_results, &weights);

        // Priority order inside each section
        blocks.sort_by(|a, b| {
            let a_order = Section::ORDER.iter().position(|s| *s == a.section);
            let b_order = Section::ORDER.iter().position(|s| *s == b.section);
            a_order.cmp(&b_order).then(
                b.priority
                    .partial_cmp(&a.priority)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
        });

        let sections: Vec<String> = Section::ORDER
            .iter()
            .filter(|s| blocks.iter().any(|b| b.section == **s))
            .map(|s| s.title().to_string())
            .collect();

        let unique_sources: HashSet<String> = blocks
            .iter()
            .flat_map(|b| b.sources.iter().map(|s| s.source_id.clone()))
            .collect();

        let total_token_count = blocks.iter().map(|b| estimate_tokens(&b.content)).sum();

        debug!(
            blocks = blocks.len(),
            contradictions = contradictions.len(),
            "synthesis complete"
        );

        SynthesizedContext {
            total_token_count,
            source_count: unique_sources.len(),
            contradiction_count: contradictions.len(),
            sections,
            blocks,
        }
    }

    /// Extract claims and group by entity; two distinct values from distinct
    /// chunks form a contradiction
    fn detect_contradictions(&self, chunks: &[CompressedChunk]) -> Vec<Contradiction> {
        // entity -> value -> supporting chunk ids
        let mut claims: HashMap<String, HashMap<String, HashSet<String>>> = HashMap::new();

        for chunk in chunks {
            let chunk_id = chunk.original_chunk_id.to_string();
            for cap in self.value_claim.captures_iter(&chunk.content) {
                let entity = cap[1].to_lowercase();
                let value = cap[2].trim().to_lowercase();
                claims
                    .entry(entity)
                    .or_default()
                    .entry(value)
                    .or_default()
                    .insert(chunk_id.clone());
            }
            for cap in self.toggle_claim.captures_iter(&chunk.content) {
                let entity = cap[2].trim().to_lowercase();
                let value = cap[1].to_lowercase();
                claims
                    .entry(entity)
                    .or_default()
                    .entry(value)
                    .or_default()
                    .insert(chunk_id.clone());
            }
        }

        let mut contradictions = Vec::new();
        let mut entities: Vec<_> = claims.into_iter().collect();
        entities.sort_by(|a, b| a.0.cmp(&b.0));

        for (entity, values) in entities {
            if values.len() < 2 {
                continue;
            }
            let mut ordered: Vec<(String, HashSet<String>)> = values.into_iter().collect();
            ordered.sort_by(|a, b| a.0.cmp(&b.0));

            // Values must come from distinct chunks to count as conflicting
            let (first_value, first_sources) = &ordered[0];
            for (other_value, other_sources) in &ordered[1..] {
                if first_sources.is_disjoint(other_sources) {
                    let mut sources: Vec<String> = first_sources.iter().cloned().collect();
                    sources.sort();
                    let mut alternative_sources: Vec<String> =
                        other_sources.iter().cloned().collect();
                    alternative_sources.sort();
                    contradictions.push(Contradiction {
                        claim: format!("{} is {}", entity, first_value),
                        sources,
                        alternative: format!("{} is {}", entity, other_value),
                        alternative_sources,
                    });
                    break;
                }
            }
        }

        contradictions
    }

    fn classify_section(&self, chunk: &CompressedChunk, analysis: &TaskAnalysis) -> Section {
        let content = &chunk.content;
        if content.contains("```") || self.step_pattern.is_match(content) {
            return Section::Examples;
        }

        let lower = content.to_lowercase();
        let imperative = [
            "use ", "run ", "call ", "add ", "set ", "install ", "create ", "configure ",
            "define ", "register ",
        ]
        .iter()
        .any(|v| lower.contains(v));
        let primary_domain_match = analysis
            .domains
            .first()
            .map(|d| d.keywords().iter().any(|k| lower.contains(k)))
            .unwrap_or(false);

        if chunk.relevance_score >= 0.7 && (imperative || primary_domain_match) {
            Section::CoreImplementation
        } else {
            Section::BackgroundContext
        }
    }

    /// Append web results that do not duplicate existing block content
    fn merge_web_results(
        &self,
        blocks: &mut Vec<SynthesizedBlock>,
        web_results: &[WebSearchResult],
        weights: &PriorityWeights,
    ) {
        for result in web_results {
            let body = if result.snippet.is_empty() {
                result.title.clone()
            } else {
                result.snippet.clone()
            };

            let duplicate = blocks
                .iter()
                .any(|b| jaccard_similarity(&b.content, &body) > DUPLICATE_THRESHOLD);
            if duplicate {
                continue;
            }

            let source = SourceRef {
                source_type: SourceType::WebSearch,
                source_id: result.url.clone(),
                title: result.title.clone(),
                url: Some(result.url.clone()),
                authority_score: SourceType::WebSearch.authority_score(),
            };

            let recency = if result.published_date.is_some() { 0.8 } else { 0.5 };
            let priority = weighted_priority(
                weights,
                result.score,
                recency,
                source.authority_score,
                specificity_of(&body),
            );

            blocks.push(SynthesizedBlock {
                content: body,
                sources: vec![source],
                section: Section::RelatedResources,
                priority,
                contradictions: Vec::new(),
            });
        }
    }
}

impl Default for Synthesizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop near-duplicates, keeping the higher relevance score.
/// Idempotent: all retained pairs have similarity at or below the threshold.
pub fn dedup_chunks(chunks: &[CompressedChunk]) -> Vec<CompressedChunk> {
    let mut ordered: Vec<&CompressedChunk> = chunks.iter().collect();
    ordered.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.original_chunk_id.cmp(&b.original_chunk_id))
    });

    let mut kept: Vec<CompressedChunk> = Vec::new();
    for chunk in ordered {
        let duplicate = kept
            .iter()
            .any(|k| jaccard_similarity(&k.content, &chunk.content) > DUPLICATE_THRESHOLD);
        if !duplicate {
            kept.push(chunk.clone());
        }
    }
    kept
}

/// Word-set Jaccard similarity, case-insensitive
pub fn jaccard_similarity(a: &str, b: &str) -> f32 {
    let set_a = word_set(a);
    let set_b = word_set(b);
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

fn weighted_priority(
    weights: &PriorityWeights,
    relevance: f32,
    recency: f32,
    authority: f32,
    specificity: f32,
) -> f32 {
    weights.relevance * relevance
        + weights.recency * recency
        + weights.authority * authority
        + weights.specificity * specificity
}

/// Density of concrete detail: numbers, inline code, dotted identifiers
fn specificity_of(content: &str) -> f32 {
    let mut markers = 0usize;
    markers += content.matches('`').count() / 2;
    markers += content
        .split_whitespace()
        .filter(|w| w.chars().any(|c| c.is_ascii_digit()))
        .count();
    markers += content
        .split_whitespace()
        .filter(|w| w.contains('.') && !w.ends_with('.'))
        .count();
    (markers as f32 / 10.0).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::TaskAnalyzer;
    use crate::compressor::CompressionLevel;

    fn compressed(id: u128, score: f32, content: &str) -> CompressedChunk {
        CompressedChunk {
            original_chunk_id: Uuid::from_u128(id),
            document_id: Uuid::from_u128(5000 + id),
            compression_level: CompressionLevel::Full,
            content: content.to_string(),
            original_token_count: 50,
            compressed_token_count: 50,
            relevance_score: score,
        }
    }

    fn analysis(task: &str) -> TaskAnalysis {
        TaskAnalyzer::new(None).analyze_rule_based(task)
    }

    #[test]
    fn test_jaccard_similarity() {
        assert_eq!(jaccard_similarity("a b c", "a b c"), 1.0);
        assert_eq!(jaccard_similarity("a b", "c d"), 0.0);
        let partial = jaccard_similarity("the router handles requests", "the router drops requests");
        assert!(partial > 0.0 && partial < 1.0);
    }

    #[test]
    fn test_dedup_keeps_higher_relevance() {
        let chunks = vec![
            compressed(1, 0.5, "the request router maps paths to handlers quickly"),
            compressed(2, 0.9, "the request router maps paths to handlers"),
            compressed(3, 0.7, "sessions are stored in sqlite with a ttl"),
        ];
        let deduped = dedup_chunks(&chunks);

        assert_eq!(deduped.len(), 2);
        assert!(deduped.iter().any(|c| c.original_chunk_id == Uuid::from_u128(2)));
        assert!(!deduped.iter().any(|c| c.original_chunk_id == Uuid::from_u128(1)));
    }

    #[test]
    fn test_dedup_idempotent() {
        let chunks = vec![
            compressed(1, 0.5, "alpha beta gamma delta"),
            compressed(2, 0.9, "alpha beta gamma epsilon"),
            compressed(3, 0.7, "entirely different content here"),
        ];
        let once = dedup_chunks(&chunks);
        let twice = dedup_chunks(&once);

        let ids = |v: &[CompressedChunk]| {
            let mut ids: Vec<Uuid> = v.iter().map(|c| c.original_chunk_id).collect();
            ids.sort();
            ids
        };
        assert_eq!(ids(&once), ids(&twice));
    }

    #[test]
    fn test_retained_pairs_below_threshold() {
        let chunks: Vec<CompressedChunk> = (0..6)
            .map(|i| {
                compressed(
                    i,
                    0.5,
                    &format!("shared words plus unique token number {}", i),
                )
            })
            .collect();
        let deduped = dedup_chunks(&chunks);
        for (i, a) in deduped.iter().enumerate() {
            for b in deduped.iter().skip(i + 1) {
                assert!(jaccard_similarity(&a.content, &b.content) <= DUPLICATE_THRESHOLD);
            }
        }
    }

    #[test]
    fn test_contradiction_detected() {
        let synthesizer = Synthesizer::new();
        let chunks = vec![
            compressed(1, 0.8, "the connection timeout: 30 seconds for all clients"),
            compressed(2, 0.7, "the connection timeout: 60 seconds in production"),
        ];
        let context = synthesizer.synthesize(
            &chunks,
            &[],
            &analysis("review the timeout settings"),
            &HashMap::new(),
        );

        assert_eq!(context.contradiction_count, 1);
        let with_contradiction: Vec<_> = context
            .blocks
            .iter()
            .filter(|b| !b.contradictions.is_empty())
            .collect();
        assert!(!with_contradiction.is_empty());
        let contradiction = &with_contradiction[0].contradictions[0];
        assert!(contradiction.claim.contains("timeout"));
        assert_ne!(contradiction.claim, contradiction.alternative);
    }

    #[test]
    fn test_no_contradiction_same_chunk() {
        let synthesizer = Synthesizer::new();
        // Both values in one chunk: not a cross-source conflict
        let chunks = vec![compressed(
            1,
            0.8,
            "timeout: 30 seconds by default, timeout: 60 seconds when overridden",
        )];
        let context = synthesizer.synthesize(
            &chunks,
            &[],
            &analysis("review timeouts"),
            &HashMap::new(),
        );
        assert_eq!(context.contradiction_count, 0);
    }

    #[test]
    fn test_section_classification() {
        let synthesizer = Synthesizer::new();
        let task = analysis("implement the api endpoint");

        let example = compressed(1, 0.5, "```js\napp.post('/x', h)\n```");
        assert_eq!(
            synthesizer.classify_section(&example, &task),
            Section::Examples
        );

        let core = compressed(2, 0.8, "use the api endpoint router to register the handler");
        assert_eq!(
            synthesizer.classify_section(&core, &task),
            Section::CoreImplementation
        );

        let background = compressed(3, 0.4, "history of the service over the years");
        assert_eq!(
            synthesizer.classify_section(&background, &task),
            Section::BackgroundContext
        );
    }

    #[test]
    fn test_web_results_merge_and_dedup() {
        let synthesizer = Synthesizer::new();
        let chunks = vec![compressed(1, 0.8, "argon2 is a memory-hard password hash")];
        let web = vec![
            WebSearchResult {
                title: "duplicate".to_string(),
                url: "https://example.com/dup".to_string(),
                snippet: "argon2 is a memory-hard password hash".to_string(),
                score: 0.9,
                published_date: None,
                raw_content: None,
                provider: "tavily".to_string(),
            },
            WebSearchResult {
                title: "fresh".to_string(),
                url: "https://example.com/fresh".to_string(),
                snippet: "bcrypt limits input to 72 bytes per password".to_string(),
                score: 0.8,
                published_date: Some("2024-01-01".to_string()),
                raw_content: None,
                provider: "tavily".to_string(),
            },
        ];

        let context = synthesizer.synthesize(
            &chunks,
            &web,
            &analysis("compare bcrypt vs argon2"),
            &HashMap::new(),
        );

        let related: Vec<_> = context
            .blocks
            .iter()
            .filter(|b| b.section == Section::RelatedResources)
            .collect();
        assert_eq!(related.len(), 1, "duplicate web result skipped");
        assert_eq!(related[0].sources[0].url.as_deref(), Some("https://example.com/fresh"));
        assert!((related[0].sources[0].authority_score - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_section_order_and_metadata() {
        let synthesizer = Synthesizer::new();
        let task = analysis("implement the api endpoint");
        let chunks = vec![
            compressed(1, 0.9, "use the api endpoint router to register the handler"),
            compressed(2, 0.5, "```\nexample code\n```"),
            compressed(3, 0.3, "older background notes about the service"),
        ];
        let context = synthesizer.synthesize(&chunks, &[], &task, &HashMap::new());

        assert_eq!(
            context.sections,
            vec!["Core Implementation", "Examples", "Background Context"]
        );
        assert_eq!(context.source_count, 3);
        assert!(context.total_token_count > 0);

        // Blocks grouped by section in fixed order
        let sections: Vec<Section> = context.blocks.iter().map(|b| b.section).collect();
        let mut sorted = sections.clone();
        sorted.sort_by_key(|s| Section::ORDER.iter().position(|o| o == s));
        assert_eq!(sections, sorted);
    }
}
