//! Quality scoring for assembled contexts

use crate::compressor::{CompressedChunk, CompressionStats, STOPWORDS};
use crate::synthesizer::{SourceType, SynthesizedContext};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Sub-scores, each in [0,1]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubScores {
    pub coverage: f32,
    pub diversity: f32,
    pub relevance: f32,
    pub compression: f32,
}

/// Quality assessment of one assembled context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    /// Overall rating in [0,100]
    pub overall: u8,
    pub sub_scores: SubScores,
    pub suggestions: Vec<String>,
    pub scored_at: DateTime<Utc>,
}

impl QualityReport {
    /// Overall rating as a [0,1] fraction (session/preview representation)
    pub fn overall_fraction(&self) -> f32 {
        self.overall as f32 / 100.0
    }
}

/// Scores coverage, diversity, relevance and compression fitness
pub struct QualityScorer;

impl QualityScorer {
    /// Produce the quality report for one request
    pub fn score(
        task: &str,
        context: &SynthesizedContext,
        included: &[CompressedChunk],
        stats: &CompressionStats,
    ) -> QualityReport {
        let coverage = Self::coverage_score(task, context);
        let diversity = Self::diversity_score(context, included);
        let relevance = Self::relevance_score(included);
        let compression = Self::compression_score(stats);

        let overall = (100.0
            * (0.3 * coverage + 0.2 * diversity + 0.35 * relevance + 0.15 * compression))
            .round()
            .clamp(0.0, 100.0) as u8;

        let mut suggestions = Vec::new();
        if coverage < 0.5 {
            suggestions.push(
                "coverage is low: upload more relevant documentation for this task".to_string(),
            );
        }
        if diversity < 0.4 {
            suggestions.push(
                "context relies on a single source: consider adding web search or uploading \
                 additional documents"
                    .to_string(),
            );
        }
        if relevance < 0.5 {
            suggestions.push(
                "retrieved content is weakly related: refine the task wording".to_string(),
            );
        }
        if compression < 0.5 {
            suggestions.push(
                "compression is outside the effective band: adjust the token budget".to_string(),
            );
        }

        debug!(overall, "quality scored");

        QualityReport {
            overall,
            sub_scores: SubScores {
                coverage,
                diversity,
                relevance,
                compression,
            },
            suggestions,
            scored_at: Utc::now(),
        }
    }

    /// Fraction of significant task keywords present in the assembled content
    fn coverage_score(task: &str, context: &SynthesizedContext) -> f32 {
        let keywords = significant_keywords(task);
        if keywords.is_empty() {
            return 1.0;
        }

        let assembled: String = context
            .blocks
            .iter()
            .map(|b| b.content.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");

        let present = keywords.iter().filter(|k| assembled.contains(*k)).count();
        present as f32 / keywords.len() as f32
    }

    /// Source variety: unique documents plus a bonus for mixing source kinds
    fn diversity_score(context: &SynthesizedContext, included: &[CompressedChunk]) -> f32 {
        let has_any_source = context.blocks.iter().any(|b| !b.sources.is_empty());
        if !has_any_source {
            return 0.0;
        }

        let unique_docs: HashSet<_> = included.iter().map(|c| c.document_id).collect();
        let mut score = (0.2 * unique_docs.len().min(3) as f32).min(0.8);

        let has_document = context.blocks.iter().any(|b| {
            b.sources
                .iter()
                .any(|s| s.source_type == SourceType::ProjectDoc)
        });
        let has_web = context.blocks.iter().any(|b| {
            b.sources
                .iter()
                .any(|s| s.source_type == SourceType::WebSearch)
        });
        if has_document && has_web {
            score += 0.2;
        }

        score.min(1.0)
    }

    /// Mean final score of included chunks, penalized for weak inclusions
    fn relevance_score(included: &[CompressedChunk]) -> f32 {
        if included.is_empty() {
            return 0.0;
        }
        let mean: f32 = included.iter().map(|c| c.relevance_score).sum::<f32>()
            / included.len() as f32;
        let penalty = if included.iter().any(|c| c.relevance_score < 0.3) {
            0.15
        } else {
            0.0
        };
        (mean - penalty).clamp(0.0, 1.0)
    }

    /// Triangular fitness: peaks when compressed/raw lands in [0.2, 0.5]
    fn compression_score(stats: &CompressionStats) -> f32 {
        if stats.original_tokens == 0 {
            return 0.5;
        }
        let ratio = stats.compressed_tokens as f32 / stats.original_tokens as f32;
        if (0.2..=0.5).contains(&ratio) {
            1.0
        } else if ratio < 0.2 {
            (ratio / 0.2).clamp(0.0, 1.0)
        } else {
            (1.0 - (ratio - 0.5) / 0.5).clamp(0.0, 1.0)
        }
    }
}

/// Stopword-filtered lowercase keywords of length >= 3
fn significant_keywords(task: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    task.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| w.len() >= 3 && !STOPWORDS.contains(&w.as_str()))
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compressor::CompressionLevel;
    use crate::synthesizer::{Section, SourceRef, SynthesizedBlock};
    use uuid::Uuid;

    fn block_with(content: &str, source_type: SourceType) -> SynthesizedBlock {
        SynthesizedBlock {
            content: content.to_string(),
            sources: vec![SourceRef {
                source_type,
                source_id: Uuid::new_v4().to_string(),
                title: "source".to_string(),
                url: None,
                authority_score: source_type.authority_score(),
            }],
            section: Section::CoreImplementation,
            priority: 0.5,
            contradictions: Vec::new(),
        }
    }

    fn included(document: u128, score: f32) -> CompressedChunk {
        CompressedChunk {
            original_chunk_id: Uuid::new_v4(),
            document_id: Uuid::from_u128(document),
            compression_level: CompressionLevel::Full,
            content: "content".to_string(),
            original_token_count: 100,
            compressed_token_count: 40,
            relevance_score: score,
        }
    }

    fn context_of(blocks: Vec<SynthesizedBlock>) -> SynthesizedContext {
        SynthesizedContext {
            total_token_count: 100,
            source_count: blocks.len(),
            contradiction_count: 0,
            sections: vec![],
            blocks,
        }
    }

    fn good_stats() -> CompressionStats {
        CompressionStats {
            original_tokens: 1000,
            compressed_tokens: 350,
            ..Default::default()
        }
    }

    #[test]
    fn test_scores_in_range() {
        let context = context_of(vec![block_with(
            "router endpoint validation payload",
            SourceType::ProjectDoc,
        )]);
        let chunks = vec![included(1, 0.8), included(2, 0.6)];
        let report = QualityScorer::score(
            "add endpoint validation to the router",
            &context,
            &chunks,
            &good_stats(),
        );

        assert!(report.overall <= 100);
        for s in [
            report.sub_scores.coverage,
            report.sub_scores.diversity,
            report.sub_scores.relevance,
            report.sub_scores.compression,
        ] {
            assert!((0.0..=1.0).contains(&s));
        }
    }

    #[test]
    fn test_coverage_full_when_no_significant_keywords() {
        let context = context_of(vec![]);
        let report = QualityScorer::score("is it of an to", &context, &[], &good_stats());
        assert_eq!(report.sub_scores.coverage, 1.0);
    }

    #[test]
    fn test_coverage_counts_present_keywords() {
        let context = context_of(vec![block_with(
            "the router registers every endpoint",
            SourceType::ProjectDoc,
        )]);
        let report = QualityScorer::score(
            "router endpoint kubernetes",
            &context,
            &[included(1, 0.8)],
            &good_stats(),
        );
        // two of three significant keywords present
        assert!((report.sub_scores.coverage - 2.0 / 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_diversity_zero_without_sources() {
        let context = context_of(vec![]);
        let report = QualityScorer::score("task", &context, &[], &good_stats());
        assert_eq!(report.sub_scores.diversity, 0.0);
    }

    #[test]
    fn test_diversity_mixed_source_bonus() {
        let doc_only = context_of(vec![block_with("a", SourceType::ProjectDoc)]);
        let chunks = vec![included(1, 0.8), included(2, 0.8), included(3, 0.8)];
        let without = QualityScorer::score("t", &doc_only, &chunks, &good_stats());

        let mixed = context_of(vec![
            block_with("a", SourceType::ProjectDoc),
            block_with("b", SourceType::WebSearch),
        ]);
        let with = QualityScorer::score("t", &mixed, &chunks, &good_stats());

        assert!(with.sub_scores.diversity > without.sub_scores.diversity);
        assert!(with.sub_scores.diversity <= 1.0);
    }

    #[test]
    fn test_relevance_penalty_for_weak_chunks() {
        let context = context_of(vec![block_with("a", SourceType::ProjectDoc)]);
        let strong = QualityScorer::score(
            "t",
            &context,
            &[included(1, 0.8), included(2, 0.8)],
            &good_stats(),
        );
        let weak = QualityScorer::score(
            "t",
            &context,
            &[included(1, 0.8), included(2, 0.2)],
            &good_stats(),
        );
        assert!(weak.sub_scores.relevance < strong.sub_scores.relevance);
    }

    #[test]
    fn test_compression_triangular() {
        let peak = CompressionStats {
            original_tokens: 100,
            compressed_tokens: 35,
            ..Default::default()
        };
        assert_eq!(QualityScorer::compression_score(&peak), 1.0);

        let barely = CompressionStats {
            original_tokens: 100,
            compressed_tokens: 100,
            ..Default::default()
        };
        assert_eq!(QualityScorer::compression_score(&barely), 0.0);

        let overshrunk = CompressionStats {
            original_tokens: 100,
            compressed_tokens: 10,
            ..Default::default()
        };
        let score = QualityScorer::compression_score(&overshrunk);
        assert!(score > 0.0 && score < 1.0);

        let empty = CompressionStats::default();
        assert_eq!(QualityScorer::compression_score(&empty), 0.5);
    }

    #[test]
    fn test_suggestions_generated() {
        let context = context_of(vec![]);
        let stats = CompressionStats {
            original_tokens: 100,
            compressed_tokens: 100,
            ..Default::default()
        };
        let report = QualityScorer::score("deploy kubernetes cluster", &context, &[], &stats);

        assert!(report.suggestions.iter().any(|s| s.contains("upload")));
        assert!(report.suggestions.iter().any(|s| s.contains("single source")));
        assert!(report.suggestions.iter().any(|s| s.contains("token budget")));
    }

    #[test]
    fn test_overall_fraction() {
        let context = context_of(vec![block_with("deploy", SourceType::ProjectDoc)]);
        let report = QualityScorer::score("deploy", &context, &[included(1, 0.9)], &good_stats());
        let fraction = report.overall_fraction();
        assert!((0.0..=1.0).contains(&fraction));
        assert!((fraction * 100.0 - report.overall as f32).abs() < 0.5);
    }
}
