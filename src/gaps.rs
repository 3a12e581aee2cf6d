//! Coverage gap detection over retrieved chunks

use crate::analyzer::{KnowledgeDomain, TaskAnalysis, TaskType};
use crate::scorer::ScoredChunk;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Score below which a retrieval round is considered to have found nothing
const NO_CONTEXT_SCORE: f32 = 0.2;

/// Kind of coverage shortfall
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GapType {
    NoContext,
    MissingDomain,
    ShallowCoverage,
    MissingExamples,
}

/// How serious a gap is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GapSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// One detected coverage gap
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gap {
    pub gap_type: GapType,
    pub severity: GapSeverity,
    pub domain: Option<KnowledgeDomain>,
    pub description: String,
    /// Query that could fill this gap via web search
    pub suggested_query: Option<String>,
}

/// Gap analysis over the merged retrieval results
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GapReport {
    pub gaps: Vec<Gap>,
    /// Mean per-domain coverage, in [0,1]
    pub overall_coverage: f32,
    /// Any gap is HIGH or CRITICAL
    pub is_actionable: bool,
    pub estimated_quality_without_filling: f32,
    pub estimated_quality_with_filling: f32,
}

/// Detector tuning
#[derive(Debug, Clone)]
pub struct GapDetectorConfig {
    /// Top matching score below which domain coverage is shallow
    pub shallow_score_threshold: f32,
    /// Matching chunk count below which domain coverage is shallow
    pub shallow_chunk_minimum: usize,
}

impl Default for GapDetectorConfig {
    fn default() -> Self {
        Self {
            shallow_score_threshold: 0.5,
            shallow_chunk_minimum: 2,
        }
    }
}

/// Detects missing, shallow or absent coverage for the task's domains
pub struct GapDetector {
    config: GapDetectorConfig,
}

impl GapDetector {
    pub fn new(config: GapDetectorConfig) -> Self {
        Self { config }
    }

    /// Evaluate the merged scored chunks against the task analysis
    pub fn detect(&self, analysis: &TaskAnalysis, chunks: &[ScoredChunk]) -> GapReport {
        if chunks.is_empty() || chunks.iter().all(|c| c.final_score < NO_CONTEXT_SCORE) {
            return Self::no_context_report(analysis);
        }

        let mut gaps = Vec::new();
        let mut domain_scores = Vec::new();

        for domain in &analysis.domains {
            let matching = Self::matching_chunks(*domain, chunks);
            if matching.is_empty() {
                gaps.push(Gap {
                    gap_type: GapType::MissingDomain,
                    severity: GapSeverity::High,
                    domain: Some(*domain),
                    description: format!("no retrieved content covers {:?}", domain),
                    suggested_query: Some(domain_query(*domain, analysis)),
                });
                domain_scores.push(0.0);
                continue;
            }

            let top_score = matching
                .iter()
                .map(|c| c.final_score)
                .fold(f32::MIN, f32::max);
            let shallow = top_score < self.config.shallow_score_threshold
                || matching.len() < self.config.shallow_chunk_minimum;

            if shallow {
                let severity = if top_score >= 0.6 * self.config.shallow_score_threshold {
                    GapSeverity::Low
                } else {
                    GapSeverity::Medium
                };
                gaps.push(Gap {
                    gap_type: GapType::ShallowCoverage,
                    severity,
                    domain: Some(*domain),
                    description: format!(
                        "coverage of {:?} is shallow ({} chunks, top score {:.2})",
                        domain,
                        matching.len(),
                        top_score
                    ),
                    suggested_query: Some(domain_query(*domain, analysis)),
                });
                domain_scores
                    .push((top_score / self.config.shallow_score_threshold).min(1.0) * 0.6);
            } else {
                domain_scores.push(top_score.min(1.0));
            }
        }

        if matches!(analysis.task_type, TaskType::Coding | TaskType::Debugging)
            && !chunks.iter().any(|c| has_code_indicator(&c.content))
        {
            gaps.push(Gap {
                gap_type: GapType::MissingExamples,
                severity: GapSeverity::Medium,
                domain: None,
                description: "no retrieved chunk contains code examples".to_string(),
                suggested_query: Some(format!(
                    "{} code example",
                    analysis
                        .suggested_search_queries
                        .first()
                        .cloned()
                        .unwrap_or_default()
                )),
            });
        }

        let overall_coverage = if domain_scores.is_empty() {
            0.0
        } else {
            domain_scores.iter().sum::<f32>() / domain_scores.len() as f32
        };

        let report = Self::finish_report(gaps, overall_coverage);
        debug!(
            gaps = report.gaps.len(),
            coverage = report.overall_coverage,
            "gap detection complete"
        );
        report
    }

    /// Decide whether retrieved coverage warrants web augmentation
    pub fn should_trigger_web_search(report: &GapReport) -> bool {
        report.overall_coverage < 0.6
            || report
                .gaps
                .iter()
                .any(|g| g.severity == GapSeverity::Critical)
    }

    fn no_context_report(analysis: &TaskAnalysis) -> GapReport {
        let gap = Gap {
            gap_type: GapType::NoContext,
            severity: GapSeverity::Critical,
            domain: None,
            description: "no project content matches the task".to_string(),
            suggested_query: analysis.suggested_search_queries.first().cloned(),
        };
        Self::finish_report(vec![gap], 0.0)
    }

    fn finish_report(gaps: Vec<Gap>, overall_coverage: f32) -> GapReport {
        let critical = gaps
            .iter()
            .filter(|g| g.severity == GapSeverity::Critical)
            .count() as f32;
        let high = gaps
            .iter()
            .filter(|g| g.severity == GapSeverity::High)
            .count() as f32;

        let without = (overall_coverage - 0.3 * critical - 0.15 * high).max(0.0);
        let with = (without + (0.1 * gaps.len() as f32).min(0.4)).min(1.0);

        GapReport {
            is_actionable: gaps.iter().any(|g| g.severity >= GapSeverity::High),
            gaps,
            overall_coverage,
            estimated_quality_without_filling: without,
            estimated_quality_with_filling: with,
        }
    }

    fn matching_chunks<'a>(
        domain: KnowledgeDomain,
        chunks: &'a [ScoredChunk],
    ) -> Vec<&'a ScoredChunk> {
        let keywords = domain.keywords();
        chunks
            .iter()
            .filter(|chunk| {
                if keywords.is_empty() {
                    // GENERAL has no lexicon; any retrieved content counts
                    return true;
                }
                let lower = chunk.content.to_lowercase();
                keywords.iter().any(|k| lower.contains(k))
            })
            .collect()
    }
}

impl Default for GapDetector {
    fn default() -> Self {
        Self::new(GapDetectorConfig::default())
    }
}

/// Search query aimed at filling a domain gap
fn domain_query(domain: KnowledgeDomain, analysis: &TaskAnalysis) -> String {
    let base = analysis
        .suggested_search_queries
        .first()
        .cloned()
        .unwrap_or_default();
    match domain.keywords().first() {
        Some(keyword) => format!("{} {}", base, keyword),
        None => base,
    }
}

/// Fenced blocks, keyword-like patterns and CLI prefixes count as code
fn has_code_indicator(content: &str) -> bool {
    const PATTERNS: &[&str] = &[
        "```", "fn ", "def ", "function ", "class ", "import ", "const ", "let ", "var ",
        "return ", "=> ", "$ ", "npm ", "cargo ", "pip ",
    ];
    PATTERNS.iter().any(|p| content.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{Complexity, TaskAnalyzer};
    use uuid::Uuid;

    fn chunk(content: &str, final_score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk_id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            content: content.to_string(),
            position: 0,
            semantic_score: final_score,
            keyword_score: 0.0,
            rerank_score: None,
            final_score,
            rank: 0,
        }
    }

    fn analysis_for(task: &str) -> TaskAnalysis {
        TaskAnalyzer::new(None).analyze_rule_based(task)
    }

    #[test]
    fn test_no_chunks_is_critical_no_context() {
        let analysis = analysis_for("how do I configure the api server?");
        let report = GapDetector::default().detect(&analysis, &[]);

        assert_eq!(report.gaps.len(), 1);
        assert_eq!(report.gaps[0].gap_type, GapType::NoContext);
        assert_eq!(report.gaps[0].severity, GapSeverity::Critical);
        assert_eq!(report.overall_coverage, 0.0);
        assert!(report.is_actionable);
        assert!(GapDetector::should_trigger_web_search(&report));
    }

    #[test]
    fn test_all_low_scores_is_no_context() {
        let analysis = analysis_for("how do I configure the api server?");
        let chunks = vec![chunk("api server setup", 0.1), chunk("api routes", 0.05)];
        let report = GapDetector::default().detect(&analysis, &chunks);
        assert_eq!(report.gaps[0].gap_type, GapType::NoContext);
    }

    #[test]
    fn test_missing_domain_detected() {
        let analysis = analysis_for("set up the database schema and the docker deployment");
        assert!(analysis.domains.contains(&KnowledgeDomain::Database));
        assert!(analysis.domains.contains(&KnowledgeDomain::Devops));

        // Good database coverage, nothing about devops
        let chunks = vec![
            chunk("the database schema uses three tables with an index", 0.8),
            chunk("run the sql migration before the schema change ships", 0.7),
        ];
        let report = GapDetector::default().detect(&analysis, &chunks);

        let missing: Vec<_> = report
            .gaps
            .iter()
            .filter(|g| g.gap_type == GapType::MissingDomain)
            .collect();
        assert!(missing
            .iter()
            .any(|g| g.domain == Some(KnowledgeDomain::Devops)));
        assert!(report.is_actionable, "HIGH severity gap is actionable");
    }

    #[test]
    fn test_shallow_coverage_severity_bands() {
        let analysis = analysis_for("query the database");
        // One matching chunk (below minimum count) with decent score -> LOW
        let chunks = vec![chunk("database query tuning guide", 0.45)];
        let report = GapDetector::default().detect(&analysis, &chunks);

        let shallow = report
            .gaps
            .iter()
            .find(|g| g.gap_type == GapType::ShallowCoverage)
            .expect("shallow gap expected");
        assert_eq!(shallow.severity, GapSeverity::Low, "score >= 0.6 * threshold");

        // Weak score -> MEDIUM
        let chunks = vec![chunk("database query tuning guide", 0.25)];
        let report = GapDetector::default().detect(&analysis, &chunks);
        let shallow = report
            .gaps
            .iter()
            .find(|g| g.gap_type == GapType::ShallowCoverage)
            .unwrap();
        assert_eq!(shallow.severity, GapSeverity::Medium);
    }

    #[test]
    fn test_missing_examples_for_coding_tasks() {
        let analysis = analysis_for("implement the api endpoint");
        let chunks = vec![
            chunk("the endpoint api accepts json payloads and the api validates them", 0.8),
            chunk("api endpoint responses are cached on the server", 0.75),
        ];
        let report = GapDetector::default().detect(&analysis, &chunks);
        assert!(report
            .gaps
            .iter()
            .any(|g| g.gap_type == GapType::MissingExamples));

        let chunks_with_code = vec![
            chunk("```js\napp.post('/api', handler)\n``` endpoint api server", 0.8),
            chunk("the api endpoint validates the server request", 0.75),
        ];
        let report = GapDetector::default().detect(&analysis, &chunks_with_code);
        assert!(!report
            .gaps
            .iter()
            .any(|g| g.gap_type == GapType::MissingExamples));
    }

    #[test]
    fn test_quality_estimates_bounded() {
        let analysis = analysis_for("secure the authentication token flow in the api server");
        let chunks = vec![chunk("general notes", 0.5)];
        let report = GapDetector::default().detect(&analysis, &chunks);

        assert!(report.estimated_quality_without_filling >= 0.0);
        assert!(report.estimated_quality_with_filling <= 1.0);
        assert!(
            report.estimated_quality_with_filling >= report.estimated_quality_without_filling
        );
    }

    #[test]
    fn test_good_coverage_no_web_search() {
        let mut analysis = analysis_for("how does the api endpoint work?");
        analysis.task_type = crate::analyzer::TaskType::Other;
        analysis.complexity = Complexity::Low;

        let chunks = vec![
            chunk("the api endpoint accepts requests on the server route", 0.9),
            chunk("each endpoint registers middleware with the api server", 0.85),
        ];
        let report = GapDetector::default().detect(&analysis, &chunks);
        assert!(report.overall_coverage >= 0.6);
        assert!(!GapDetector::should_trigger_web_search(&report));
    }
}
