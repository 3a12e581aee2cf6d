//! Orchestration of the tailoring pipeline and its fast preview path

use crate::analyzer::{TaskAnalysis, TaskAnalyzer};
use crate::compressor::{
    CompressedChunk, CompressionLevel, CompressionResult, CompressionStats, CompressorOptions,
    ContextCompressor,
};
use crate::config::{PipelineConfig, SearchConfig};
use crate::error::{Result, TailorError};
use crate::formatter::{Platform, PlatformFormatter, SectionSummary};
use crate::gaps::{GapDetector, GapReport};
use crate::quality::QualityScorer;
use crate::scorer::{merge_scored, RelevanceScorer, ScoredChunk};
use crate::store::{MetadataStore, Session, SessionPlatform};
use crate::synthesizer::Synthesizer;
use crate::tokens::TokenCounter;
use crate::websearch::{SearchOptions, WebSearchResult, WebSearcher};
use crate::window::{ContextWindowManager, SECTION_PROJECT_DOCS};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Options accepted with a tailor request
#[derive(Debug, Clone, Default, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TailorOptions {
    /// Allow web search augmentation (defaults to allowed)
    pub include_web_search: Option<bool>,
    /// Override for the project-docs token budget
    pub max_tokens: Option<usize>,
}

/// A tailor or preview request
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TailorRequest {
    pub project_id: Uuid,
    pub task_input: String,
    pub target_platform: Platform,
    #[serde(default)]
    pub options: TailorOptions,
}

/// Pipeline metadata returned with a tailor response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TailorMetadata {
    pub total_tokens: usize,
    pub tokens_used: usize,
    pub chunks_retrieved: usize,
    pub chunks_included: usize,
    pub gap_report: GapReport,
    pub compression_stats: CompressionStats,
    pub processing_time_ms: u64,
    /// Quality in [0,1]
    pub quality_score: f32,
    /// One or more stages ran on a downgrade path
    pub degraded: bool,
}

/// Response for the full pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TailorResponse {
    pub session_id: Uuid,
    pub context: String,
    pub sections: Vec<SectionSummary>,
    pub metadata: TailorMetadata,
}

/// Response for the preview pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TailorPreviewResponse {
    pub estimated_tokens: usize,
    pub estimated_chunks: usize,
    pub gap_summary: GapReport,
    /// Quality in [0,1]
    pub estimated_quality: f32,
    pub processing_time_ms: u64,
}

/// Drives the full tailoring pipeline and the preview fast path
pub struct ContextPipeline {
    store: Arc<MetadataStore>,
    analyzer: Arc<TaskAnalyzer>,
    scorer: Arc<RelevanceScorer>,
    gap_detector: GapDetector,
    searcher: Option<Arc<WebSearcher>>,
    compressor: Arc<ContextCompressor>,
    synthesizer: Synthesizer,
    counter: Arc<TokenCounter>,
    config: PipelineConfig,
    search_config: SearchConfig,
    fan_out: Arc<Semaphore>,
}

impl ContextPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<MetadataStore>,
        analyzer: Arc<TaskAnalyzer>,
        scorer: Arc<RelevanceScorer>,
        gap_detector: GapDetector,
        searcher: Option<Arc<WebSearcher>>,
        compressor: Arc<ContextCompressor>,
        counter: Arc<TokenCounter>,
        config: PipelineConfig,
        search_config: SearchConfig,
    ) -> Self {
        let fan_out = Arc::new(Semaphore::new(config.fan_out_limit));
        Self {
            store,
            analyzer,
            scorer,
            gap_detector,
            searcher,
            compressor,
            synthesizer: Synthesizer::new(),
            counter,
            config,
            search_config,
            fan_out,
        }
    }

    /// Run the full pipeline under the per-request deadline
    pub async fn tailor(&self, user_id: &str, request: TailorRequest) -> Result<TailorResponse> {
        let deadline = Duration::from_secs(self.config.request_deadline);
        tokio::time::timeout(deadline, self.tailor_inner(user_id, request))
            .await
            .map_err(|_| TailorError::DeadlineElapsed)?
    }

    async fn tailor_inner(
        &self,
        user_id: &str,
        request: TailorRequest,
    ) -> Result<TailorResponse> {
        let started = Instant::now();
        let mut degraded = false;

        // Ownership is the only fatal stage
        self.store
            .authorize_project(user_id, request.project_id)
            .await?;

        let analysis = self.analyzer.analyze(&request.task_input).await;

        let budget = ContextWindowManager::create_budget(request.target_platform, None);
        let project_docs_budget = request
            .options
            .max_tokens
            .unwrap_or_else(|| budget.allocation(SECTION_PROJECT_DOCS));

        // Stage 4: parallel scoring per suggested query, bounded fan-out
        let (merged, scoring_degraded) = self
            .score_all_queries(request.project_id, &analysis)
            .await;
        degraded |= scoring_degraded;
        let chunks_retrieved = merged.len();

        let gap_report = self.gap_detector.detect(&analysis, &merged);

        // Stage 6: optional web augmentation
        let web_results = if GapDetector::should_trigger_web_search(&gap_report)
            && request.options.include_web_search != Some(false)
        {
            self.run_web_searches(&gap_report, &analysis).await
        } else {
            Vec::new()
        };

        // Stage 7: compression, falling back to uncompressed content
        let compression = match self
            .compressor
            .compress(
                &merged,
                &CompressorOptions {
                    total_token_budget: project_docs_budget,
                    full_threshold: self.config.full_threshold,
                    summary_threshold: self.config.summary_threshold,
                },
            )
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "compression failed, using uncompressed chunks");
                degraded = true;
                self.uncompressed_fallback(&merged, project_docs_budget)
            }
        };
        let chunks_included = compression.chunks.len();

        // Stages 8-10: synthesize, render, score
        let titles = self
            .store
            .document_titles(request.project_id)
            .await
            .unwrap_or_default();
        let context = self
            .synthesizer
            .synthesize(&compression.chunks, &web_results, &analysis, &titles);
        let rendered = PlatformFormatter::format_context(&context, request.target_platform);
        let sections = PlatformFormatter::extract_sections(&context);

        let quality = QualityScorer::score(
            &request.task_input,
            &context,
            &compression.chunks,
            &compression.stats,
        );
        let quality_score = quality.overall_fraction();

        let tokens_used = self.counter.count_tokens(&rendered);
        let processing_time_ms = started.elapsed().as_millis() as u64;

        let metadata = TailorMetadata {
            total_tokens: budget.total_available,
            tokens_used,
            chunks_retrieved,
            chunks_included,
            gap_report,
            compression_stats: compression.stats.clone(),
            processing_time_ms,
            quality_score,
            degraded,
        };

        // Stage 11: persist; a failed write still returns the local id
        let session_id = self
            .persist_session(user_id, &request, &rendered, tokens_used, &metadata)
            .await;

        info!(
            session = %session_id,
            chunks_retrieved,
            chunks_included,
            quality = quality.overall,
            degraded,
            "tailor request complete"
        );

        Ok(TailorResponse {
            session_id,
            context: rendered,
            sections,
            metadata,
        })
    }

    /// Preview: ownership, rule-based analysis, first-query scoring, gap
    /// detection and a token-count-only compression estimate. No LLM calls,
    /// no session write.
    pub async fn preview(
        &self,
        user_id: &str,
        request: TailorRequest,
    ) -> Result<TailorPreviewResponse> {
        let started = Instant::now();

        self.store
            .authorize_project(user_id, request.project_id)
            .await?;

        let analysis = self.analyzer.analyze_rule_based(&request.task_input);
        let first_query = analysis
            .suggested_search_queries
            .first()
            .cloned()
            .unwrap_or_else(|| request.task_input.clone());

        let outcome = self
            .scorer
            .score_chunks(request.project_id, &first_query, &analysis.key_entities)
            .await?;
        let gap_summary = self.gap_detector.detect(&analysis, &outcome.chunks);

        let budget = ContextWindowManager::create_budget(request.target_platform, None);
        let project_docs_budget = request
            .options
            .max_tokens
            .unwrap_or_else(|| budget.allocation(SECTION_PROJECT_DOCS));

        let estimate = self.compressor.estimate_compressed_size(
            &outcome.chunks,
            &CompressorOptions {
                total_token_budget: project_docs_budget,
                full_threshold: self.config.full_threshold,
                summary_threshold: self.config.summary_threshold,
            },
        );

        let estimated_quality =
            self.estimate_quality(&request.task_input, &analysis, &outcome.chunks, &estimate);

        Ok(TailorPreviewResponse {
            estimated_tokens: estimate.total_token_count,
            estimated_chunks: estimate.chunks.len(),
            gap_summary,
            estimated_quality,
            processing_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Score every suggested query concurrently and merge by max final score
    async fn score_all_queries(
        &self,
        project_id: Uuid,
        analysis: &TaskAnalysis,
    ) -> (Vec<ScoredChunk>, bool) {
        let futures = analysis.suggested_search_queries.iter().map(|query| {
            let scorer = self.scorer.clone();
            let fan_out = self.fan_out.clone();
            let entities = analysis.key_entities.clone();
            let query = query.clone();
            async move {
                let _permit = fan_out.acquire().await.ok()?;
                match scorer.score_chunks(project_id, &query, &entities).await {
                    Ok(outcome) => Some(outcome),
                    Err(e) => {
                        warn!(query = %query, error = %e, "scoring query failed");
                        None
                    }
                }
            }
        });

        let outcomes: Vec<_> = futures::future::join_all(futures)
            .await
            .into_iter()
            .flatten()
            .collect();

        let attempted = analysis.suggested_search_queries.len();
        let degraded = outcomes.len() < attempted || outcomes.iter().any(|o| o.degraded);
        let merged = merge_scored(outcomes.into_iter().map(|o| o.chunks).collect());
        debug!(merged = merged.len(), degraded, "merged scoring rounds");
        (merged, degraded)
    }

    /// Issue a capped number of gap-filling web queries
    async fn run_web_searches(
        &self,
        gap_report: &GapReport,
        analysis: &TaskAnalysis,
    ) -> Vec<WebSearchResult> {
        let Some(searcher) = &self.searcher else {
            return Vec::new();
        };
        if !searcher.any_available() {
            debug!("web search indicated but no provider configured");
            return Vec::new();
        }

        let mut queries: Vec<String> = gap_report
            .gaps
            .iter()
            .filter_map(|g| g.suggested_query.clone())
            .collect();
        if queries.is_empty() {
            queries.extend(analysis.suggested_search_queries.iter().cloned());
        }
        queries.dedup();
        queries.truncate(self.search_config.max_queries_per_request);

        let options = SearchOptions {
            max_results: self.search_config.max_results,
            ..Default::default()
        };

        let mut results = Vec::new();
        for query in queries {
            match searcher.search(&query, &options).await {
                Ok(response) => results.extend(response.results),
                Err(e) => warn!(query = %query, error = %e, "web search query failed"),
            }
        }
        results
    }

    /// Keep chunks verbatim, best first, until the budget is exhausted
    fn uncompressed_fallback(
        &self,
        scored: &[ScoredChunk],
        budget: usize,
    ) -> CompressionResult {
        let mut ordered: Vec<&ScoredChunk> = scored.iter().collect();
        ordered.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut chunks = Vec::new();
        let mut stats = CompressionStats::default();
        let mut remaining = budget;
        for chunk in ordered {
            let tokens = self.counter.count_tokens(&chunk.content);
            stats.original_tokens += tokens;
            if tokens > remaining {
                stats.dropped_count += 1;
                continue;
            }
            remaining -= tokens;
            stats.full_count += 1;
            stats.compressed_tokens += tokens;
            chunks.push(CompressedChunk {
                original_chunk_id: chunk.chunk_id,
                document_id: chunk.document_id,
                compression_level: CompressionLevel::Full,
                content: chunk.content.clone(),
                original_token_count: tokens,
                compressed_token_count: tokens,
                relevance_score: chunk.final_score,
            });
        }

        CompressionResult {
            total_token_count: stats.compressed_tokens,
            chunks,
            stats,
        }
    }

    /// Preview-side quality estimate: the real scorer over pseudo-included
    /// chunks whose content comes from the scored candidates
    fn estimate_quality(
        &self,
        task: &str,
        analysis: &TaskAnalysis,
        scored: &[ScoredChunk],
        estimate: &CompressionResult,
    ) -> f32 {
        let contents: HashMap<Uuid, &ScoredChunk> =
            scored.iter().map(|c| (c.chunk_id, c)).collect();

        let included: Vec<CompressedChunk> = estimate
            .chunks
            .iter()
            .filter_map(|c| {
                contents.get(&c.original_chunk_id).map(|s| CompressedChunk {
                    content: s.content.clone(),
                    ..c.clone()
                })
            })
            .collect();

        let context = self
            .synthesizer
            .synthesize(&included, &[], analysis, &HashMap::new());
        QualityScorer::score(task, &context, &included, &estimate.stats).overall_fraction()
    }

    async fn persist_session(
        &self,
        user_id: &str,
        request: &TailorRequest,
        rendered: &str,
        tokens_used: usize,
        metadata: &TailorMetadata,
    ) -> Uuid {
        let session = Session {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            project_id: request.project_id,
            task_input: request.task_input.clone(),
            assembled_context: rendered.to_string(),
            target_platform: request.target_platform.into(),
            token_count: tokens_used,
            quality_score: metadata.quality_score,
            metadata: serde_json::to_value(metadata).unwrap_or_else(|_| serde_json::json!({})),
            created_at: Utc::now(),
        };

        let session_id = session.id;
        if let Err(e) = self.store.create_session(&session).await {
            warn!(error = %e, "session write failed, returning local session id");
        }
        session_id
    }
}

impl From<Platform> for SessionPlatform {
    fn from(platform: Platform) -> Self {
        match platform {
            Platform::ChatGpt => SessionPlatform::Chatgpt,
            Platform::Claude => SessionPlatform::Claude,
        }
    }
}
