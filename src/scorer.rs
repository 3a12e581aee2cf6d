//! Hybrid relevance scoring with optional cross-encoder reranking

use crate::config::{PipelineConfig, RerankConfig};
use crate::embedding::Embedder;
use crate::error::{LlmError, Result};
use crate::index::{MetadataFilter, VectorIndex};
use crate::llm::{system_message, user_message, LlmClient};
use crate::store::MetadataStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// A retrieval candidate with its score breakdown, immutable per request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredChunk {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub content: String,
    pub position: usize,
    pub semantic_score: f32,
    pub keyword_score: f32,
    pub rerank_score: Option<f32>,
    pub final_score: f32,
    pub rank: usize,
}

/// Outcome of one scoring round
#[derive(Debug, Clone)]
pub struct ScoringOutcome {
    pub chunks: Vec<ScoredChunk>,
    /// Semantic scoring was unavailable and keyword-only scores were used
    pub degraded: bool,
}

/// Cross-encoder scoring calibrated relevance for (query, passage) pairs
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// Scores in [0,1], one per passage, in input order
    async fn score_pairs(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>>;
}

/// Dedicated reranker API variant
pub struct ApiReranker {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    documents: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    scores: Vec<f32>,
}

impl ApiReranker {
    pub fn new(config: &RerankConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| crate::error::TailorError::Config("reranker endpoint missing".into()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl CrossEncoder for ApiReranker {
    async fn score_pairs(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&RerankRequest { query, documents: passages });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LlmError::GenerationFailed(format!(
                "reranker returned {}",
                response.status()
            ))
            .into());
        }

        let parsed: RerankResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        if parsed.scores.len() != passages.len() {
            return Err(LlmError::InvalidResponse(format!(
                "expected {} scores, got {}",
                passages.len(),
                parsed.scores.len()
            ))
            .into());
        }

        Ok(parsed.scores.iter().map(|s| s.clamp(0.0, 1.0)).collect())
    }
}

/// LLM-as-judge variant: scores one (query, passage) pair at a time
pub struct LlmJudgeReranker {
    llm: Arc<dyn LlmClient>,
}

const JUDGE_PROMPT: &str = "You judge how relevant a passage is to a query. \
Respond with only a decimal number between 0 and 1.";

impl LlmJudgeReranker {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl CrossEncoder for LlmJudgeReranker {
    async fn score_pairs(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>> {
        let mut scores = Vec::with_capacity(passages.len());
        for passage in passages {
            let messages = vec![
                system_message(JUDGE_PROMPT),
                user_message(format!("Query: {}\n\nPassage: {}", query, passage)),
            ];
            let response = self.llm.generate(&messages).await?;
            let score: f32 = response
                .text
                .trim()
                .parse()
                .map_err(|_| LlmError::InvalidResponse(response.text.clone()))?;
            scores.push(score.clamp(0.0, 1.0));
        }
        Ok(scores)
    }
}

/// Scores project chunks against a query, semantic + keyword, with an
/// optional rerank pass over the top candidates
pub struct RelevanceScorer {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    store: Arc<MetadataStore>,
    cross_encoder: Option<Arc<dyn CrossEncoder>>,
    config: PipelineConfig,
    query_top_k: usize,
    rerank_top_n: usize,
}

impl RelevanceScorer {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        store: Arc<MetadataStore>,
        cross_encoder: Option<Arc<dyn CrossEncoder>>,
        config: PipelineConfig,
        query_top_k: usize,
        rerank_top_n: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            store,
            cross_encoder,
            config,
            query_top_k,
            rerank_top_n,
        }
    }

    /// Score chunks of one project against one query
    pub async fn score_chunks(
        &self,
        project_id: Uuid,
        query: &str,
        key_entities: &[String],
    ) -> Result<ScoringOutcome> {
        let (mut candidates, degraded) = match self.semantic_candidates(project_id, query).await {
            Ok(candidates) => (candidates, false),
            Err(e) => {
                warn!(error = %e, "semantic scoring unavailable, falling back to keyword-only");
                (self.keyword_candidates(project_id).await?, true)
            }
        };

        let query_terms = collect_terms(query, key_entities);
        let (w_s, w_k) = if degraded {
            // Keyword-only: the semantic term drops out, weights unchanged
            (0.0, self.config.keyword_weight)
        } else {
            (self.config.semantic_weight, self.config.keyword_weight)
        };

        for candidate in &mut candidates {
            candidate.keyword_score = keyword_overlap(&candidate.content, &query_terms);
            candidate.final_score =
                w_s * candidate.semantic_score + w_k * candidate.keyword_score;
        }

        if !degraded {
            self.apply_rerank(query, &mut candidates).await;
        }

        assign_ranks(&mut candidates);
        debug!(
            chunks = candidates.len(),
            degraded, "scored chunks for query"
        );
        Ok(ScoringOutcome {
            chunks: candidates,
            degraded,
        })
    }

    async fn semantic_candidates(
        &self,
        project_id: Uuid,
        query: &str,
    ) -> Result<Vec<ScoredChunk>> {
        let query_vector = self.embedder.embed(query).await?;
        let filter = MetadataFilter::new().eq("project_id", project_id);
        let matches = self
            .index
            .query(
                &collection_for(project_id),
                &query_vector,
                self.query_top_k,
                Some(&filter),
            )
            .await?;

        let ids: Vec<Uuid> = matches.iter().map(|m| m.id).collect();
        let chunks = self.store.chunks_by_ids(&ids).await?;
        let contents: HashMap<Uuid, &crate::store::StoredChunk> =
            chunks.iter().map(|c| (c.id, c)).collect();

        Ok(matches
            .iter()
            .filter_map(|m| {
                contents.get(&m.id).map(|chunk| ScoredChunk {
                    chunk_id: m.id,
                    document_id: chunk.document_id,
                    content: chunk.content.clone(),
                    position: chunk.position,
                    semantic_score: m.score,
                    keyword_score: 0.0,
                    rerank_score: None,
                    final_score: 0.0,
                    rank: 0,
                })
            })
            .collect())
    }

    /// Keyword-only candidates pulled straight from the store
    async fn keyword_candidates(&self, project_id: Uuid) -> Result<Vec<ScoredChunk>> {
        let chunks = self
            .store
            .chunks_by_project(project_id, self.query_top_k * 2)
            .await?;

        Ok(chunks
            .into_iter()
            .map(|chunk| ScoredChunk {
                chunk_id: chunk.id,
                document_id: chunk.document_id,
                content: chunk.content,
                position: chunk.position,
                semantic_score: 0.0,
                keyword_score: 0.0,
                rerank_score: None,
                final_score: 0.0,
                rank: 0,
            })
            .collect())
    }

    /// Rerank the top N by base score; failures are non-fatal
    async fn apply_rerank(&self, query: &str, candidates: &mut [ScoredChunk]) {
        let Some(cross_encoder) = &self.cross_encoder else {
            return;
        };

        candidates.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let n = self.rerank_top_n.min(candidates.len());
        if n == 0 {
            return;
        }

        let passages: Vec<&str> = candidates[..n].iter().map(|c| c.content.as_str()).collect();
        match cross_encoder.score_pairs(query, &passages).await {
            Ok(scores) => {
                for (candidate, score) in candidates[..n].iter_mut().zip(scores) {
                    candidate.rerank_score = Some(score);
                    candidate.final_score = self.config.base_weight * candidate.final_score
                        + self.config.rerank_weight * score;
                }
            }
            Err(e) => {
                warn!(error = %e, "rerank failed, keeping base scores");
            }
        }
    }
}

/// Vector collection name for a project
pub fn collection_for(project_id: Uuid) -> String {
    format!("project:{}", project_id)
}

/// Merge scoring rounds by chunk id, keeping the maximum final score,
/// then reassign ranks deterministically
pub fn merge_scored(rounds: Vec<Vec<ScoredChunk>>) -> Vec<ScoredChunk> {
    let mut merged: HashMap<Uuid, ScoredChunk> = HashMap::new();
    for round in rounds {
        for chunk in round {
            match merged.get(&chunk.chunk_id) {
                Some(existing) if existing.final_score >= chunk.final_score => {}
                _ => {
                    merged.insert(chunk.chunk_id, chunk);
                }
            }
        }
    }

    let mut chunks: Vec<ScoredChunk> = merged.into_values().collect();
    assign_ranks(&mut chunks);
    chunks
}

/// Sort by final score descending with deterministic tie-breaks
/// (semantic score, then chunk position), then number the ranks
fn assign_ranks(chunks: &mut [ScoredChunk]) {
    chunks.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                b.semantic_score
                    .partial_cmp(&a.semantic_score)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(a.position.cmp(&b.position))
    });
    for (rank, chunk) in chunks.iter_mut().enumerate() {
        chunk.rank = rank;
    }
}

fn collect_terms(query: &str, key_entities: &[String]) -> HashSet<String> {
    let mut terms: HashSet<String> = query
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect();
    for entity in key_entities {
        for word in entity.split_whitespace() {
            let word = word.to_lowercase();
            if !word.is_empty() {
                terms.insert(word);
            }
        }
    }
    terms
}

/// Fraction of query terms present in the content, in [0,1]
fn keyword_overlap(content: &str, query_terms: &HashSet<String>) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let content_words: HashSet<String> = content
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect();

    let overlap = query_terms
        .iter()
        .filter(|t| content_words.contains(*t))
        .count();
    (overlap as f32 / query_terms.len() as f32).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(id: u128, final_score: f32, semantic: f32, position: usize) -> ScoredChunk {
        ScoredChunk {
            chunk_id: Uuid::from_u128(id),
            document_id: Uuid::from_u128(1000 + id),
            content: format!("chunk {}", id),
            position,
            semantic_score: semantic,
            keyword_score: 0.0,
            rerank_score: None,
            final_score,
            rank: 0,
        }
    }

    #[test]
    fn test_keyword_overlap() {
        let terms = collect_terms("post endpoint validation", &[]);
        let full = keyword_overlap("Add a POST endpoint with validation middleware", &terms);
        assert!((full - 1.0).abs() < f32::EPSILON);

        let partial = keyword_overlap("the endpoint responds quickly", &terms);
        assert!(partial > 0.0 && partial < 1.0);

        let none = keyword_overlap("unrelated text entirely", &terms);
        assert_eq!(none, 0.0);
    }

    #[test]
    fn test_collect_terms_includes_entities() {
        let terms = collect_terms("how to route", &["express.Router".to_string()]);
        assert!(terms.contains("route"));
        assert!(terms.contains("express.router"));
    }

    #[test]
    fn test_assign_ranks_tie_breaks() {
        let mut chunks = vec![
            scored(1, 0.8, 0.5, 3),
            scored(2, 0.8, 0.7, 1),
            scored(3, 0.8, 0.7, 0),
            scored(4, 0.9, 0.1, 9),
        ];
        assign_ranks(&mut chunks);

        assert_eq!(chunks[0].chunk_id, Uuid::from_u128(4), "highest final first");
        // Equal final scores: higher semantic wins, then lower position
        assert_eq!(chunks[1].chunk_id, Uuid::from_u128(3));
        assert_eq!(chunks[2].chunk_id, Uuid::from_u128(2));
        assert_eq!(chunks[3].chunk_id, Uuid::from_u128(1));
        assert_eq!(
            chunks.iter().map(|c| c.rank).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
    }

    #[test]
    fn test_merge_keeps_max_score() {
        let round_a = vec![scored(1, 0.4, 0.4, 0), scored(2, 0.9, 0.9, 1)];
        let round_b = vec![scored(1, 0.7, 0.7, 0)];

        let merged = merge_scored(vec![round_a, round_b]);
        assert_eq!(merged.len(), 2);

        let one = merged
            .iter()
            .find(|c| c.chunk_id == Uuid::from_u128(1))
            .unwrap();
        assert!((one.final_score - 0.7).abs() < f32::EPSILON);
        assert_eq!(merged[0].chunk_id, Uuid::from_u128(2), "re-ranked after merge");
    }

    #[test]
    fn test_merge_is_deterministic() {
        let rounds = || {
            vec![
                vec![scored(1, 0.5, 0.5, 0), scored(2, 0.5, 0.5, 1)],
                vec![scored(3, 0.5, 0.6, 2)],
            ]
        };
        let a: Vec<Uuid> = merge_scored(rounds()).iter().map(|c| c.chunk_id).collect();
        let b: Vec<Uuid> = merge_scored(rounds()).iter().map(|c| c.chunk_id).collect();
        assert_eq!(a, b);
    }
}
