//! Shared stubs and wiring for integration tests

use async_trait::async_trait;
use context_tailor::analyzer::TaskAnalyzer;
use context_tailor::chunker::{Chunker, ChunkerConfig};
use context_tailor::compressor::ContextCompressor;
use context_tailor::config::{PipelineConfig, SearchConfig};
use context_tailor::embedding::Embedder;
use context_tailor::error::{EmbeddingError, Result};
use context_tailor::gaps::{GapDetector, GapDetectorConfig};
use context_tailor::index::SqliteVectorIndex;
use context_tailor::ingest::DocumentIngestor;
use context_tailor::pipeline::ContextPipeline;
use context_tailor::scorer::RelevanceScorer;
use context_tailor::store::MetadataStore;
use context_tailor::tokens::TokenCounter;
use context_tailor::websearch::{
    SearchOptions, SearchProvider, WebSearchResult, WebSearcher,
};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

const EMBED_DIM: usize = 128;

/// Deterministic bag-of-words embedder: shared vocabulary means shared
/// directions, so cosine similarity tracks word overlap
pub struct BagOfWordsEmbedder {
    pub fail: bool,
}

impl BagOfWordsEmbedder {
    fn vector_for(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; EMBED_DIM];
        for word in text.split_whitespace() {
            let cleaned = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if cleaned.is_empty() {
                continue;
            }
            let mut hasher = DefaultHasher::new();
            cleaned.hash(&mut hasher);
            v[(hasher.finish() % EMBED_DIM as u64) as usize] += 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for BagOfWordsEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.fail {
            return Err(EmbeddingError::Unavailable.into());
        }
        Ok(Self::vector_for(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        EMBED_DIM
    }
}

/// Canned web search provider
pub struct StubSearchProvider {
    pub results: Vec<WebSearchResult>,
}

#[async_trait]
impl SearchProvider for StubSearchProvider {
    fn name(&self) -> &str {
        "stub"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn search(&self, _query: &str, _options: &SearchOptions) -> Result<Vec<WebSearchResult>> {
        Ok(self.results.clone())
    }
}

pub fn web_result(title: &str, url: &str, snippet: &str) -> WebSearchResult {
    WebSearchResult {
        title: title.to_string(),
        url: url.to_string(),
        snippet: snippet.to_string(),
        score: 0.9,
        published_date: Some("2025-06-01".to_string()),
        raw_content: None,
        provider: "stub".to_string(),
    }
}

/// Everything an end-to-end test needs
pub struct Harness {
    pub store: Arc<MetadataStore>,
    pub ingestor: Arc<DocumentIngestor>,
    pub pipeline: ContextPipeline,
}

/// Build a full pipeline over in-memory storage.
///
/// `scoring_embedder_fails` simulates the embedding backend going down after
/// ingestion; `web_results` installs a canned provider when non-empty.
pub async fn harness(
    scoring_embedder_fails: bool,
    web_results: Vec<WebSearchResult>,
) -> Harness {
    let counter = Arc::new(TokenCounter::new());
    let store = Arc::new(MetadataStore::in_memory().await.unwrap());
    let index = Arc::new(SqliteVectorIndex::in_memory().await.unwrap());

    let ingest_embedder = Arc::new(BagOfWordsEmbedder { fail: false });
    let chunker = Arc::new(Chunker::new(ChunkerConfig::default(), counter.clone()));
    let ingestor = Arc::new(DocumentIngestor::new(
        store.clone(),
        index.clone(),
        ingest_embedder,
        chunker,
        8,
    ));

    let scoring_embedder = Arc::new(BagOfWordsEmbedder {
        fail: scoring_embedder_fails,
    });
    let pipeline_config = PipelineConfig::default();
    let scorer = Arc::new(RelevanceScorer::new(
        scoring_embedder,
        index,
        store.clone(),
        None,
        pipeline_config.clone(),
        40,
        20,
    ));

    let searcher = if web_results.is_empty() {
        None
    } else {
        let provider: Arc<dyn SearchProvider> = Arc::new(StubSearchProvider {
            results: web_results,
        });
        Some(Arc::new(WebSearcher::new(vec![provider], 5)))
    };

    let compressor = Arc::new(ContextCompressor::new(None, counter.clone()));
    let analyzer = Arc::new(TaskAnalyzer::new(None));
    let gap_detector = GapDetector::new(GapDetectorConfig::default());

    let pipeline = ContextPipeline::new(
        store.clone(),
        analyzer,
        scorer,
        gap_detector,
        searcher,
        compressor,
        counter,
        pipeline_config,
        SearchConfig::default(),
    );

    Harness {
        store,
        ingestor,
        pipeline,
    }
}

/// Upload a plaintext document and wait for ingestion to finish
pub async fn upload_text(harness: &Harness, user: &str, project: uuid::Uuid, name: &str, body: &str) {
    harness
        .ingestor
        .ingest(user, project, name, "text/plain", body.as_bytes())
        .await
        .unwrap();
}
