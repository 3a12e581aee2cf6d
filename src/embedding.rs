//! Embedding backend: fixed-dimension vectors for text, single or batched

use crate::config::EmbeddingConfig;
use crate::error::{EmbeddingError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Base delay for the retry backoff
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
/// Maximum attempts per embedding request
const MAX_ATTEMPTS: u32 = 3;

/// Trait for embedding providers.
///
/// Output dimension is constant across all calls to one deployment; batch
/// order matches input order; batch failure is total, never partial.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts, preserving input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Fixed output dimension of this deployment
    fn dimension(&self) -> usize;
}

/// Ollama embedding client
pub struct OllamaEmbedder {
    client: reqwest::Client,
    config: EmbeddingConfig,
    in_flight: Arc<Semaphore>,
}

#[derive(Debug, Serialize)]
struct OllamaEmbedRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| EmbeddingError::ConnectionFailed(e.to_string()))?;

        let in_flight = Arc::new(Semaphore::new(config.max_concurrent_requests.max(1)));

        Ok(Self {
            client,
            config,
            in_flight,
        })
    }

    fn api_url(&self) -> String {
        format!(
            "{}/api/embeddings",
            self.config.ollama_url.trim_end_matches('/')
        )
    }

    /// One request attempt without retries
    async fn embed_once(&self, text: &str) -> Result<Vec<f32>> {
        let request = OllamaEmbedRequest {
            model: self.config.embedding_model.clone(),
            prompt: text.to_string(),
        };

        let response = timeout(
            Duration::from_secs(self.config.timeout),
            self.client.post(self.api_url()).json(&request).send(),
        )
        .await
        .map_err(|_| EmbeddingError::Timeout)?
        .map_err(|e| EmbeddingError::ConnectionFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(EmbeddingError::RequestFailed(format!("{}: {}", status, body)).into());
        }

        let parsed: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::RequestFailed(e.to_string()))?;

        if parsed.embedding.len() != self.config.dimension {
            return Err(EmbeddingError::InvalidDimension {
                expected: self.config.dimension,
                actual: parsed.embedding.len(),
            }
            .into());
        }

        Ok(parsed.embedding)
    }

    /// Retry wrapper: exponential backoff, surfacing `Unavailable` at the end
    async fn embed_with_retries(&self, text: &str) -> Result<Vec<f32>> {
        let mut delay = RETRY_BASE_DELAY;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.embed_once(text).await {
                Ok(vector) => return Ok(vector),
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    warn!(attempt, error = %e, "embedding attempt failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) if attempt < MAX_ATTEMPTS => return Err(e),
                Err(e) => {
                    warn!(error = %e, "embedding failed after final attempt");
                    return Err(EmbeddingError::Unavailable.into());
                }
            }
        }
        Err(EmbeddingError::Unavailable.into())
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let _permit = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| EmbeddingError::Unavailable)?;
        self.embed_with_retries(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        debug!("Embedding batch of {} texts", texts.len());

        // Concurrent requests bounded by the semaphore; try_join_all keeps
        // input order and makes any failure total for the batch.
        let futures = texts.iter().map(|text| async move {
            let _permit = self
                .in_flight
                .acquire()
                .await
                .map_err(|_| EmbeddingError::Unavailable)?;
            self.embed_with_retries(text).await
        });

        futures::future::try_join_all(futures).await
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}
