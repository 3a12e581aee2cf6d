//! Configuration management for the tailoring engine

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main configuration for the tailoring engine
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TailorConfig {
    /// LLM backend for task analysis, summarization and judging
    pub llm: LlmConfig,

    /// Embedding backend configuration
    pub embedding: EmbeddingConfig,

    /// Vector index configuration
    pub index: IndexConfig,

    /// Metadata store configuration
    pub store: StoreConfig,

    /// Cross-encoder reranker configuration
    #[serde(default)]
    pub rerank: RerankConfig,

    /// Web search provider configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// Pipeline tuning knobs
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
}

/// Language model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Ollama server URL
    pub ollama_url: String,

    /// Model for text generation (analysis, summaries, judging)
    pub text_model: String,

    /// Maximum tokens for generation
    pub max_tokens: u32,

    /// Temperature for generation
    pub temperature: f32,

    /// Request timeout in seconds
    pub timeout: u64,
}

/// Embedding backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Ollama server URL
    pub ollama_url: String,

    /// Model for embeddings
    pub embedding_model: String,

    /// Embedding dimension expected from the model
    pub dimension: usize,

    /// Number of texts per embedding batch
    pub batch_size: usize,

    /// Maximum concurrent in-flight embedding requests
    pub max_concurrent_requests: usize,

    /// Request timeout in seconds
    pub timeout: u64,
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Index backend ("sqlite")
    pub backend: String,

    /// Database URL for the SQLite backend
    pub database_url: Option<String>,

    /// Wide top-K fetched per scoring query
    pub query_top_k: usize,
}

/// Metadata store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database URL
    pub database_url: Option<String>,
}

/// Reranker provider selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankProvider {
    Dedicated,
    Llm,
    Off,
}

/// Cross-encoder reranker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankConfig {
    /// Which reranker variant to use
    pub provider: RerankProvider,

    /// Endpoint URL for the dedicated reranker API
    pub endpoint: Option<String>,

    /// API key for the dedicated reranker
    pub api_key: Option<String>,

    /// How many top candidates to rerank
    pub top_n: usize,

    /// Request timeout in seconds
    pub timeout: u64,
}

/// Web search provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Tavily API key (primary provider)
    pub tavily_api_key: Option<String>,

    /// Brave Search API key (fallback provider)
    pub brave_api_key: Option<String>,

    /// Maximum results per query
    pub max_results: usize,

    /// Maximum queries issued per tailor request
    pub max_queries_per_request: usize,

    /// Request timeout in seconds
    pub timeout: u64,
}

/// Pipeline tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Weight of the semantic score in the hybrid base score
    pub semantic_weight: f32,

    /// Weight of the keyword score in the hybrid base score
    pub keyword_weight: f32,

    /// Weight of the base score when fused with a rerank score
    pub base_weight: f32,

    /// Weight of the rerank score when fused with the base score
    pub rerank_weight: f32,

    /// Score threshold below which domain coverage is considered shallow
    pub shallow_score_threshold: f32,

    /// Minimum matching chunks for non-shallow domain coverage
    pub shallow_chunk_minimum: usize,

    /// Score at or above which a chunk is kept verbatim
    pub full_threshold: f32,

    /// Score at or above which a chunk is summarized rather than reduced to keywords
    pub summary_threshold: f32,

    /// Maximum concurrent child tasks per request
    pub fan_out_limit: usize,

    /// Per-request total deadline in seconds
    pub request_deadline: u64,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    pub bind: String,

    /// Static bearer tokens mapped to user ids (dev/test auth)
    #[serde(default)]
    pub auth_tokens: HashMap<String, String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            text_model: "llama3.2".to_string(),
            max_tokens: 2048,
            temperature: 0.2,
            timeout: 30,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            dimension: 768,
            batch_size: 32,
            max_concurrent_requests: 4,
            timeout: 30,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            database_url: Some("sqlite:vectors.db".to_string()),
            query_top_k: 40,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: Some("sqlite:tailor.db".to_string()),
        }
    }
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            provider: RerankProvider::Off,
            endpoint: None,
            api_key: None,
            top_n: 20,
            timeout: 15,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            tavily_api_key: None,
            brave_api_key: None,
            max_results: 5,
            max_queries_per_request: 3,
            timeout: 15,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            semantic_weight: 0.7,
            keyword_weight: 0.3,
            base_weight: 0.5,
            rerank_weight: 0.5,
            shallow_score_threshold: 0.5,
            shallow_chunk_minimum: 2,
            full_threshold: 0.7,
            summary_threshold: 0.4,
            fan_out_limit: 8,
            request_deadline: 60,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8420".to_string(),
            auth_tokens: HashMap::new(),
        }
    }
}

impl TailorConfig {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        let config = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            Some("yaml") | Some("yml") => serde_yml::from_str(&content)?,
            _ => return Err(anyhow::anyhow!("Unsupported config file format")),
        };
        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file<P: AsRef<std::path::Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            Some("toml") => toml::to_string(self)?,
            Some("yaml") | Some("yml") => serde_yml::to_string(self)?,
            _ => return Err(anyhow::anyhow!("Unsupported config file format")),
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply credential overrides from environment variables
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("TAILOR_OLLAMA_URL") {
            self.llm.ollama_url = url.clone();
            self.embedding.ollama_url = url;
        }
        if let Ok(model) = std::env::var("TAILOR_EMBEDDING_MODEL") {
            self.embedding.embedding_model = model;
        }
        if let Ok(key) = std::env::var("TAILOR_TAVILY_API_KEY") {
            self.search.tavily_api_key = Some(key);
        }
        if let Ok(key) = std::env::var("TAILOR_BRAVE_API_KEY") {
            self.search.brave_api_key = Some(key);
        }
        if let Ok(key) = std::env::var("TAILOR_RERANK_API_KEY") {
            self.rerank.api_key = Some(key);
        }
        if let Ok(provider) = std::env::var("TAILOR_RERANK_PROVIDER") {
            self.rerank.provider = match provider.as_str() {
                "dedicated" => RerankProvider::Dedicated,
                "llm" => RerankProvider::Llm,
                _ => RerankProvider::Off,
            };
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.llm.ollama_url.starts_with("http") {
            return Err(anyhow::anyhow!("Invalid LLM URL: {}", self.llm.ollama_url));
        }

        if self.llm.text_model.is_empty() {
            return Err(anyhow::anyhow!("Text model name cannot be empty"));
        }

        if self.embedding.embedding_model.is_empty() {
            return Err(anyhow::anyhow!("Embedding model name cannot be empty"));
        }

        if self.embedding.dimension == 0 {
            return Err(anyhow::anyhow!(
                "Embedding dimension must be greater than 0"
            ));
        }

        if self.embedding.batch_size == 0 {
            return Err(anyhow::anyhow!(
                "Embedding batch size must be greater than 0"
            ));
        }

        let weight_sum = self.pipeline.semantic_weight + self.pipeline.keyword_weight;
        if (weight_sum - 1.0).abs() > 1e-3 {
            return Err(anyhow::anyhow!(
                "Semantic and keyword weights must sum to 1.0, got {}",
                weight_sum
            ));
        }

        if !(0.0..=1.0).contains(&self.pipeline.shallow_score_threshold) {
            return Err(anyhow::anyhow!(
                "Shallow score threshold must be between 0.0 and 1.0"
            ));
        }

        if self.pipeline.fan_out_limit == 0 {
            return Err(anyhow::anyhow!("Fan-out limit must be greater than 0"));
        }

        if self.rerank.provider == RerankProvider::Dedicated && self.rerank.endpoint.is_none() {
            return Err(anyhow::anyhow!(
                "Dedicated reranker requires an endpoint URL"
            ));
        }

        Ok(())
    }
}
