//! Error handling for the context tailoring engine

use thiserror::Error;

/// Result type alias for the tailoring engine
pub type Result<T> = std::result::Result<T, TailorError>;

/// Main error type for the tailoring engine
#[derive(Error, Debug)]
pub enum TailorError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Vector index error: {0}")]
    Index(#[from] IndexError),

    #[error("Metadata store error: {0}")]
    Store(#[from] StoreError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Chunking error: {0}")]
    Chunk(#[from] ChunkError),

    #[error("Web search error: {0}")]
    Search(#[from] SearchError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Request deadline elapsed")]
    DeadlineElapsed,

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

/// Errors from language model calls (task analysis, summarization, judging)
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout: operation took too long")]
    Timeout,
}

/// Errors from the embedding backend
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Embedding request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid embedding dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Embedder unavailable after retries")]
    Unavailable,

    #[error("Timeout: operation took too long")]
    Timeout,
}

/// Errors from the vector index
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Index not initialized")]
    NotInitialized,

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Upsert failed: {0}")]
    UpsertFailed(String),
}

/// Errors from the metadata store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Storage failed: {0}")]
    StorageFailed(String),
}

/// Errors from text extraction
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Extraction yielded no text")]
    EmptyExtract,

    #[error("Extraction failed: {0}")]
    Failed(String),
}

/// Errors from chunking
#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("Input has no non-whitespace content")]
    EmptyInput,

    #[error("Chunk exceeds hard token cap: {0} tokens")]
    LimitExceeded(usize),
}

/// Errors from web search providers
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("No search provider available")]
    NoProviderAvailable,

    #[error("Provider {provider} failed: {reason}")]
    ProviderFailed { provider: String, reason: String },

    #[error("Rate limited by {0}")]
    RateLimited(String),

    #[error("Timeout: operation took too long")]
    Timeout,
}

impl TailorError {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TailorError::Llm(LlmError::Timeout)
                | TailorError::Llm(LlmError::ConnectionFailed(_))
                | TailorError::Embedding(EmbeddingError::Timeout)
                | TailorError::Embedding(EmbeddingError::ConnectionFailed(_))
                | TailorError::Search(SearchError::Timeout)
                | TailorError::Search(SearchError::RateLimited(_))
                | TailorError::Http(_)
        )
    }

    /// Get error category for logging/metrics
    pub fn category(&self) -> &'static str {
        match self {
            TailorError::Llm(_) => "llm",
            TailorError::Embedding(_) => "embedding",
            TailorError::Index(_) => "index",
            TailorError::Store(_) => "store",
            TailorError::Extract(_) => "extract",
            TailorError::Chunk(_) => "chunk",
            TailorError::Search(_) => "search",
            TailorError::Config(_) => "config",
            TailorError::Validation(_) => "validation",
            TailorError::Io(_) => "io",
            TailorError::Serialization(_) => "serialization",
            TailorError::Http(_) => "http",
            TailorError::Database(_) => "database",
            TailorError::DeadlineElapsed => "deadline",
            TailorError::Generic(_) => "generic",
        }
    }

    /// Stable short code surfaced to API callers
    pub fn code(&self) -> &'static str {
        match self {
            TailorError::Store(StoreError::Forbidden(_)) => "FORBIDDEN",
            TailorError::Store(StoreError::NotFound(_)) => "NOT_FOUND",
            TailorError::Validation(_) => "VALIDATION_FAILED",
            TailorError::Search(SearchError::RateLimited(_)) => "RATE_LIMITED",
            TailorError::Llm(_)
            | TailorError::Embedding(_)
            | TailorError::Search(_)
            | TailorError::Http(_) => "UPSTREAM_UNAVAILABLE",
            TailorError::Chunk(ChunkError::LimitExceeded(_)) => "CHUNK_LIMIT_EXCEEDED",
            TailorError::Chunk(ChunkError::EmptyInput)
            | TailorError::Extract(ExtractError::EmptyExtract) => "VALIDATION_FAILED",
            _ => "INTERNAL",
        }
    }
}
