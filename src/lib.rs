//! Context tailoring engine
//!
//! Assembles compact, high-relevance context artifacts for downstream LLM
//! platforms from a project's uploaded documents:
//! - Document ingestion: extraction, chunking, embedding, vector indexing
//! - Task analysis and hybrid retrieval with optional reranking
//! - Gap detection with web-search augmentation
//! - Token-budgeted compression, synthesis and platform formatting
//!
//! # Example
//!
//! ```rust,no_run
//! use context_tailor::{TailorConfig, MetadataStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = TailorConfig::default();
//!     config.apply_env_overrides();
//!     config.validate()?;
//!
//!     let store = MetadataStore::connect(&config.store).await?;
//!     let project = store.create_project("user-1", "docs", None).await?;
//!     println!("project {}", project.id);
//!     Ok(())
//! }
//! ```

pub mod analyzer;
pub mod api;
pub mod chunker;
pub mod compressor;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod formatter;
pub mod gaps;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod pipeline;
pub mod quality;
pub mod scorer;
pub mod store;
pub mod synthesizer;
pub mod tokens;
pub mod websearch;
pub mod window;

// Re-export main types
pub use analyzer::{Complexity, KnowledgeDomain, TaskAnalysis, TaskAnalyzer, TaskType};
pub use api::{create_router, AppState, AuthResolver, StaticTokenResolver};
pub use chunker::{ChunkStrategy, Chunker, ChunkerConfig, TextChunk};
pub use compressor::{
    CompressedChunk, CompressionLevel, CompressionResult, CompressionStats, CompressorOptions,
    ContextCompressor,
};
pub use config::{
    EmbeddingConfig, IndexConfig, LlmConfig, PipelineConfig, RerankConfig, RerankProvider,
    SearchConfig, ServerConfig, StoreConfig, TailorConfig,
};
pub use embedding::{Embedder, OllamaEmbedder};
pub use error::{Result, TailorError};
pub use extract::{DocumentFormat, ExtractMetadata, Extraction, TextExtractor};
pub use formatter::{Platform, PlatformFormatter, SectionSummary};
pub use gaps::{Gap, GapDetector, GapDetectorConfig, GapReport, GapSeverity, GapType};
pub use index::{MetadataFilter, QueryMatch, SqliteVectorIndex, VectorEntry, VectorIndex};
pub use ingest::{DocumentIngestor, IngestionSummary};
pub use llm::{LlmClient, Message, OllamaClient, Role};
pub use pipeline::{
    ContextPipeline, TailorMetadata, TailorOptions, TailorPreviewResponse, TailorRequest,
    TailorResponse,
};
pub use quality::{QualityReport, QualityScorer, SubScores};
pub use scorer::{CrossEncoder, RelevanceScorer, ScoredChunk, ScoringOutcome};
pub use store::{Document, DocumentStatus, MetadataStore, Project, Session, StoredChunk};
pub use synthesizer::{
    Section, SourceRef, SourceType, SynthesizedBlock, SynthesizedContext, Synthesizer,
};
pub use tokens::TokenCounter;
pub use websearch::{SearchOptions, SearchProvider, WebSearchResult, WebSearcher};
pub use window::{AllocationStrategy, ContextWindowManager, ModelConfig, TokenBudget};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with(char::is_numeric));
    }
}
