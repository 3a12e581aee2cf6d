//! Document ingestion: extract, chunk, embed and index

use crate::chunker::Chunker;
use crate::embedding::Embedder;
use crate::extract::TextExtractor;
use crate::index::{EntryMetadata, VectorEntry, VectorIndex};
use crate::scorer::collection_for;
use crate::store::{Document, MetadataStore, StoredChunk};
use crate::error::Result;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Outcome of processing one document
#[derive(Debug, Clone)]
pub struct IngestionSummary {
    pub document_id: Uuid,
    pub chunk_count: usize,
    pub token_total: usize,
}

/// Drives the ingestion pipeline for uploaded documents.
///
/// Each document is processed by a single task, so chunk positions and
/// vector upserts stay ordered per document.
pub struct DocumentIngestor {
    store: Arc<MetadataStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    extractor: TextExtractor,
    chunker: Arc<Chunker>,
    batch_size: usize,
}

impl DocumentIngestor {
    pub fn new(
        store: Arc<MetadataStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        chunker: Arc<Chunker>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
            extractor: TextExtractor::new(),
            chunker,
            batch_size: batch_size.max(1),
        }
    }

    /// Content address of stored bytes
    pub fn content_address(bytes: &[u8]) -> String {
        let mut hasher = DefaultHasher::new();
        bytes.hash(&mut hasher);
        format!("sha:{:016x}", hasher.finish())
    }

    /// Create the document row and run the full pipeline
    pub async fn ingest(
        &self,
        user_id: &str,
        project_id: Uuid,
        filename: &str,
        mime_type: &str,
        bytes: &[u8],
    ) -> Result<Document> {
        let document = self
            .store
            .create_document(
                user_id,
                project_id,
                filename,
                mime_type,
                bytes.len() as u64,
                &Self::content_address(bytes),
            )
            .await?;

        self.run(&document, bytes).await?;
        self.store
            .document_by_project_and_id(user_id, project_id, document.id)
            .await
    }

    /// Process a document, recording failure on its row
    pub async fn run(&self, document: &Document, bytes: &[u8]) -> Result<IngestionSummary> {
        match self.process(document, bytes).await {
            Ok(summary) => {
                info!(
                    document = %document.id,
                    chunks = summary.chunk_count,
                    "document ingested"
                );
                Ok(summary)
            }
            Err(e) => {
                error!(document = %document.id, error = %e, "ingestion failed");
                self.store
                    .mark_document_error(document.id, &e.to_string())
                    .await?;
                Err(e)
            }
        }
    }

    /// Extract, chunk, persist, embed and upsert for an existing document row
    pub async fn process(&self, document: &Document, bytes: &[u8]) -> Result<IngestionSummary> {
        let extraction = self
            .extractor
            .extract(&document.filename, &document.mime_type, bytes)?;

        let text_chunks = self.chunker.chunk(&extraction.content, &extraction.metadata)?;

        let stored: Vec<StoredChunk> = text_chunks
            .iter()
            .map(|chunk| StoredChunk {
                id: Uuid::new_v4(),
                document_id: document.id,
                project_id: document.project_id,
                content: chunk.content.clone(),
                position: chunk.position,
                token_count: chunk.token_count,
                metadata: serde_json::to_value(&chunk.metadata)
                    .unwrap_or_else(|_| serde_json::json!({})),
            })
            .collect();

        self.store.insert_chunks(&stored).await?;

        // Embed in batches, preserving chunk order end to end
        let mut entries = Vec::with_capacity(stored.len());
        for batch in stored.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;
            for (chunk, embedding) in batch.iter().zip(vectors) {
                entries.push(VectorEntry {
                    id: chunk.id,
                    embedding,
                    metadata: EntryMetadata {
                        project_id: chunk.project_id,
                        document_id: chunk.document_id,
                        position: chunk.position,
                    },
                });
            }
        }

        self.index
            .upsert(&collection_for(document.project_id), entries)
            .await?;

        let structural = serde_json::json!({
            "hasHeadings": extraction.metadata.has_headings,
            "codeLanguage": extraction.metadata.code_language,
            "pageCount": extraction.metadata.page_count,
        });
        self.store
            .mark_document_ready(document.id, stored.len(), structural)
            .await?;

        Ok(IngestionSummary {
            document_id: document.id,
            chunk_count: stored.len(),
            token_total: stored.iter().map(|c| c.token_count).sum(),
        })
    }

    /// Delete one document plus its chunks and vector entries
    pub async fn delete_document(
        &self,
        user_id: &str,
        project_id: Uuid,
        document_id: Uuid,
    ) -> Result<()> {
        let chunk_ids = self
            .store
            .delete_document(user_id, project_id, document_id)
            .await?;
        self.index
            .delete(&collection_for(project_id), &chunk_ids)
            .await
    }

    /// Delete a project with all cascades plus its vector collection
    pub async fn delete_project(&self, user_id: &str, project_id: Uuid) -> Result<()> {
        self.store.delete_project(user_id, project_id).await?;
        self.index
            .delete_collection(&collection_for(project_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::ChunkerConfig;
    use crate::error::EmbeddingError;
    use crate::index::SqliteVectorIndex;
    use crate::store::DocumentStatus;
    use crate::tokens::TokenCounter;
    use async_trait::async_trait;

    /// Deterministic embedder used across ingestion tests
    struct StubEmbedder {
        dimension: usize,
        fail: bool,
    }

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if self.fail {
                return Err(EmbeddingError::Unavailable.into());
            }
            let mut v = vec![0.0; self.dimension];
            for (i, byte) in text.bytes().enumerate() {
                v[i % self.dimension] += byte as f32 / 255.0;
            }
            Ok(v)
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut out = Vec::with_capacity(texts.len());
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        }

        fn dimension(&self) -> usize {
            self.dimension
        }
    }

    async fn ingestor(fail_embedder: bool) -> (DocumentIngestor, Arc<MetadataStore>) {
        let store = Arc::new(MetadataStore::in_memory().await.unwrap());
        let index = Arc::new(SqliteVectorIndex::in_memory().await.unwrap());
        let embedder = Arc::new(StubEmbedder {
            dimension: 8,
            fail: fail_embedder,
        });
        let chunker = Arc::new(Chunker::new(
            ChunkerConfig::default(),
            Arc::new(TokenCounter::new()),
        ));
        let ingestor = DocumentIngestor::new(store.clone(), index, embedder, chunker, 4);
        (ingestor, store)
    }

    #[tokio::test]
    async fn test_ingest_markdown_document() {
        let (ingestor, store) = ingestor(false).await;
        let project = store.create_project("alice", "docs", None).await.unwrap();

        let content = b"# Routing\n\nRegister each route on the router.\n\n# Validation\n\nValidate every payload.";
        let document = ingestor
            .ingest("alice", project.id, "guide.md", "text/markdown", content)
            .await
            .unwrap();

        assert_eq!(document.status, DocumentStatus::Ready);
        assert!(document.chunk_count >= 2, "split at headings");
        assert_eq!(
            document.chunk_count,
            store.chunk_ids_for_document(document.id).await.unwrap().len()
        );
    }

    #[tokio::test]
    async fn test_ingest_failure_marks_error() {
        let (ingestor, store) = ingestor(true).await;
        let project = store.create_project("alice", "docs", None).await.unwrap();

        let result = ingestor
            .ingest("alice", project.id, "guide.md", "text/markdown", b"# A\n\nBody")
            .await;
        assert!(result.is_err());

        let documents = store.list_documents("alice", project.id).await.unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].status, DocumentStatus::Error);
        assert!(documents[0].error_message.is_some());
    }

    #[tokio::test]
    async fn test_empty_upload_marks_error() {
        let (ingestor, store) = ingestor(false).await;
        let project = store.create_project("alice", "docs", None).await.unwrap();

        let result = ingestor
            .ingest("alice", project.id, "empty.txt", "text/plain", b"   ")
            .await;
        assert!(result.is_err());

        let documents = store.list_documents("alice", project.id).await.unwrap();
        assert_eq!(documents[0].status, DocumentStatus::Error);
    }

    #[tokio::test]
    async fn test_delete_document_cleans_vectors() {
        let (ingestor, store) = ingestor(false).await;
        let project = store.create_project("alice", "docs", None).await.unwrap();

        let document = ingestor
            .ingest("alice", project.id, "a.txt", "text/plain", b"Some plain content here.")
            .await
            .unwrap();

        ingestor
            .delete_document("alice", project.id, document.id)
            .await
            .unwrap();

        let documents = store.list_documents("alice", project.id).await.unwrap();
        assert!(documents.is_empty());
    }

    #[test]
    fn test_content_address_stable() {
        let a = DocumentIngestor::content_address(b"same bytes");
        let b = DocumentIngestor::content_address(b"same bytes");
        let c = DocumentIngestor::content_address(b"other bytes");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("sha:"));
    }
}
