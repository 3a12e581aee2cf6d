//! Per-project vector collections with metadata-filtered similarity queries

use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// Maximum entries per upsert statement batch
const UPSERT_BATCH_SIZE: usize = 100;

/// An entry in a vector collection; the chunk id serves as the entry id
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub id: Uuid,
    pub embedding: Vec<f32>,
    pub metadata: EntryMetadata,
}

/// Filterable metadata carried by every entry
#[derive(Debug, Clone)]
pub struct EntryMetadata {
    pub project_id: Uuid,
    pub document_id: Uuid,
    pub position: usize,
}

/// A similarity match returned from a query
#[derive(Debug, Clone)]
pub struct QueryMatch {
    pub id: Uuid,
    pub score: f32,
    pub metadata: EntryMetadata,
}

/// Filter clause: equality or membership
#[derive(Debug, Clone)]
pub enum FilterValue {
    Eq(String),
    AnyOf(Vec<String>),
}

/// Metadata filter applied during a query
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    clauses: HashMap<String, FilterValue>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl ToString) -> Self {
        self.clauses
            .insert(field.to_string(), FilterValue::Eq(value.to_string()));
        self
    }

    pub fn any_of(mut self, field: &str, values: Vec<String>) -> Self {
        self.clauses
            .insert(field.to_string(), FilterValue::AnyOf(values));
        self
    }

    fn matches(&self, field: &str, value: &str) -> bool {
        match self.clauses.get(field) {
            None => true,
            Some(FilterValue::Eq(expected)) => expected == value,
            Some(FilterValue::AnyOf(options)) => options.iter().any(|o| o == value),
        }
    }

    fn accepts(&self, metadata: &EntryMetadata) -> bool {
        self.matches("project_id", &metadata.project_id.to_string())
            && self.matches("document_id", &metadata.document_id.to_string())
            && self.matches("position", &metadata.position.to_string())
    }
}

/// Trait for vector index backends
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace entries, idempotent by entry id
    async fn upsert(&self, collection: &str, entries: Vec<VectorEntry>) -> Result<()>;

    /// Query nearest entries, highest score first
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryMatch>>;

    /// Delete entries by id
    async fn delete(&self, collection: &str, ids: &[Uuid]) -> Result<()>;

    /// Drop an entire collection
    async fn delete_collection(&self, collection: &str) -> Result<()>;
}

/// SQLite-backed vector index with brute-force cosine scans
pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    /// Open (and bootstrap) the index database
    pub async fn connect(config: &IndexConfig) -> Result<Self> {
        let database_url = config
            .database_url
            .as_ref()
            .ok_or(IndexError::NotInitialized)?;

        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| IndexError::QueryFailed(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vector_entries (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                embedding BLOB NOT NULL,
                project_id TEXT NOT NULL,
                document_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                PRIMARY KEY (collection, id)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_vector_entries_collection ON vector_entries(collection)",
        )
        .execute(&pool)
        .await?;

        info!("Vector index initialized");
        Ok(Self { pool })
    }

    /// In-memory index for tests
    pub async fn in_memory() -> Result<Self> {
        Self::connect(&IndexConfig {
            backend: "sqlite".to_string(),
            database_url: Some("sqlite::memory:".to_string()),
            query_top_k: 40,
        })
        .await
    }

    /// Calculate cosine similarity between two vectors
    pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return 0.0;
        }

        let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }

        dot_product / (norm_a * norm_b)
    }

    /// Serialize embedding for storage
    pub fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding
            .iter()
            .flat_map(|f| f.to_le_bytes().to_vec())
            .collect()
    }

    /// Deserialize embedding from storage
    pub fn deserialize_embedding(data: &[u8]) -> Vec<f32> {
        data.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, collection: &str, entries: Vec<VectorEntry>) -> Result<()> {
        for batch in entries.chunks(UPSERT_BATCH_SIZE) {
            let mut tx = self.pool.begin().await?;
            for entry in batch {
                let blob = Self::serialize_embedding(&entry.embedding);
                sqlx::query(
                    r#"
                    INSERT OR REPLACE INTO vector_entries
                        (collection, id, embedding, project_id, document_id, position)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                )
                .bind(collection)
                .bind(entry.id.to_string())
                .bind(&blob)
                .bind(entry.metadata.project_id.to_string())
                .bind(entry.metadata.document_id.to_string())
                .bind(entry.metadata.position as i64)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
        }

        debug!(collection, "upserted vector entries");
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryMatch>> {
        let rows = sqlx::query("SELECT * FROM vector_entries WHERE collection = ?1")
            .bind(collection)
            .fetch_all(&self.pool)
            .await?;

        let mut matches = Vec::new();
        for row in rows {
            let id: String = row.get("id");
            let blob: Vec<u8> = row.get("embedding");
            let project_id: String = row.get("project_id");
            let document_id: String = row.get("document_id");
            let position: i64 = row.get("position");

            let metadata = EntryMetadata {
                project_id: Uuid::parse_str(&project_id)
                    .map_err(|e| IndexError::QueryFailed(e.to_string()))?,
                document_id: Uuid::parse_str(&document_id)
                    .map_err(|e| IndexError::QueryFailed(e.to_string()))?,
                position: position as usize,
            };

            if let Some(filter) = filter {
                if !filter.accepts(&metadata) {
                    continue;
                }
            }

            let embedding = Self::deserialize_embedding(&blob);
            let similarity = Self::cosine_similarity(vector, &embedding);

            matches.push(QueryMatch {
                id: Uuid::parse_str(&id).map_err(|e| IndexError::QueryFailed(e.to_string()))?,
                // Negative cosine carries no retrieval signal here
                score: similarity.max(0.0),
                metadata,
            });
        }

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(top_k);

        debug!(collection, matches = matches.len(), "vector query");
        Ok(matches)
    }

    async fn delete(&self, collection: &str, ids: &[Uuid]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("DELETE FROM vector_entries WHERE collection = ?1 AND id = ?2")
                .bind(collection)
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_collection(&self, collection: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM vector_entries WHERE collection = ?1")
            .bind(collection)
            .execute(&self.pool)
            .await?;

        info!(
            collection,
            removed = result.rows_affected(),
            "dropped vector collection"
        );
        Ok(())
    }
}
