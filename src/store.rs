//! Metadata store: projects, documents, chunks and sessions

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// A project owning uploaded documents
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Document processing lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Processing,
    Ready,
    Error,
}

impl DocumentStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "PROCESSING",
            Self::Ready => "READY",
            Self::Error => "ERROR",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "PROCESSING" => Ok(Self::Processing),
            "READY" => Ok(Self::Ready),
            "ERROR" => Ok(Self::Error),
            other => Err(StoreError::StorageFailed(format!("bad status: {}", other)).into()),
        }
    }
}

/// An uploaded document belonging to one project
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: Uuid,
    pub project_id: Uuid,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: u64,
    /// Content address of the stored bytes
    pub content_address: String,
    pub status: DocumentStatus,
    pub chunk_count: usize,
    /// Structural hints recorded at extraction time
    pub structural_metadata: serde_json::Value,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A persisted chunk, immutable once its document is READY
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredChunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub project_id: Uuid,
    pub content: String,
    pub position: usize,
    pub token_count: usize,
    pub metadata: serde_json::Value,
}

/// Target platform a session was assembled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionPlatform {
    Chatgpt,
    Claude,
}

impl SessionPlatform {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Chatgpt => "CHATGPT",
            Self::Claude => "CLAUDE",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "CHATGPT" => Ok(Self::Chatgpt),
            "CLAUDE" => Ok(Self::Claude),
            other => Err(StoreError::StorageFailed(format!("bad platform: {}", other)).into()),
        }
    }
}

/// Immutable snapshot of one completed tailor request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub user_id: String,
    pub project_id: Uuid,
    pub task_input: String,
    pub assembled_context: String,
    pub target_platform: SessionPlatform,
    pub token_count: usize,
    /// Quality in [0,1]
    pub quality_score: f32,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// SQLite-backed metadata store
pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    /// Open (and bootstrap) the metadata database
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let database_url = config
            .database_url
            .as_ref()
            .ok_or_else(|| StoreError::StorageFailed("No database URL provided".to_string()))?;

        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::StorageFailed(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::bootstrap(&pool).await?;
        info!("Metadata store initialized");
        Ok(Self { pool })
    }

    /// In-memory store for tests
    pub async fn in_memory() -> Result<Self> {
        Self::connect(&StoreConfig {
            database_url: Some("sqlite::memory:".to_string()),
        })
        .await
    }

    async fn bootstrap(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                filename TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                content_address TEXT NOT NULL,
                status TEXT NOT NULL,
                chunk_count INTEGER NOT NULL DEFAULT 0,
                structural_metadata TEXT NOT NULL DEFAULT '{}',
                error_message TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                project_id TEXT NOT NULL,
                content TEXT NOT NULL,
                position INTEGER NOT NULL,
                token_count INTEGER NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                task_input TEXT NOT NULL,
                assembled_context TEXT NOT NULL,
                target_platform TEXT NOT NULL,
                token_count INTEGER NOT NULL,
                quality_score REAL NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_project ON documents(project_id)")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id)")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions(project_id)")
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Verify the caller owns the project; `Forbidden` when owned by another
    /// user, `NotFound` when absent
    pub async fn authorize_project(&self, user_id: &str, project_id: Uuid) -> Result<Project> {
        let row = sqlx::query("SELECT * FROM projects WHERE id = ?1")
            .bind(project_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        let row = row.ok_or_else(|| StoreError::NotFound(format!("project {}", project_id)))?;
        let project = Self::project_from_row(&row)?;
        if project.user_id != user_id {
            return Err(StoreError::Forbidden(format!("project {}", project_id)).into());
        }
        Ok(project)
    }

    // ---- projects ----

    pub async fn create_project(
        &self,
        user_id: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<Project> {
        let project = Project {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            description: description.map(|d| d.to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO projects (id, user_id, name, description, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(project.id.to_string())
        .bind(&project.user_id)
        .bind(&project.name)
        .bind(&project.description)
        .bind(project.created_at.to_rfc3339())
        .bind(project.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(project = %project.id, "created project");
        Ok(project)
    }

    pub async fn list_projects(&self, user_id: &str) -> Result<Vec<Project>> {
        let rows =
            sqlx::query("SELECT * FROM projects WHERE user_id = ?1 ORDER BY created_at DESC")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;

        rows.iter().map(Self::project_from_row).collect()
    }

    pub async fn update_project(
        &self,
        user_id: &str,
        project_id: Uuid,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Project> {
        let mut project = self.authorize_project(user_id, project_id).await?;

        if let Some(name) = name {
            project.name = name.to_string();
        }
        if let Some(description) = description {
            project.description = Some(description.to_string());
        }
        project.updated_at = Utc::now();

        sqlx::query("UPDATE projects SET name = ?1, description = ?2, updated_at = ?3 WHERE id = ?4")
            .bind(&project.name)
            .bind(&project.description)
            .bind(project.updated_at.to_rfc3339())
            .bind(project_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(project)
    }

    /// Delete a project; documents, chunks and sessions cascade
    pub async fn delete_project(&self, user_id: &str, project_id: Uuid) -> Result<()> {
        self.authorize_project(user_id, project_id).await?;

        sqlx::query("DELETE FROM projects WHERE id = ?1")
            .bind(project_id.to_string())
            .execute(&self.pool)
            .await?;

        info!(project = %project_id, "deleted project with cascades");
        Ok(())
    }

    // ---- documents ----

    pub async fn create_document(
        &self,
        user_id: &str,
        project_id: Uuid,
        filename: &str,
        mime_type: &str,
        size_bytes: u64,
        content_address: &str,
    ) -> Result<Document> {
        self.authorize_project(user_id, project_id).await?;

        let document = Document {
            id: Uuid::new_v4(),
            project_id,
            filename: filename.to_string(),
            mime_type: mime_type.to_string(),
            size_bytes,
            content_address: content_address.to_string(),
            status: DocumentStatus::Processing,
            chunk_count: 0,
            structural_metadata: serde_json::json!({}),
            error_message: None,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO documents
                (id, project_id, filename, mime_type, size_bytes, content_address,
                 status, chunk_count, structural_metadata, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(document.id.to_string())
        .bind(project_id.to_string())
        .bind(&document.filename)
        .bind(&document.mime_type)
        .bind(document.size_bytes as i64)
        .bind(&document.content_address)
        .bind(document.status.as_str())
        .bind(document.chunk_count as i64)
        .bind(document.structural_metadata.to_string())
        .bind(document.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(document = %document.id, "created document");
        Ok(document)
    }

    /// Mark a document READY with its final chunk count and structural hints
    pub async fn mark_document_ready(
        &self,
        document_id: Uuid,
        chunk_count: usize,
        structural_metadata: serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE documents
            SET status = ?1, chunk_count = ?2, structural_metadata = ?3, error_message = NULL
            WHERE id = ?4
            "#,
        )
        .bind(DocumentStatus::Ready.as_str())
        .bind(chunk_count as i64)
        .bind(structural_metadata.to_string())
        .bind(document_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark a document failed with a reason
    pub async fn mark_document_error(&self, document_id: Uuid, reason: &str) -> Result<()> {
        sqlx::query("UPDATE documents SET status = ?1, error_message = ?2 WHERE id = ?3")
            .bind(DocumentStatus::Error.as_str())
            .bind(reason)
            .bind(document_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_documents(&self, user_id: &str, project_id: Uuid) -> Result<Vec<Document>> {
        self.authorize_project(user_id, project_id).await?;

        let rows = sqlx::query(
            "SELECT * FROM documents WHERE project_id = ?1 ORDER BY created_at DESC",
        )
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::document_from_row).collect()
    }

    pub async fn document_by_project_and_id(
        &self,
        user_id: &str,
        project_id: Uuid,
        document_id: Uuid,
    ) -> Result<Document> {
        self.authorize_project(user_id, project_id).await?;

        let row = sqlx::query("SELECT * FROM documents WHERE id = ?1 AND project_id = ?2")
            .bind(document_id.to_string())
            .bind(project_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        let row = row.ok_or_else(|| StoreError::NotFound(format!("document {}", document_id)))?;
        Self::document_from_row(&row)
    }

    /// Delete a document, returning the ids of its chunks so the caller can
    /// clean up the vector collection
    pub async fn delete_document(
        &self,
        user_id: &str,
        project_id: Uuid,
        document_id: Uuid,
    ) -> Result<Vec<Uuid>> {
        self.document_by_project_and_id(user_id, project_id, document_id)
            .await?;

        let chunk_ids = self.chunk_ids_for_document(document_id).await?;

        sqlx::query("DELETE FROM documents WHERE id = ?1")
            .bind(document_id.to_string())
            .execute(&self.pool)
            .await?;

        debug!(document = %document_id, chunks = chunk_ids.len(), "deleted document");
        Ok(chunk_ids)
    }

    /// Filenames of a project's documents, keyed by document id
    pub async fn document_titles(
        &self,
        project_id: Uuid,
    ) -> Result<std::collections::HashMap<Uuid, String>> {
        let rows = sqlx::query("SELECT id, filename FROM documents WHERE project_id = ?1")
            .bind(project_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        let mut titles = std::collections::HashMap::new();
        for row in rows {
            let id: String = row.get("id");
            let filename: String = row.get("filename");
            let id = Uuid::parse_str(&id).map_err(|e| StoreError::StorageFailed(e.to_string()))?;
            titles.insert(id, filename);
        }
        Ok(titles)
    }

    // ---- chunks ----

    /// Bulk-insert the chunks of one document in a single transaction
    pub async fn insert_chunks(&self, chunks: &[StoredChunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks
                    (id, document_id, project_id, content, position, token_count, metadata)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(chunk.id.to_string())
            .bind(chunk.document_id.to_string())
            .bind(chunk.project_id.to_string())
            .bind(&chunk.content)
            .bind(chunk.position as i64)
            .bind(chunk.token_count as i64)
            .bind(chunk.metadata.to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(count = chunks.len(), "inserted chunks");
        Ok(())
    }

    pub async fn chunks_by_ids(&self, ids: &[Uuid]) -> Result<Vec<StoredChunk>> {
        let mut chunks = Vec::with_capacity(ids.len());
        for id in ids {
            let row = sqlx::query("SELECT * FROM chunks WHERE id = ?1")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
            if let Some(row) = row {
                chunks.push(Self::chunk_from_row(&row)?);
            }
        }
        Ok(chunks)
    }

    /// All chunks of a project's READY documents, in document/position order
    pub async fn chunks_by_project(&self, project_id: Uuid, limit: usize) -> Result<Vec<StoredChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT chunks.* FROM chunks
            JOIN documents ON documents.id = chunks.document_id
            WHERE chunks.project_id = ?1 AND documents.status = 'READY'
            ORDER BY chunks.document_id, chunks.position
            LIMIT ?2
            "#,
        )
        .bind(project_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::chunk_from_row).collect()
    }

    pub async fn chunk_ids_for_document(&self, document_id: Uuid) -> Result<Vec<Uuid>> {
        let rows = sqlx::query("SELECT id FROM chunks WHERE document_id = ?1 ORDER BY position")
            .bind(document_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let id: String = row.get("id");
                Uuid::parse_str(&id)
                    .map_err(|e| StoreError::StorageFailed(e.to_string()).into())
            })
            .collect()
    }

    // ---- sessions ----

    /// Persist a completed session; sessions are append-only
    pub async fn create_session(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions
                (id, user_id, project_id, task_input, assembled_context, target_platform,
                 token_count, quality_score, metadata, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(session.id.to_string())
        .bind(&session.user_id)
        .bind(session.project_id.to_string())
        .bind(&session.task_input)
        .bind(&session.assembled_context)
        .bind(session.target_platform.as_str())
        .bind(session.token_count as i64)
        .bind(session.quality_score as f64)
        .bind(session.metadata.to_string())
        .bind(session.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(session = %session.id, "persisted session");
        Ok(())
    }

    pub async fn list_sessions_by_project(
        &self,
        user_id: &str,
        project_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Session>> {
        self.authorize_project(user_id, project_id).await?;

        let rows = sqlx::query(
            "SELECT * FROM sessions WHERE project_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )
        .bind(project_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::session_from_row).collect()
    }

    pub async fn get_session(&self, user_id: &str, session_id: Uuid) -> Result<Session> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?1")
            .bind(session_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        let row = row.ok_or_else(|| StoreError::NotFound(format!("session {}", session_id)))?;
        let session = Self::session_from_row(&row)?;
        if session.user_id != user_id {
            return Err(StoreError::Forbidden(format!("session {}", session_id)).into());
        }
        Ok(session)
    }

    // ---- row mapping ----

    fn project_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Project> {
        let id: String = row.get("id");
        let created_at: String = row.get("created_at");
        let updated_at: String = row.get("updated_at");

        Ok(Project {
            id: Uuid::parse_str(&id).map_err(|e| StoreError::StorageFailed(e.to_string()))?,
            user_id: row.get("user_id"),
            name: row.get("name"),
            description: row.get("description"),
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
        })
    }

    fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
        let id: String = row.get("id");
        let project_id: String = row.get("project_id");
        let status: String = row.get("status");
        let structural: String = row.get("structural_metadata");
        let size_bytes: i64 = row.get("size_bytes");
        let chunk_count: i64 = row.get("chunk_count");
        let created_at: String = row.get("created_at");

        Ok(Document {
            id: Uuid::parse_str(&id).map_err(|e| StoreError::StorageFailed(e.to_string()))?,
            project_id: Uuid::parse_str(&project_id)
                .map_err(|e| StoreError::StorageFailed(e.to_string()))?,
            filename: row.get("filename"),
            mime_type: row.get("mime_type"),
            size_bytes: size_bytes as u64,
            content_address: row.get("content_address"),
            status: DocumentStatus::parse(&status)?,
            chunk_count: chunk_count as usize,
            structural_metadata: serde_json::from_str(&structural)
                .unwrap_or_else(|_| serde_json::json!({})),
            error_message: row.get("error_message"),
            created_at: parse_timestamp(&created_at)?,
        })
    }

    fn chunk_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<StoredChunk> {
        let id: String = row.get("id");
        let document_id: String = row.get("document_id");
        let project_id: String = row.get("project_id");
        let position: i64 = row.get("position");
        let token_count: i64 = row.get("token_count");
        let metadata: String = row.get("metadata");

        Ok(StoredChunk {
            id: Uuid::parse_str(&id).map_err(|e| StoreError::StorageFailed(e.to_string()))?,
            document_id: Uuid::parse_str(&document_id)
                .map_err(|e| StoreError::StorageFailed(e.to_string()))?,
            project_id: Uuid::parse_str(&project_id)
                .map_err(|e| StoreError::StorageFailed(e.to_string()))?,
            content: row.get("content"),
            position: position as usize,
            token_count: token_count as usize,
            metadata: serde_json::from_str(&metadata).unwrap_or_else(|_| serde_json::json!({})),
        })
    }

    fn session_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Session> {
        let id: String = row.get("id");
        let project_id: String = row.get("project_id");
        let platform: String = row.get("target_platform");
        let token_count: i64 = row.get("token_count");
        let quality_score: f64 = row.get("quality_score");
        let metadata: String = row.get("metadata");
        let created_at: String = row.get("created_at");

        Ok(Session {
            id: Uuid::parse_str(&id).map_err(|e| StoreError::StorageFailed(e.to_string()))?,
            user_id: row.get("user_id"),
            project_id: Uuid::parse_str(&project_id)
                .map_err(|e| StoreError::StorageFailed(e.to_string()))?,
            task_input: row.get("task_input"),
            assembled_context: row.get("assembled_context"),
            target_platform: SessionPlatform::parse(&platform)?,
            token_count: token_count as usize,
            quality_score: quality_score as f32,
            metadata: serde_json::from_str(&metadata).unwrap_or_else(|_| serde_json::json!({})),
            created_at: parse_timestamp(&created_at)?,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::StorageFailed(e.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> MetadataStore {
        MetadataStore::in_memory().await.unwrap()
    }

    fn chunk_for(document: &Document, position: usize, content: &str) -> StoredChunk {
        StoredChunk {
            id: Uuid::new_v4(),
            document_id: document.id,
            project_id: document.project_id,
            content: content.to_string(),
            position,
            token_count: 10,
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_project_lifecycle() {
        let store = store().await;

        let project = store
            .create_project("alice", "docs", Some("api docs"))
            .await
            .unwrap();
        assert_eq!(project.user_id, "alice");

        let listed = store.list_projects("alice").await.unwrap();
        assert_eq!(listed.len(), 1);

        let updated = store
            .update_project("alice", project.id, Some("renamed"), None)
            .await
            .unwrap();
        assert_eq!(updated.name, "renamed");

        store.delete_project("alice", project.id).await.unwrap();
        assert!(store.list_projects("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ownership_enforced() {
        let store = store().await;
        let project = store.create_project("alice", "docs", None).await.unwrap();

        let err = store
            .authorize_project("mallory", project.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");

        let err = store
            .authorize_project("alice", Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_document_lifecycle_and_chunk_count_invariant() {
        let store = store().await;
        let project = store.create_project("alice", "docs", None).await.unwrap();

        let doc = store
            .create_document("alice", project.id, "guide.md", "text/markdown", 42, "sha:abc")
            .await
            .unwrap();
        assert_eq!(doc.status, DocumentStatus::Processing);

        let chunks = vec![chunk_for(&doc, 0, "first"), chunk_for(&doc, 1, "second")];
        store.insert_chunks(&chunks).await.unwrap();
        store
            .mark_document_ready(doc.id, chunks.len(), serde_json::json!({"hasHeadings": true}))
            .await
            .unwrap();

        let fetched = store
            .document_by_project_and_id("alice", project.id, doc.id)
            .await
            .unwrap();
        assert_eq!(fetched.status, DocumentStatus::Ready);
        assert_eq!(
            fetched.chunk_count,
            store.chunk_ids_for_document(doc.id).await.unwrap().len()
        );
    }

    #[tokio::test]
    async fn test_document_error_state() {
        let store = store().await;
        let project = store.create_project("alice", "docs", None).await.unwrap();
        let doc = store
            .create_document("alice", project.id, "broken.pdf", "application/pdf", 1, "sha:x")
            .await
            .unwrap();

        store
            .mark_document_error(doc.id, "extraction failed")
            .await
            .unwrap();
        let fetched = store
            .document_by_project_and_id("alice", project.id, doc.id)
            .await
            .unwrap();
        assert_eq!(fetched.status, DocumentStatus::Error);
        assert_eq!(fetched.error_message.as_deref(), Some("extraction failed"));
    }

    #[tokio::test]
    async fn test_delete_project_cascades() {
        let store = store().await;
        let project = store.create_project("alice", "docs", None).await.unwrap();
        let doc = store
            .create_document("alice", project.id, "a.txt", "text/plain", 5, "sha:a")
            .await
            .unwrap();
        let chunks = vec![chunk_for(&doc, 0, "content")];
        let chunk_id = chunks[0].id;
        store.insert_chunks(&chunks).await.unwrap();

        store.delete_project("alice", project.id).await.unwrap();

        assert!(store.chunks_by_ids(&[chunk_id]).await.unwrap().is_empty());
        assert!(store
            .document_by_project_and_id("alice", project.id, doc.id)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_sessions_append_only_and_scoped() {
        let store = store().await;
        let project = store.create_project("alice", "docs", None).await.unwrap();

        let session = Session {
            id: Uuid::new_v4(),
            user_id: "alice".to_string(),
            project_id: project.id,
            task_input: "how do I add a route?".to_string(),
            assembled_context: "<project_docs/>".to_string(),
            target_platform: SessionPlatform::Claude,
            token_count: 128,
            quality_score: 0.72,
            metadata: serde_json::json!({"chunksRetrieved": 4, "chunksIncluded": 3}),
            created_at: Utc::now(),
        };
        store.create_session(&session).await.unwrap();

        let sessions = store
            .list_sessions_by_project("alice", project.id, 10)
            .await
            .unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].target_platform, SessionPlatform::Claude);

        let fetched = store.get_session("alice", session.id).await.unwrap();
        assert!((fetched.quality_score - 0.72).abs() < 1e-6);

        let err = store.get_session("mallory", session.id).await.unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }
}
