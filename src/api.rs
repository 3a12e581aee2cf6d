//! REST API for the tailoring engine
//!
//! Provides HTTP endpoints for:
//! - Project and document management
//! - Document search
//! - Tailor and preview requests
//! - Session history

use crate::error::TailorError;
use crate::ingest::DocumentIngestor;
use crate::pipeline::{ContextPipeline, TailorRequest};
use crate::scorer::RelevanceScorer;
use crate::store::MetadataStore;
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Multipart, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

/// Resolves bearer tokens to user ids; provided by the deployment
#[async_trait]
pub trait AuthResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Option<String>;
}

/// Static token map resolver for development and tests
pub struct StaticTokenResolver {
    tokens: HashMap<String, String>,
}

impl StaticTokenResolver {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl AuthResolver for StaticTokenResolver {
    async fn resolve(&self, token: &str) -> Option<String> {
        self.tokens.get(token).cloned()
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ContextPipeline>,
    pub store: Arc<MetadataStore>,
    pub ingestor: Arc<DocumentIngestor>,
    pub scorer: Arc<RelevanceScorer>,
    pub auth: Arc<dyn AuthResolver>,
}

impl AppState {
    /// Wire every pipeline component from configuration
    pub async fn from_config(config: &crate::config::TailorConfig) -> crate::error::Result<Self> {
        use crate::analyzer::TaskAnalyzer;
        use crate::chunker::{Chunker, ChunkerConfig};
        use crate::compressor::ContextCompressor;
        use crate::config::RerankProvider;
        use crate::embedding::OllamaEmbedder;
        use crate::gaps::{GapDetector, GapDetectorConfig};
        use crate::index::SqliteVectorIndex;
        use crate::llm::{LlmClient, OllamaClient};
        use crate::scorer::{ApiReranker, CrossEncoder, LlmJudgeReranker};
        use crate::tokens::TokenCounter;
        use crate::websearch::WebSearcher;

        let counter = Arc::new(TokenCounter::new());
        let store = Arc::new(MetadataStore::connect(&config.store).await?);
        let index = Arc::new(SqliteVectorIndex::connect(&config.index).await?);
        let embedder = Arc::new(OllamaEmbedder::new(config.embedding.clone())?);
        let llm: Arc<dyn LlmClient> = Arc::new(OllamaClient::new(config.llm.clone())?);

        let cross_encoder: Option<Arc<dyn CrossEncoder>> = match config.rerank.provider {
            RerankProvider::Dedicated => Some(Arc::new(ApiReranker::new(&config.rerank)?)),
            RerankProvider::Llm => Some(Arc::new(LlmJudgeReranker::new(llm.clone()))),
            RerankProvider::Off => None,
        };

        let scorer = Arc::new(RelevanceScorer::new(
            embedder.clone(),
            index.clone(),
            store.clone(),
            cross_encoder,
            config.pipeline.clone(),
            config.index.query_top_k,
            config.rerank.top_n,
        ));

        let chunker = Arc::new(Chunker::new(ChunkerConfig::default(), counter.clone()));
        let ingestor = Arc::new(DocumentIngestor::new(
            store.clone(),
            index,
            embedder,
            chunker,
            config.embedding.batch_size,
        ));

        let searcher = Arc::new(WebSearcher::from_config(&config.search)?);
        let compressor = Arc::new(ContextCompressor::new(Some(llm.clone()), counter.clone()));
        let analyzer = Arc::new(TaskAnalyzer::new(Some(llm)));
        let gap_detector = GapDetector::new(GapDetectorConfig {
            shallow_score_threshold: config.pipeline.shallow_score_threshold,
            shallow_chunk_minimum: config.pipeline.shallow_chunk_minimum,
        });

        let pipeline = Arc::new(ContextPipeline::new(
            store.clone(),
            analyzer,
            scorer.clone(),
            gap_detector,
            Some(searcher),
            compressor,
            counter,
            config.pipeline.clone(),
            config.search.clone(),
        ));

        let auth = Arc::new(StaticTokenResolver::new(config.server.auth_tokens.clone()));

        Ok(Self {
            pipeline,
            store,
            ingestor,
            scorer,
            auth,
        })
    }
}

/// Authenticated caller extracted from the Authorization header
pub struct AuthedUser(pub String);

impl FromRequestParts<AppState> for AuthedUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(ApiError::unauthorized)?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(ApiError::unauthorized)?;

        let user_id = state
            .auth
            .resolve(token)
            .await
            .ok_or_else(ApiError::unauthorized)?;

        Ok(AuthedUser(user_id))
    }
}

/// API error carrying a stable short code
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "UNAUTHORIZED",
            message: "missing or invalid bearer token".to_string(),
        }
    }

    fn validation(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "VALIDATION_FAILED",
            message: message.into(),
        }
    }
}

impl From<TailorError> for ApiError {
    fn from(err: TailorError) -> Self {
        let code = err.code();
        let status = match code {
            "FORBIDDEN" => StatusCode::FORBIDDEN,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_FAILED" | "CHUNK_LIMIT_EXCEEDED" => StatusCode::BAD_REQUEST,
            "RATE_LIMITED" | "QUOTA_EXCEEDED" => StatusCode::TOO_MANY_REQUESTS,
            "UPSTREAM_UNAVAILABLE" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // Messages stay human-readable without internal detail
        Self {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "error": { "code": self.code, "message": self.message }
        }));
        (self.status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn ok<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "data": data }))
}

/// Request to create or rename a project
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct ProjectBody {
    /// Project display name
    #[schema(example = "api-docs")]
    pub name: String,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
}

/// Request to search project documents
#[derive(Debug, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchDocsBody {
    #[schema(example = "router validation")]
    pub query: String,
    pub project_id: Uuid,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub min_score: Option<f32>,
}

fn default_top_k() -> usize {
    10
}

/// One document-search hit
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub content: String,
    pub score: f32,
}

/// Query string for session listing
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsQuery {
    pub project_id: Uuid,
    #[serde(default = "default_session_limit")]
    pub limit: usize,
}

fn default_session_limit() -> usize {
    20
}

/// Health check response
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
    #[schema(example = "0.3.0")]
    pub version: String,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        create_project_handler,
        list_projects_handler,
        search_docs_handler,
        tailor_handler,
        preview_handler,
    ),
    components(schemas(ProjectBody, SearchDocsBody, SearchHit, HealthResponse)),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "projects", description = "Project and document management"),
        (name = "tailor", description = "Context tailoring")
    ),
    info(
        title = "Context Tailor API",
        version = "0.3.0",
        description = "REST API for the context tailoring engine"
    )
)]
struct ApiDoc;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        // Projects
        .route(
            "/api/projects",
            post(create_project_handler).get(list_projects_handler),
        )
        .route(
            "/api/projects/{id}",
            get(get_project_handler)
                .put(update_project_handler)
                .delete(delete_project_handler),
        )
        // Documents
        .route(
            "/api/projects/{id}/documents",
            post(upload_document_handler).get(list_documents_handler),
        )
        .route(
            "/api/projects/{id}/documents/{doc_id}",
            axum::routing::delete(delete_document_handler),
        )
        // Search
        .route("/api/search/docs", post(search_docs_handler))
        // Tailoring
        .route("/api/tailor", post(tailor_handler))
        .route("/api/tailor/preview", post(preview_handler))
        .route("/api/tailor/sessions", get(list_sessions_handler))
        .route("/api/tailor/sessions/{id}", get(get_session_handler))
        // OpenAPI spec endpoint
        .route("/api-docs/openapi.json", get(openapi_spec_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn openapi_spec_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses((status = 200, description = "Service is healthy", body = HealthResponse))
)]
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
    })
}

/// Create a project
#[utoipa::path(
    post,
    path = "/api/projects",
    tag = "projects",
    request_body = ProjectBody,
    responses(
        (status = 200, description = "Project created"),
        (status = 401, description = "Missing or invalid token")
    )
)]
async fn create_project_handler(
    State(state): State<AppState>,
    AuthedUser(user_id): AuthedUser,
    Json(body): Json<ProjectBody>,
) -> ApiResult<Json<serde_json::Value>> {
    if body.name.trim().is_empty() {
        return Err(ApiError::validation("project name cannot be empty"));
    }
    let project = state
        .store
        .create_project(&user_id, &body.name, body.description.as_deref())
        .await?;
    Ok(ok(project))
}

/// List the caller's projects
#[utoipa::path(
    get,
    path = "/api/projects",
    tag = "projects",
    responses((status = 200, description = "Projects listed"))
)]
async fn list_projects_handler(
    State(state): State<AppState>,
    AuthedUser(user_id): AuthedUser,
) -> ApiResult<Json<serde_json::Value>> {
    let projects = state.store.list_projects(&user_id).await?;
    Ok(ok(projects))
}

async fn get_project_handler(
    State(state): State<AppState>,
    AuthedUser(user_id): AuthedUser,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let project = state.store.authorize_project(&user_id, project_id).await?;
    Ok(ok(project))
}

async fn update_project_handler(
    State(state): State<AppState>,
    AuthedUser(user_id): AuthedUser,
    Path(project_id): Path<Uuid>,
    Json(body): Json<ProjectBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let project = state
        .store
        .update_project(
            &user_id,
            project_id,
            Some(&body.name),
            body.description.as_deref(),
        )
        .await?;
    Ok(ok(project))
}

async fn delete_project_handler(
    State(state): State<AppState>,
    AuthedUser(user_id): AuthedUser,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.ingestor.delete_project(&user_id, project_id).await?;
    Ok(ok(serde_json::json!({ "deleted": project_id })))
}

/// Upload a document; processing continues in the background
async fn upload_document_handler(
    State(state): State<AppState>,
    AuthedUser(user_id): AuthedUser,
    Path(project_id): Path<Uuid>,
    mut multipart: Multipart,
) -> ApiResult<Json<serde_json::Value>> {
    let mut upload: Option<(String, String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation(e.to_string()))?
    {
        if field.name() == Some("file") {
            let filename = field
                .file_name()
                .unwrap_or("upload")
                .to_string();
            let mime_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::validation(e.to_string()))?
                .to_vec();
            upload = Some((filename, mime_type, bytes));
        }
    }

    let (filename, mime_type, bytes) =
        upload.ok_or_else(|| ApiError::validation("multipart field 'file' is required"))?;
    if bytes.is_empty() {
        return Err(ApiError::validation("uploaded file is empty"));
    }

    let document = state
        .store
        .create_document(
            &user_id,
            project_id,
            &filename,
            &mime_type,
            bytes.len() as u64,
            &DocumentIngestor::content_address(&bytes),
        )
        .await?;

    // Ingestion runs detached; the document row tracks its outcome
    let ingestor = state.ingestor.clone();
    let background_doc = document.clone();
    tokio::spawn(async move {
        if let Err(e) = ingestor.run(&background_doc, &bytes).await {
            error!(document = %background_doc.id, error = %e, "background ingestion failed");
        }
    });

    info!(document = %document.id, "document upload accepted");
    Ok(ok(document))
}

async fn list_documents_handler(
    State(state): State<AppState>,
    AuthedUser(user_id): AuthedUser,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let documents = state.store.list_documents(&user_id, project_id).await?;
    Ok(ok(documents))
}

async fn delete_document_handler(
    State(state): State<AppState>,
    AuthedUser(user_id): AuthedUser,
    Path((project_id, doc_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .ingestor
        .delete_document(&user_id, project_id, doc_id)
        .await?;
    Ok(ok(serde_json::json!({ "deleted": doc_id })))
}

/// Search project documents
#[utoipa::path(
    post,
    path = "/api/search/docs",
    tag = "projects",
    request_body = SearchDocsBody,
    responses((status = 200, description = "Search results"))
)]
async fn search_docs_handler(
    State(state): State<AppState>,
    AuthedUser(user_id): AuthedUser,
    Json(body): Json<SearchDocsBody>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .store
        .authorize_project(&user_id, body.project_id)
        .await?;

    let outcome = state
        .scorer
        .score_chunks(body.project_id, &body.query, &[])
        .await?;

    let min_score = body.min_score.unwrap_or(0.0);
    let results: Vec<SearchHit> = outcome
        .chunks
        .into_iter()
        .filter(|c| c.final_score >= min_score)
        .take(body.top_k)
        .map(|c| SearchHit {
            chunk_id: c.chunk_id,
            document_id: c.document_id,
            content: c.content,
            score: c.final_score,
        })
        .collect();

    Ok(ok(serde_json::json!({ "results": results })))
}

/// Run the full tailoring pipeline
#[utoipa::path(
    post,
    path = "/api/tailor",
    tag = "tailor",
    responses(
        (status = 200, description = "Tailored context assembled"),
        (status = 403, description = "Project owned by another user"),
        (status = 404, description = "Project not found")
    )
)]
async fn tailor_handler(
    State(state): State<AppState>,
    AuthedUser(user_id): AuthedUser,
    Json(request): Json<TailorRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if request.task_input.trim().is_empty() {
        return Err(ApiError::validation("taskInput cannot be empty"));
    }
    let response = state.pipeline.tailor(&user_id, request).await?;
    Ok(ok(response))
}

/// Run the preview fast path
#[utoipa::path(
    post,
    path = "/api/tailor/preview",
    tag = "tailor",
    responses((status = 200, description = "Preview estimate"))
)]
async fn preview_handler(
    State(state): State<AppState>,
    AuthedUser(user_id): AuthedUser,
    Json(request): Json<TailorRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if request.task_input.trim().is_empty() {
        return Err(ApiError::validation("taskInput cannot be empty"));
    }
    let response = state.pipeline.preview(&user_id, request).await?;
    Ok(ok(response))
}

async fn list_sessions_handler(
    State(state): State<AppState>,
    AuthedUser(user_id): AuthedUser,
    Query(query): Query<SessionsQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let sessions = state
        .store
        .list_sessions_by_project(&user_id, query.project_id, query.limit)
        .await?;
    Ok(ok(sessions))
}

async fn get_session_handler(
    State(state): State<AppState>,
    AuthedUser(user_id): AuthedUser,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let session = state.store.get_session(&user_id, session_id).await?;
    Ok(ok(session))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    #[test]
    fn test_api_error_mapping() {
        let err = ApiError::from(TailorError::Store(StoreError::Forbidden("p".into())));
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert_eq!(err.code, "FORBIDDEN");

        let err = ApiError::from(TailorError::Store(StoreError::NotFound("p".into())));
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err = ApiError::from(TailorError::Embedding(
            crate::error::EmbeddingError::Unavailable,
        ));
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert_eq!(err.code, "UPSTREAM_UNAVAILABLE");
    }

    #[test]
    fn test_error_envelope_shape() {
        let err = ApiError::validation("bad payload");
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_static_token_resolver() {
        let mut tokens = HashMap::new();
        tokens.insert("secret-token".to_string(), "alice".to_string());
        let resolver = StaticTokenResolver::new(tokens);

        assert_eq!(
            resolver.resolve("secret-token").await.as_deref(),
            Some("alice")
        );
        assert!(resolver.resolve("wrong").await.is_none());
    }

    #[test]
    fn test_search_body_defaults() {
        let body: SearchDocsBody = serde_json::from_str(
            r#"{"query": "q", "projectId": "00000000-0000-0000-0000-000000000001"}"#,
        )
        .unwrap();
        assert_eq!(body.top_k, 10);
        assert!(body.min_score.is_none());
    }
}
