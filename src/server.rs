//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Status, version, and indexed chunk count |
//! | `POST` | `/v1/chat` | Answer one turn (`session_id` null → history-free) |
//! | `POST` | `/v1/search` | Fused retrieval only, no generation |
//! | `GET`  | `/v1/sessions/{id}/history` | Current turns of a session |
//! | `POST` | `/v1/sessions/{id}/reset` | Clear a session's history |
//! | `POST` | `/v1/sessions/{id}/archive` | Move a session into the chat-log archive |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "config", "message": "query must not be empty" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `config` | 400 |
//! | `unknown_session` | 404 |
//! | `generation` | 502 |
//! | anything else | 500 |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser chat
//! front-ends can call the API directly.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use health_rag_core::models::{ChatTurn, Origin, RetrievalResult};
use health_rag_core::RagError;

use crate::context::AppContext;
use crate::orchestrator::TurnRequest;
use crate::sessions::archive_session;

#[derive(Clone)]
struct AppState {
    ctx: Arc<AppContext>,
}

/// Bind `[server].bind` and serve until the process ends.
pub async fn run_server(ctx: Arc<AppContext>) -> anyhow::Result<()> {
    let bind_addr = ctx.config.server.bind.clone();
    let listener = TcpListener::bind(&bind_addr).await?;
    println!("health-rag listening on http://{}", bind_addr);
    serve(listener, ctx).await
}

/// Serve on an already-bound listener.
pub async fn serve(listener: TcpListener, ctx: Arc<AppContext>) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, chunks = ctx.retriever().chunks().len(), "server started");
    axum::serve(listener, router(ctx)).await?;
    Ok(())
}

pub fn router(ctx: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/v1/chat", post(handle_chat))
        .route("/v1/search", post(handle_search))
        .route("/v1/sessions/{id}/history", get(handle_history))
        .route("/v1/sessions/{id}/reset", post(handle_reset))
        .route("/v1/sessions/{id}/archive", post(handle_archive))
        .layer(cors)
        .with_state(AppState { ctx })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError(RagError);

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RagError::Config(_) => StatusCode::BAD_REQUEST,
            RagError::UnknownSession(_) => StatusCode::NOT_FOUND,
            RagError::Generation(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.0.code().to_string(),
                message: self.0.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    chunks: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        chunks: state.ctx.retriever().chunks().len(),
    })
}

// ============ POST /v1/chat ============

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    session_id: Option<String>,
    query: String,
    #[serde(default)]
    include_context: bool,
}

#[derive(Serialize)]
struct ChatResponse {
    response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<Vec<ContextItem>>,
}

/// Citation-friendly view of one retrieval result.
#[derive(Serialize)]
struct ContextItem {
    chunk_id: String,
    score: f64,
    origin: Origin,
    title: String,
    source_url: String,
    text: String,
}

impl From<RetrievalResult> for ContextItem {
    fn from(r: RetrievalResult) -> Self {
        ContextItem {
            chunk_id: r.chunk_id,
            score: r.score,
            origin: r.origin,
            title: r.chunk.source_document_ref.title,
            source_url: r.chunk.source_document_ref.source_url,
            text: r.chunk.text,
        }
    }
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let turn = TurnRequest::new(req.session_id, req.query);
    let limit = state.ctx.config.generation.turn_timeout();
    let out = state.ctx.orchestrator.respond_within(&turn, limit).await?;
    Ok(Json(ChatResponse {
        response: out.response,
        context: req
            .include_context
            .then(|| out.context.into_iter().map(ContextItem::from).collect()),
    }))
}

// ============ POST /v1/search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<ContextItem>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(RagError::Config("query must not be empty".into()).into());
    }
    let top_k = req.top_k.unwrap_or(state.ctx.config.index.top_k);
    let results = state.ctx.retriever().search(&req.query, top_k).await?;
    Ok(Json(SearchResponse {
        results: results.into_iter().map(ContextItem::from).collect(),
    }))
}

// ============ /v1/sessions/{id} ============

#[derive(Serialize)]
struct HistoryResponse {
    session_id: String,
    turns: Vec<ChatTurn>,
}

fn require_session(state: &AppState, id: &str) -> Result<(), AppError> {
    if state.ctx.memory().contains(id) {
        Ok(())
    } else {
        Err(RagError::UnknownSession(id.to_string()).into())
    }
}

async fn handle_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HistoryResponse>, AppError> {
    require_session(&state, &id)?;
    Ok(Json(HistoryResponse {
        turns: state.ctx.memory().to_prompt_history(&id),
        session_id: id,
    }))
}

#[derive(Serialize)]
struct ResetResponse {
    reset: bool,
}

async fn handle_reset(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ResetResponse>, AppError> {
    require_session(&state, &id)?;
    state.ctx.memory().reset(&id);
    Ok(Json(ResetResponse { reset: true }))
}

#[derive(Deserialize)]
struct ArchiveRequest {
    user_id: String,
}

#[derive(Serialize)]
struct ArchiveResponse {
    /// `null` when the session had no turns.
    archived_session_id: Option<i64>,
}

async fn handle_archive(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ArchiveRequest>,
) -> Result<Json<ArchiveResponse>, AppError> {
    require_session(&state, &id)?;
    if req.user_id.trim().is_empty() {
        return Err(RagError::Config("user_id must not be empty".into()).into());
    }
    let archived = archive_session(state.ctx.store.as_ref(), state.ctx.memory(), &req.user_id, &id).await?;
    Ok(Json(ArchiveResponse {
        archived_session_id: archived,
    }))
}
