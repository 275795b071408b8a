//! HTTP serving surface for UI clients.
//!
//! Exposes the query pipeline and index lifecycle over a small JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/query` | Answer a question with confidence and sources |
//! | `POST` | `/rebuild` | Re-scan the corpus and rebuild the index |
//! | `GET`  | `/status` | Index manifest and existence |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error contract
//!
//! All error responses use the envelope:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! A valid zero-source answer is a `200` with `confidence = 0.0`; pipeline
//! failures are `502` with a `*_failed` code. The two are never conflated.
//!
//! # Concurrency
//!
//! The query engine lives behind an `RwLock`: queries take the read side,
//! rebuild takes the write side, so a rebuild never races in-flight queries.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::index::{Indexer, IndexManifest};
use crate::loader;
use crate::model_set::ModelSet;
use crate::models::QueryResult;
use crate::query::{QueryEngine, QueryError};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    models: Arc<ModelSet>,
    engine: Arc<RwLock<QueryEngine>>,
}

/// Start the HTTP server.
///
/// Loads the persisted index (building it from the corpus when absent or
/// corrupt), then binds to `[server].bind` and serves until terminated.
pub async fn run_server(config: &Config, models: Arc<ModelSet>) -> anyhow::Result<()> {
    let indexer = Indexer::new(config, models.clone());

    // The corpus is optional at serve time when an index already exists.
    let documents = loader::load_documents(&config.corpus).ok();
    let index = indexer.get_or_create_index(documents.as_deref()).await?;
    let engine = QueryEngine::new(index, models.clone(), config.retrieval.clone());

    let state = AppState {
        config: Arc::new(config.clone()),
        models,
        engine: Arc::new(RwLock::new(engine)),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/query", post(handle_query))
        .route("/rebuild", post(handle_rebuild))
        .route("/status", get(handle_status))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    let bind_addr = &config.server.bind;
    println!("docsqa server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// JSON error envelope.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"generation_failed"`).
    code: String,
    /// Human-readable error message.
    message: String,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn rebuild_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "rebuild_failed".to_string(),
        message: message.into(),
    }
}

/// Map a pipeline failure to a 502 with a code naming the failed stage, so
/// UI clients can render "pipeline failed" distinctly from "no sources".
fn classify_query_error(err: QueryError) -> AppError {
    let code = match &err {
        QueryError::Embedding(_) => "embedding_failed",
        QueryError::Retrieval(_) => "retrieval_failed",
        QueryError::Generation(_) => "generation_failed",
    };
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: code.to_string(),
        message: format!("{:#}", err),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /status ============

#[derive(Serialize)]
struct StatusResponse {
    exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    manifest: Option<IndexManifest>,
}

async fn handle_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let indexer = Indexer::new(&state.config, state.models.clone());
    let manifest = indexer.read_manifest().ok();
    Json(StatusResponse {
        exists: indexer.index_exists(),
        manifest,
    })
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResult>, AppError> {
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    let engine = state.engine.read().await;
    let result = engine
        .query(&req.question)
        .await
        .map_err(classify_query_error)?;

    Ok(Json(result))
}

// ============ POST /rebuild ============

#[derive(Serialize)]
struct RebuildResponse {
    rebuilt: bool,
    documents: usize,
    chunks: usize,
}

async fn handle_rebuild(
    State(state): State<AppState>,
) -> Result<Json<RebuildResponse>, AppError> {
    let documents = loader::load_documents(&state.config.corpus)
        .map_err(|e| bad_request(format!("corpus scan failed: {:#}", e)))?;

    let indexer = Indexer::new(&state.config, state.models.clone());

    // Write lock: no queries run while the collection is being replaced.
    let mut guard = state.engine.write().await;
    let index = indexer
        .rebuild(&documents)
        .await
        .map_err(|e| rebuild_error(format!("{:#}", e)))?;

    let chunks = index.manifest().chunks;
    let new_engine = QueryEngine::new(index, state.models.clone(), state.config.retrieval.clone());
    let old = std::mem::replace(&mut *guard, new_engine);
    drop(guard);
    old.close().await;

    Ok(Json(RebuildResponse {
        rebuilt: true,
        documents: documents.len(),
        chunks,
    }))
}
