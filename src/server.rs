//! MCP-compatible HTTP server.
//!
//! Exposes retrieval and indexing over a JSON HTTP API suitable for
//! integration with MCP-compatible AI tools.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/tools/list` | List the tools with parameter schemas |
//! | `POST` | `/tools/rag_search` | Hybrid search across the store |
//! | `POST` | `/tools/rag_list_collections` | Collections with counts |
//! | `POST` | `/tools/rag_collection_info` | Detail for one collection |
//! | `POST` | `/tools/rag_index` | Scan and index paths into a collection |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `embedding_unavailable` (503), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients and cross-origin MCP tool calls.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::chunker::ChunkParams;
use crate::config::Config;
use crate::embedding::{Embedder, HttpEmbedder};
use crate::error::Error;
use crate::indexer::Indexer;
use crate::models::{CollectionKind, SearchFilters};
use crate::scan;
use crate::search::{self, SearchRequest};
use crate::store::Store;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    store: Arc<Store>,
    embedder: Arc<dyn Embedder>,
}

/// Starts the HTTP server on `[server].bind` and serves until the process
/// is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store = Store::open(config).await?;
    let embedder = HttpEmbedder::new(&config.embedding)?;

    let state = AppState {
        config: Arc::new(config.clone()),
        store: Arc::new(store),
        embedder: Arc::new(embedder),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/rag_search", post(handle_search))
        .route("/tools/rag_list_collections", post(handle_list_collections))
        .route("/tools/rag_collection_info", post(handle_collection_info))
        .route("/tools/rag_index", post(handle_index))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    let bind_addr = &config.server.bind;
    tracing::info!(%bind_addr, "server listening");

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
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

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        match e {
            Error::EmbeddingUnavailable(_) => AppError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                code: "embedding_unavailable".to_string(),
                message: e.to_string(),
            },
            Error::DimensionMismatch { .. } | Error::ChunkParams(_) => bad_request(e.to_string()),
            _ => internal(e.to_string()),
        }
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

// ============ GET /tools/list ============

async fn handle_list_tools() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "tools": [
            {
                "name": "rag_search",
                "description": "Hybrid semantic + keyword search across indexed collections",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "query": { "type": "string" },
                        "top_k": { "type": "integer" },
                        "collection": { "type": "string" },
                        "source_type": { "type": "string" },
                        "date_from": { "type": "string" },
                        "date_to": { "type": "string" },
                        "sender": { "type": "string" },
                        "author": { "type": "string" }
                    },
                    "required": ["query"]
                }
            },
            {
                "name": "rag_list_collections",
                "description": "List collections with source and chunk counts",
                "parameters": { "type": "object", "properties": {} }
            },
            {
                "name": "rag_collection_info",
                "description": "Detailed statistics for one collection",
                "parameters": {
                    "type": "object",
                    "properties": { "collection": { "type": "string" } },
                    "required": ["collection"]
                }
            },
            {
                "name": "rag_index",
                "description": "Scan files or directories and index them into a collection",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "collection": { "type": "string" },
                        "paths": { "type": "array", "items": { "type": "string" } },
                        "force": { "type": "boolean" }
                    },
                    "required": ["collection", "paths"]
                }
            }
        ]
    }))
}

// ============ POST /tools/rag_search ============

#[derive(Deserialize)]
struct SearchParams {
    query: String,
    top_k: Option<usize>,
    collection: Option<String>,
    source_type: Option<String>,
    date_from: Option<String>,
    date_to: Option<String>,
    sender: Option<String>,
    author: Option<String>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(params): Json<SearchParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    if params.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let request = SearchRequest {
        query: params.query,
        top_k: params.top_k.unwrap_or(state.config.search.top_k),
        filters: SearchFilters {
            collection: params.collection,
            source_type: params.source_type,
            date_from: params.date_from,
            date_to: params.date_to,
            sender: params.sender,
            author: params.author,
        },
    };

    let response = search::search(
        &state.store,
        state.embedder.as_ref(),
        &state.config.search,
        &request,
    )
    .await?;

    Ok(Json(serde_json::json!({ "result": response })))
}

// ============ POST /tools/rag_list_collections ============

async fn handle_list_collections(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let collections = state.store.list_collections().await?;

    let entries: Vec<serde_json::Value> = collections
        .iter()
        .map(|c| {
            serde_json::json!({
                "name": c.collection.name,
                "kind": c.collection.kind.as_str(),
                "description": c.collection.description,
                "sources": c.source_count,
                "chunks": c.chunk_count,
                "last_indexed_at": c.last_indexed_at,
            })
        })
        .collect();

    Ok(Json(serde_json::json!({ "result": { "collections": entries } })))
}

// ============ POST /tools/rag_collection_info ============

#[derive(Deserialize)]
struct CollectionInfoParams {
    collection: String,
}

async fn handle_collection_info(
    State(state): State<AppState>,
    Json(params): Json<CollectionInfoParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let info = state
        .store
        .collection_info(&params.collection)
        .await?
        .ok_or_else(|| not_found(format!("no collection named: {}", params.collection)))?;

    let source_types: serde_json::Map<String, serde_json::Value> = info
        .source_types
        .iter()
        .map(|(t, n)| (t.clone(), serde_json::json!(n)))
        .collect();

    Ok(Json(serde_json::json!({
        "result": {
            "name": info.collection.name,
            "kind": info.collection.kind.as_str(),
            "description": info.collection.description,
            "sources": info.source_count,
            "chunks": info.chunk_count,
            "embeddings": info.embedding_count,
            "last_indexed_at": info.last_indexed_at,
            "source_types": source_types,
        }
    })))
}

// ============ POST /tools/rag_index ============

#[derive(Deserialize)]
struct IndexParams {
    collection: String,
    paths: Vec<String>,
    #[serde(default)]
    force: bool,
}

async fn handle_index(
    State(state): State<AppState>,
    Json(params): Json<IndexParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    if params.paths.is_empty() {
        return Err(bad_request("paths must not be empty"));
    }

    let paths: Vec<PathBuf> = params.paths.iter().map(PathBuf::from).collect();
    let outcome = scan::scan_paths(&paths, &state.config.scan)
        .await
        .map_err(|e| bad_request(e.to_string()))?;

    let collection_id = state
        .store
        .get_or_create_collection(&params.collection, CollectionKind::Project, None)
        .await?;

    let chunk_params = ChunkParams::new(
        state.config.chunking.chunk_tokens,
        state.config.chunking.overlap_tokens,
    )?;
    let indexer = Indexer::new(
        &state.store,
        state.embedder.as_ref(),
        state.config.embedding.batch_size,
        chunk_params,
    );
    let mut summary = indexer
        .index_records(collection_id, &outcome.records, params.force)
        .await?;
    summary.failed += outcome.failures.len() as u64;

    Ok(Json(serde_json::json!({
        "result": {
            "collection": params.collection,
            "indexed": summary.indexed,
            "updated": summary.updated,
            "skipped": summary.skipped,
            "failed": summary.failed,
        }
    })))
}
