// src/admin/mod.rs
// Non-WebSocket control surface: health, adapter management, session
// inspection, vector search, and a synchronous chat endpoint for
// integrations that don't want a WebSocket.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::GatewayError;
use crate::state::AppState;
use crate::types::{GenerateRequest, SinkMessage};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/adapters/load", post(load_adapter))
        .route("/adapters/current", get(current_adapter))
        .route("/sessions", get(list_sessions))
        .route("/sessions/{id}", get(get_session).delete(delete_session))
        .route("/memory/search", get(search_memory))
        .route("/chat", post(chat_once))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    db: &'static str,
    current_adapter: String,
    queue_depth: usize,
}

/// GET /health - reports DB connectivity and the worker's loaded adapter.
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db_ok = sqlx::query("SELECT 1").fetch_one(&state.sqlite_pool).await.is_ok();
    let queue_stats = state.queue.stats().await;

    let response = HealthResponse {
        status: if db_ok { "healthy" } else { "unhealthy" },
        db: if db_ok { "ok" } else { "error" },
        current_adapter: state.worker.current_adapter(),
        queue_depth: queue_stats.depth,
    };

    if db_ok {
        (StatusCode::OK, Json(response)).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response)).into_response()
    }
}

#[derive(Deserialize)]
struct LoadAdapterRequest {
    adapter_name: String,
}

async fn load_adapter(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoadAdapterRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    state.worker.load_adapter(&body.adapter_name).await?;
    Ok(Json(serde_json::json!({ "current_adapter": state.worker.current_adapter() })))
}

async fn current_adapter(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({ "current_adapter": state.worker.current_adapter() }))
}

#[derive(Serialize)]
struct SessionSummaryView {
    id: String,
    title: String,
    is_active: bool,
    is_summarized: bool,
    summary: Option<String>,
    last_active_at: i64,
}

async fn list_sessions(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, GatewayError> {
    let sessions = state
        .session_manager
        .store()
        .list_summaries()
        .await
        .map_err(GatewayError::Other)?;

    let view: Vec<SessionSummaryView> = sessions
        .into_iter()
        .map(|s| SessionSummaryView {
            id: s.id,
            title: s.title,
            is_active: s.is_active,
            is_summarized: s.is_summarized,
            summary: s.summary,
            last_active_at: s.last_active_at,
        })
        .collect();

    Ok(Json(view))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let session = state
        .session_manager
        .store()
        .get_session(&id)
        .await
        .map_err(GatewayError::Other)?
        .ok_or_else(|| GatewayError::SessionNotFound(id.clone()))?;

    Ok(Json(session))
}

async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let deleted = state
        .session_manager
        .store()
        .delete_session(&id)
        .await
        .map_err(GatewayError::Other)?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(GatewayError::SessionNotFound(id))
    }
}

#[derive(Deserialize)]
struct MemorySearchQuery {
    query: String,
    #[serde(default = "default_search_n_results")]
    n_results: usize,
    #[serde(default)]
    threshold: Option<f32>,
    #[serde(default)]
    source: Option<String>,
}

fn default_search_n_results() -> usize {
    5
}

async fn search_memory(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MemorySearchQuery>,
) -> Result<impl IntoResponse, GatewayError> {
    let matches = state
        .memory
        .recall_with_metadata(&params.query, params.n_results, params.threshold, params.source.as_deref())
        .await
        .map_err(GatewayError::Other)?;
    Ok(Json(matches))
}

#[derive(Deserialize)]
struct ChatOnceRequest {
    prompt: String,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
    #[serde(default = "default_temperature")]
    temperature: f32,
    #[serde(default)]
    priority: Option<i64>,
}

fn default_max_tokens() -> u32 {
    512
}

fn default_temperature() -> f32 {
    0.7
}

#[derive(Serialize)]
struct ChatOnceResponse {
    text: String,
}

/// POST /chat - blocks until the full answer is ready. No tool-use
/// enrichment; that loop is reserved for the WebSocket orchestrator.
async fn chat_once(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatOnceRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let request = GenerateRequest {
        request_id: format!("http-{}", uuid::Uuid::new_v4()),
        prompt: body.prompt,
        system_prompt: body.system_prompt,
        max_tokens: body.max_tokens,
        temperature: body.temperature,
        priority: body.priority,
        session_id: None,
        include_history: false,
    };

    let (tx, mut rx) = mpsc::channel(64);
    state.worker.enqueue(request, tx).await?;

    let mut text = String::new();
    while let Some(msg) = rx.recv().await {
        match msg {
            SinkMessage::Chunk(chunk) => text.push_str(&chunk),
            SinkMessage::Error(e) => return Err(GatewayError::GenerationFailure(e)),
            SinkMessage::EndOfStream => break,
        }
    }

    Ok(Json(ChatOnceResponse { text }))
}
