// src/error.rs
// Crate-wide error type for everything that crosses a module boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("queue is full")]
    QueueFull,

    #[error("adapter not found: {0}")]
    AdapterNotFound(String),

    #[error("generation failed: {0}")]
    GenerationFailure(String),

    #[error("invalid session id: {0}")]
    InvalidSessionId(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("vector store error: {0}")]
    VectorStore(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::AdapterNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::InvalidSessionId(_) => StatusCode::BAD_REQUEST,
            GatewayError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
