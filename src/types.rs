// src/types.rs
// Domain types shared across the queue, worker, and orchestrator.

use serde::{Deserialize, Serialize};

/// One generation request submitted to the pipeline. Immutable once enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub request_id: String,
    pub prompt: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub include_history: bool,
}

fn default_max_tokens() -> u32 {
    512
}

fn default_temperature() -> f32 {
    0.7
}

/// What a completed stream's sink received, for logging and session writes.
#[derive(Debug, Clone)]
pub enum SinkMessage {
    Chunk(String),
    EndOfStream,
    Error(String),
}

/// One job handed to the worker: a request plus where its output goes.
pub struct Job {
    pub request: GenerateRequest,
    pub sink: tokio::sync::mpsc::Sender<SinkMessage>,
}

/// Record of one completed (or failed) generation, persisted for operators.
#[derive(Debug, Clone, Serialize)]
pub struct InferenceLog {
    pub request_id: String,
    pub session_id: Option<String>,
    pub adapter: String,
    pub tokens_out: u64,
    pub duration_seconds: f64,
    pub tokens_per_sec: f64,
    pub peak_gpu_usage: f32,
    pub peak_gpu_temp: f32,
    pub end_cpu_usage: f32,
    pub end_ram_usage: f32,
}
