// src/metrics/mod.rs
// Prometheus metrics for the gateway.

use axum::{http::StatusCode, response::IntoResponse};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::info;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static ACTIVE_CONNECTIONS: AtomicU64 = AtomicU64::new(0);

pub fn init_metrics() {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install prometheus recorder");

    PROMETHEUS_HANDLE
        .set(handle)
        .expect("prometheus handle already initialized");

    info!("prometheus metrics initialized");
}

/// GET /metrics
pub async fn metrics_handler() -> impl IntoResponse {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics not initialized".to_string(),
        ),
    }
}

pub fn record_enqueue(priority: i64) {
    counter!("gateway_queue_enqueued_total", "priority" => priority.to_string()).increment(1);
}

pub fn record_queue_full() {
    counter!("gateway_queue_full_total").increment(1);
}

pub fn set_queue_depth(depth: usize) {
    gauge!("gateway_queue_depth").set(depth as f64);
}

pub fn record_generation(success: bool, duration_seconds: f64, tokens_out: u64) {
    let status = if success { "success" } else { "error" };
    counter!("gateway_generations_total", "status" => status).increment(1);
    histogram!("gateway_generation_duration_seconds").record(duration_seconds);
    counter!("gateway_tokens_total", "type" => "output").increment(tokens_out);
}

pub fn record_search(outcome: &'static str) {
    counter!("gateway_search_calls_total", "outcome" => outcome).increment(1);
}

pub fn connection_opened() {
    let count = ACTIVE_CONNECTIONS.fetch_add(1, Ordering::SeqCst) + 1;
    gauge!("gateway_active_connections").set(count as f64);
}

pub fn connection_closed() {
    let count = ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::SeqCst) - 1;
    gauge!("gateway_active_connections").set(count as f64);
}

pub fn record_session_summarized() {
    counter!("gateway_sessions_summarized_total").increment(1);
}

/// Times a block of work via its `Drop` impl.
pub struct RequestTimer {
    start: Instant,
    label: String,
}

impl RequestTimer {
    pub fn new(label: &str) -> Self {
        Self {
            start: Instant::now(),
            label: label.to_string(),
        }
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        histogram!("gateway_request_duration_seconds", "label" => self.label.clone())
            .record(self.start.elapsed().as_secs_f64());
    }
}
