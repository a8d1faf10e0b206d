// src/worker/mod.rs
// The singleton inference worker: dequeues jobs, serializes them behind the
// GPU lock, and streams de-duplicated chunks to each job's sink.

pub mod dedup;

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use sqlx::SqlitePool;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::GatewayError;
use crate::hardware::HardwareMonitor;
use crate::model::{ChatModel, ModelEvent};
use crate::queue::PriorityQueue;
use crate::types::{GenerateRequest, InferenceLog, Job, SinkMessage};
use dedup::ResponseAccumulator;

const RESTART_BASE_DELAY: Duration = Duration::from_millis(200);
const RESTART_MAX_DELAY: Duration = Duration::from_secs(30);
const RESTART_BACKOFF_FACTOR: u32 = 2;
const HEALTHY_RUN_RESET: Duration = Duration::from_secs(60);

pub struct InferenceWorker {
    queue: Arc<PriorityQueue<Job>>,
    model: Arc<dyn ChatModel>,
    hardware: Arc<HardwareMonitor>,
    gpu_lock: AsyncMutex<()>,
    pool: SqlitePool,
}

impl InferenceWorker {
    pub fn new(
        queue: Arc<PriorityQueue<Job>>,
        model: Arc<dyn ChatModel>,
        hardware: Arc<HardwareMonitor>,
        pool: SqlitePool,
    ) -> Self {
        Self {
            queue,
            model,
            hardware,
            gpu_lock: AsyncMutex::new(()),
            pool,
        }
    }

    /// Run one request to completion outside the queue, for synchronous
    /// (probe, summarization) callers that already hold a `Job`-shaped
    /// request and sink and don't want to pay queueing latency twice.
    pub async fn run_direct(
        self: &Arc<Self>,
        request: GenerateRequest,
        sink: tokio::sync::mpsc::Sender<SinkMessage>,
    ) {
        self.process(request, sink).await;
    }

    /// Submit `request` through the bounded queue and run it once dequeued.
    /// This is the path ordinary chat traffic takes; `run_direct` bypasses
    /// the queue entirely and is reserved for probes/summaries that already
    /// carry a priority that earns them a short wait.
    pub async fn enqueue(
        self: &Arc<Self>,
        request: GenerateRequest,
        sink: tokio::sync::mpsc::Sender<SinkMessage>,
    ) -> Result<(), GatewayError> {
        let priority = request.priority;
        let request_id = request.request_id.clone();
        self.queue
            .enqueue(request_id, Job { request, sink }, priority)
            .await
    }

    /// Drive the queue forever: dequeue, run, repeat. Intended to be wrapped
    /// by `spawn_supervised` rather than spawned directly.
    async fn run_loop(self: Arc<Self>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("inference worker shutting down");
                    return;
                }
                (_request_id, job) = self.queue.dequeue() => {
                    self.process(job.request, job.sink).await;
                }
            }
        }
    }

    async fn process(
        self: &Arc<Self>,
        request: GenerateRequest,
        sink: tokio::sync::mpsc::Sender<SinkMessage>,
    ) {
        let formatted = self
            .model
            .format_prompt(request.system_prompt.as_deref(), &request.prompt);

        let _permit = self.gpu_lock.lock().await;
        let start = Instant::now();
        let mut acc = ResponseAccumulator::new();
        let mut tokens_out: u64 = 0;
        let mut peak_gpu_usage: f32 = 0.0;
        let mut peak_gpu_temp: f32 = 0.0;

        let mut stream = self
            .model
            .generate_stream(formatted, request.max_tokens, request.temperature)
            .await;

        let mut failed = false;

        while let Some(event) = stream.next().await {
            match event {
                ModelEvent::TextChunk(chunk) => {
                    tokens_out += 1;
                    let snap = self.hardware.get_snapshot().await;
                    peak_gpu_usage = peak_gpu_usage.max(snap.gpu_usage);
                    peak_gpu_temp = peak_gpu_temp.max(snap.gpu_temp);

                    let delta = acc.push(&chunk);
                    if !delta.is_empty() && sink.send(SinkMessage::Chunk(delta)).await.is_err() {
                        // client gone; keep draining the model stream to
                        // completion rather than aborting generation.
                        warn!(request_id = %request.request_id, "sink closed, dropping chunk");
                    }
                }
                ModelEvent::Done => break,
                ModelEvent::Error(message) => {
                    failed = true;
                    let _ = sink.send(SinkMessage::Error(message)).await;
                    break;
                }
            }
        }

        let _ = sink.send(SinkMessage::EndOfStream).await;

        let duration_seconds = start.elapsed().as_secs_f64();
        let tokens_per_sec = if duration_seconds > 0.0 {
            tokens_out as f64 / duration_seconds
        } else {
            0.0
        };

        crate::metrics::record_generation(!failed, duration_seconds, tokens_out);

        let end_snapshot = self.hardware.get_snapshot().await;
        let log = InferenceLog {
            request_id: request.request_id.clone(),
            session_id: request.session_id.clone(),
            adapter: self.model.current_adapter(),
            tokens_out,
            duration_seconds,
            tokens_per_sec,
            peak_gpu_usage,
            peak_gpu_temp,
            end_cpu_usage: end_snapshot.cpu_usage,
            end_ram_usage: end_snapshot.ram_usage,
        };
        if let Err(e) = persist_inference_log(&self.pool, &log).await {
            error!("failed to persist inference log: {e}");
        }
    }

    pub async fn load_adapter(self: &Arc<Self>, name: &str) -> Result<(), GatewayError> {
        let _permit = self.gpu_lock.lock().await;
        self.model
            .load_adapter(name)
            .await
            .map_err(|e| GatewayError::AdapterNotFound(e.to_string()))
    }

    pub fn current_adapter(&self) -> String {
        self.model.current_adapter()
    }

    /// Wrap `run_loop` in a crash-restart supervisor with exponential
    /// backoff. The queue lives outside the worker, so a restart never
    /// drops an already-enqueued job - only an abandoned in-flight one.
    pub fn spawn_supervised(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut delay = RESTART_BASE_DELAY;

            loop {
                let worker = self.clone();
                let shutdown_child = shutdown.clone();
                let started_at = Instant::now();

                let result = tokio::spawn(async move { worker.run_loop(shutdown_child).await }).await;

                if shutdown.is_cancelled() {
                    return;
                }

                match result {
                    Ok(()) => return,
                    Err(join_err) if join_err.is_panic() => {
                        error!("inference worker panicked, restarting in {delay:?}");
                        if started_at.elapsed() >= HEALTHY_RUN_RESET {
                            delay = RESTART_BASE_DELAY;
                        }
                        time::sleep(delay).await;
                        delay = (delay * RESTART_BACKOFF_FACTOR).min(RESTART_MAX_DELAY);
                    }
                    Err(join_err) => {
                        error!("inference worker task join error: {join_err}");
                        return;
                    }
                }
            }
        })
    }
}

async fn persist_inference_log(pool: &SqlitePool, log: &InferenceLog) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO inference_log
            (request_id, session_id, adapter, tokens_out, duration_seconds,
             tokens_per_sec, peak_gpu_usage, peak_gpu_temp, end_cpu_usage, end_ram_usage)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&log.request_id)
    .bind(&log.session_id)
    .bind(&log.adapter)
    .bind(log.tokens_out as i64)
    .bind(log.duration_seconds)
    .bind(log.tokens_per_sec)
    .bind(log.peak_gpu_usage)
    .bind(log.peak_gpu_temp)
    .bind(log.end_cpu_usage)
    .bind(log.end_ram_usage)
    .execute(pool)
    .await?;
    Ok(())
}

/// Logs queue depth/oldest-wait at a low frequency whenever the queue is
/// non-empty, so operators can see backlog building without per-job noise.
pub fn spawn_queue_monitor<T: Send + Sync + 'static>(
    queue: Arc<PriorityQueue<T>>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(5));
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = interval.tick() => {
                    let stats = queue.stats().await;
                    if stats.depth > 0 {
                        info!(
                            depth = stats.depth,
                            oldest_wait_seconds = stats.oldest_wait_seconds,
                            "queue backlog"
                        );
                    }
                }
            }
        }
    })
}
