// tests/queue_worker_pipeline_test.rs
// End-to-end: enqueue a request, dequeue, stream through a fake model, drain the sink.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use vigil_gateway::config::QueueConfig;
use vigil_gateway::hardware::HardwareMonitor;
use vigil_gateway::model::{ChatModel, ModelEvent};
use vigil_gateway::queue::PriorityQueue;
use vigil_gateway::types::{GenerateRequest, Job, SinkMessage};
use vigil_gateway::worker::InferenceWorker;

struct EchoModel;

#[async_trait]
impl ChatModel for EchoModel {
    fn format_prompt(&self, system_prompt: Option<&str>, user_prompt: &str) -> String {
        match system_prompt {
            Some(sys) => format!("{sys}\n{user_prompt}"),
            None => user_prompt.to_string(),
        }
    }

    async fn generate_stream(
        &self,
        formatted_prompt: String,
        _max_tokens: u32,
        _temperature: f32,
    ) -> BoxStream<'static, ModelEvent> {
        let words: Vec<String> = formatted_prompt.split_whitespace().map(str::to_string).collect();
        stream::iter(words)
            .map(ModelEvent::TextChunk)
            .chain(stream::once(async { ModelEvent::Done }))
            .boxed()
    }

    async fn load_adapter(&self, _name: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn current_adapter(&self) -> String {
        "echo".to_string()
    }
}

async fn test_pool() -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

#[tokio::test]
async fn queue_to_worker_to_sink_delivers_streamed_chunks() {
    let queue = Arc::new(PriorityQueue::<Job>::new(QueueConfig::default()));
    let hardware = Arc::new(HardwareMonitor::spawn(None));
    let pool = test_pool().await;
    let worker = Arc::new(InferenceWorker::new(queue.clone(), Arc::new(EchoModel), hardware, pool));

    let shutdown = CancellationToken::new();
    let handle = worker.clone().spawn_supervised(shutdown.clone());

    let (tx, mut rx) = mpsc::channel(32);
    let request = GenerateRequest {
        request_id: "req-1".to_string(),
        prompt: "hello there world".to_string(),
        system_prompt: None,
        max_tokens: 64,
        temperature: 0.0,
        priority: None,
        session_id: None,
        include_history: false,
    };
    worker.enqueue(request, tx).await.unwrap();

    let mut chunks = Vec::new();
    while let Some(msg) = rx.recv().await {
        match msg {
            SinkMessage::Chunk(c) => chunks.push(c),
            SinkMessage::EndOfStream => break,
            SinkMessage::Error(e) => panic!("unexpected error from pipeline: {e}"),
        }
    }

    assert_eq!(chunks.join(" "), "hello there world");

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn queue_respects_priority_ordering_across_two_jobs() {
    let queue = Arc::new(PriorityQueue::<Job>::new(QueueConfig::default()));
    let hardware = Arc::new(HardwareMonitor::spawn(None));
    let pool = test_pool().await;
    let worker = Arc::new(InferenceWorker::new(queue.clone(), Arc::new(EchoModel), hardware, pool));

    let shutdown = CancellationToken::new();
    let handle = worker.clone().spawn_supervised(shutdown.clone());

    let (low_tx, mut low_rx) = mpsc::channel(32);
    let (high_tx, mut high_rx) = mpsc::channel(32);

    worker
        .enqueue(
            GenerateRequest {
                request_id: "low".to_string(),
                prompt: "low priority job".to_string(),
                system_prompt: None,
                max_tokens: 16,
                temperature: 0.0,
                priority: Some(100),
                session_id: None,
                include_history: false,
            },
            low_tx,
        )
        .await
        .unwrap();

    worker
        .enqueue(
            GenerateRequest {
                request_id: "high".to_string(),
                prompt: "high priority job".to_string(),
                system_prompt: None,
                max_tokens: 16,
                temperature: 0.0,
                priority: Some(0),
                session_id: None,
                include_history: false,
            },
            high_tx,
        )
        .await
        .unwrap();

    // Both jobs drain fully regardless of ordering; the queue only
    // guarantees the high-priority job is dequeued first.
    let mut high_text = String::new();
    while let Some(msg) = high_rx.recv().await {
        match msg {
            SinkMessage::Chunk(c) => {
                if !high_text.is_empty() {
                    high_text.push(' ');
                }
                high_text.push_str(&c);
            }
            SinkMessage::EndOfStream => break,
            SinkMessage::Error(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(high_text, "high priority job");

    let mut low_text = String::new();
    while let Some(msg) = low_rx.recv().await {
        match msg {
            SinkMessage::Chunk(c) => {
                if !low_text.is_empty() {
                    low_text.push(' ');
                }
                low_text.push_str(&c);
            }
            SinkMessage::EndOfStream => break,
            SinkMessage::Error(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(low_text, "low priority job");

    shutdown.cancel();
    handle.await.unwrap();
}
