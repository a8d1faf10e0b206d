// src/model/mod.rs
// The model runtime boundary: chat templating and streaming generation.
// Concrete adapters (llama.cpp server, vLLM, a local candle model, ...)
// implement this trait; the worker only depends on the trait.

pub mod http;

use async_trait::async_trait;
use futures::stream::BoxStream;

#[derive(Debug, Clone)]
pub enum ModelEvent {
    /// Either an incremental delta or a growing prefix snapshot - the
    /// worker's de-dup rule (see `worker::dedup`) normalizes both shapes.
    TextChunk(String),
    Done,
    Error(String),
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Render a system + user prompt pair into this model's chat template.
    fn format_prompt(&self, system_prompt: Option<&str>, user_prompt: &str) -> String;

    /// Stream a generation. The stream always ends with `Done` or `Error`.
    async fn generate_stream(
        &self,
        formatted_prompt: String,
        max_tokens: u32,
        temperature: f32,
    ) -> BoxStream<'static, ModelEvent>;

    /// Swap the active adapter. `name` of `"base"`/`"none"` reverts to base.
    async fn load_adapter(&self, name: &str) -> anyhow::Result<()>;

    fn current_adapter(&self) -> String;
}
