// src/model/http.rs
// Default model-runtime adapter: an OpenAI-compatible chat/completions and
// embeddings endpoint (llama.cpp server, vLLM, Ollama's OpenAI shim, etc. all
// speak this). Swap this module out for a different `ChatModel`/
// `EmbeddingModel` implementation without touching the worker or queue.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{ChatModel, ModelEvent};
use crate::memory::EmbeddingModel;

pub struct HttpChatModel {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model_name: String,
    current_adapter: Arc<RwLock<String>>,
}

impl HttpChatModel {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model_name: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key,
            model_name: model_name.into(),
            current_adapter: Arc::new(RwLock::new("base".to_string())),
        }
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    fn format_prompt(&self, system_prompt: Option<&str>, user_prompt: &str) -> String {
        // The server-side chat template owns turn formatting; we hand it a
        // system/user pair and let it apply the template.
        match system_prompt {
            Some(system) => format!("{system}\n\n{user_prompt}"),
            None => user_prompt.to_string(),
        }
    }

    async fn generate_stream(
        &self,
        formatted_prompt: String,
        max_tokens: u32,
        temperature: f32,
    ) -> BoxStream<'static, ModelEvent> {
        let body = serde_json::json!({
            "model": self.model_name,
            "messages": [{ "role": "user", "content": formatted_prompt }],
            "max_tokens": max_tokens,
            "temperature": temperature,
            "stream": true,
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                return stream::once(async move { ModelEvent::Error(format!("request failed: {e}")) }).boxed();
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            return stream::once(async move {
                ModelEvent::Error(format!("model server returned {status}"))
            })
            .boxed();
        }

        let byte_stream = response.bytes_stream();
        let events = byte_stream.flat_map(|chunk_result| {
            let chunks = match chunk_result {
                Ok(bytes) => parse_sse_chunk(&bytes),
                Err(e) => vec![ModelEvent::Error(format!("stream error: {e}"))],
            };
            stream::iter(chunks)
        });

        events.chain(stream::once(async { ModelEvent::Done })).boxed()
    }

    async fn load_adapter(&self, name: &str) -> anyhow::Result<()> {
        let mut current = self.current_adapter.write().await;
        if *current == name {
            debug!(adapter = name, "adapter already loaded, no-op");
            return Ok(());
        }

        let body = serde_json::json!({ "adapter": name });
        let mut request = self.client.post(format!("{}/adapters/load", self.base_url)).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            anyhow::bail!("model server rejected adapter {name}: {}", response.status());
        }

        *current = name.to_string();
        Ok(())
    }

    fn current_adapter(&self) -> String {
        // best-effort synchronous read; try_read avoids blocking the hot path
        self.current_adapter
            .try_read()
            .map(|guard| guard.clone())
            .unwrap_or_else(|_| "base".to_string())
    }
}

fn parse_sse_chunk(bytes: &[u8]) -> Vec<ModelEvent> {
    let Ok(text) = std::str::from_utf8(bytes) else {
        return vec![];
    };

    let mut events = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        let Some(data) = line.strip_prefix("data: ") else { continue };
        if data == "[DONE]" {
            continue;
        }

        match serde_json::from_str::<serde_json::Value>(data) {
            Ok(json) => {
                if let Some(content) = json["choices"][0]["delta"]["content"].as_str() {
                    events.push(ModelEvent::TextChunk(content.to_string()));
                }
            }
            Err(e) => warn!("failed to parse SSE chunk: {e}"),
        }
    }
    events
}

pub struct HttpEmbeddingModel {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model_name: String,
    dim: u64,
}

impl HttpEmbeddingModel {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model_name: impl Into<String>, dim: u64) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key,
            model_name: model_name.into(),
            dim,
        }
    }
}

#[async_trait]
impl EmbeddingModel for HttpEmbeddingModel {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let body = serde_json::json!({ "model": self.model_name, "input": text });
        let mut request = self.client.post(format!("{}/embeddings", self.base_url)).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            anyhow::bail!("embedding server returned {}", response.status());
        }

        let raw: serde_json::Value = response.json().await?;
        let embedding = raw["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("no embedding in response"))?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();
        Ok(embedding)
    }

    fn dim(&self) -> u64 {
        self.dim
    }
}
