// src/chat/connection.rs
// Thin send wrapper around the split WebSocket sink.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use tokio::sync::Mutex;

use super::protocol::ServerMessage;

pub struct WsConnection {
    sender: Arc<Mutex<SplitSink<WebSocket, Message>>>,
}

impl WsConnection {
    pub fn new(sender: Arc<Mutex<SplitSink<WebSocket, Message>>>) -> Self {
        Self { sender }
    }

    pub async fn send(&self, message: &ServerMessage) -> anyhow::Result<()> {
        let text = serde_json::to_string(message)?;
        self.sender.lock().await.send(Message::Text(text.into())).await?;
        Ok(())
    }

    pub async fn send_status(&self, content: impl Into<String>) -> anyhow::Result<()> {
        self.send(&ServerMessage::Status { content: content.into() }).await
    }

    pub async fn send_error(&self, detail: impl Into<String>) -> anyhow::Result<()> {
        self.send(&ServerMessage::Error { detail: detail.into() }).await
    }
}
