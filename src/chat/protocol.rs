// src/chat/protocol.rs
// Wire types for the chat WebSocket. Client messages either carry a `type`
// (session control) or don't (a plain inference request).

use serde::{Deserialize, Serialize};

use crate::types::GenerateRequest;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    SessionStart {
        #[serde(default)]
        session_id: Option<String>,
    },
    SessionEnd {
        session_id: String,
    },
}

pub enum ClientMessage {
    Control(ControlMessage),
    Inference(GenerateRequest),
}

pub fn parse_client_message(text: &str) -> anyhow::Result<ClientMessage> {
    if let Ok(control) = serde_json::from_str::<ControlMessage>(text) {
        return Ok(ClientMessage::Control(control));
    }
    let request: GenerateRequest = serde_json::from_str(text)?;
    Ok(ClientMessage::Inference(request))
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Status { content: String },
    Token { content: String },
    End { content: String },
    Error { detail: String },
}
