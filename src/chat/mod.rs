// src/chat/mod.rs
// Per-connection chat orchestrator: probe -> detect [SEARCH:]/[EXPAND:] ->
// enrich -> stream the final answer. Implements the protocol in `protocol`.

pub mod connection;
pub mod protocol;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::StreamExt;
use lazy_static::lazy_static;
use regex::Regex;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::prompt::{build_system_prompt, format_search_results, ExpandedTranscript, PromptInputs, SummaryRef};
use crate::search::SearchResponse;
use crate::state::AppState;
use crate::types::{GenerateRequest, SinkMessage};

use connection::WsConnection;
use protocol::{parse_client_message, ClientMessage, ControlMessage, ServerMessage};

lazy_static! {
    static ref SEARCH_PATTERN: Regex = Regex::new(r"(?i)\[SEARCH:\s*(.+?)\]").unwrap();
    static ref EXPAND_PATTERN: Regex =
        Regex::new(r"(?i)\[EXPAND:\s*([0-9a-fA-F-]{36})\]").unwrap();
}

const PROBE_MAX_TOKENS: u32 = 256;
const PROBE_INSTRUCTION: &str = "\
If the user's question depends on current events, scores, prices, or any \
fact you cannot verify from context, respond with ONLY `[SEARCH: <query>]` \
instead of answering.";

pub async fn ws_chat_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let started = Instant::now();
    let (sender, mut receiver) = socket.split();
    let connection = WsConnection::new(Arc::new(Mutex::new(sender)));
    crate::metrics::connection_opened();

    let mut session_id: Option<String> = None;

    while let Some(result) = receiver.next().await {
        let message = match result {
            Ok(m) => m,
            Err(e) => {
                warn!("websocket error: {e}");
                break;
            }
        };

        match message {
            Message::Text(text) => {
                let parsed = match parse_client_message(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("failed to parse client message: {e}");
                        let _ = connection.send_error(format!("invalid message: {e}")).await;
                        continue;
                    }
                };

                match parsed {
                    ClientMessage::Control(ControlMessage::SessionStart { session_id: requested }) => {
                        let id = requested.unwrap_or_else(|| Uuid::new_v4().to_string());
                        if state.session_manager.ensure_session(&id).await.is_some() {
                            session_id = Some(id.clone());
                            let _ = connection
                                .send(&ServerMessage::Status {
                                    content: format!("session_ready:{id}"),
                                })
                                .await;
                        } else {
                            let _ = connection.send_error("invalid session id").await;
                        }
                    }
                    ClientMessage::Control(ControlMessage::SessionEnd { session_id: id }) => {
                        let manager = state.session_manager.clone();
                        tokio::spawn(async move {
                            if let Err(e) = manager.summarize(&id).await {
                                error!("failed to summarize session {id}: {e}");
                            }
                        });
                        let _ = connection.send_status("session_closed").await;
                    }
                    ClientMessage::Inference(request) => {
                        let effective_session = request.session_id.clone().or_else(|| session_id.clone());
                        if let Err(e) =
                            handle_inference(&state, &connection, request, effective_session).await
                        {
                            error!("inference cycle failed: {e}");
                            let _ = connection.send_error(e.to_string()).await;
                        }
                    }
                }
            }
            Message::Close(_) => {
                info!("client closed the connection");
                break;
            }
            _ => {}
        }
    }

    crate::metrics::connection_closed();
    info!("connection closed after {:.2}s", started.elapsed().as_secs_f64());
}

async fn handle_inference(
    state: &Arc<AppState>,
    connection: &WsConnection,
    request: GenerateRequest,
    session_id: Option<String>,
) -> anyhow::Result<()> {
    connection.send_status("Thinking...").await?;

    let history = match (&session_id, request.include_history) {
        (Some(id), true) => state
            .session_manager
            .store()
            .get_session(id)
            .await?
            .map(|s| s.history)
            .unwrap_or_default(),
        _ => Vec::new(),
    };

    let memory_cfg = &crate::config::CONFIG.memory;
    let memories = state
        .memory
        .recall(&request.prompt, memory_cfg.recall_k, memory_cfg.recall_threshold)
        .await
        .unwrap_or_else(|e| {
            warn!("memory recall failed: {e}");
            Vec::new()
        });

    let related_summaries: Vec<SummaryRef> = state
        .memory
        .recall_with_metadata(&request.prompt, 5, None, Some("chat_summary"))
        .await
        .unwrap_or_else(|e| {
            warn!("summary recall failed: {e}");
            Vec::new()
        })
        .into_iter()
        .map(|m| SummaryRef {
            session_id: m
                .metadata
                .get("session_id")
                .and_then(|v| v.as_str())
                .unwrap_or(&m.id)
                .to_string(),
            title: m
                .metadata
                .get("title")
                .and_then(|v| v.as_str())
                .unwrap_or("Untitled")
                .to_string(),
            summary: m.document,
        })
        .collect();

    let base_inputs = PromptInputs {
        memories: &memories,
        history: &history,
        related_summaries: &related_summaries,
        expanded_transcripts: &[],
        search_context: None,
        user_system_prompt: request.system_prompt.as_deref(),
    };
    let base_prompt = build_system_prompt(&base_inputs, chrono::Utc::now());

    let probe_prompt = format!("{base_prompt}\n\n### CRITICAL\n{PROBE_INSTRUCTION}");
    let probe_request = GenerateRequest {
        request_id: format!("probe-{}", Uuid::new_v4()),
        prompt: request.prompt.clone(),
        system_prompt: Some(probe_prompt),
        max_tokens: request.max_tokens.min(PROBE_MAX_TOKENS),
        temperature: request.temperature,
        priority: request.priority,
        session_id: session_id.clone(),
        include_history: false,
    };

    let probe_text = run_to_completion(state, probe_request).await?;

    let search_query = extract_first(&SEARCH_PATTERN, &probe_text);
    let expand_id = extract_first(&EXPAND_PATTERN, &probe_text);

    if let Some(id) = &session_id {
        state
            .session_manager
            .append_message(id, "user", &request.prompt)
            .await?;
    }

    if search_query.is_none() && expand_id.is_none() {
        connection
            .send(&ServerMessage::Token { content: probe_text.clone() })
            .await?;
        connection.send(&ServerMessage::End { content: String::new() }).await?;
        if let Some(id) = &session_id {
            state.session_manager.append_message(id, "assistant", &probe_text).await?;
        }
        return Ok(());
    }

    let mut expanded_transcripts = Vec::new();
    if let Some(id) = &expand_id {
        connection.send_status("Expanding past session...").await?;
        let transcript = state.session_manager.store().fetch_full_session_transcript(id).await?;
        if !transcript.is_empty() {
            expanded_transcripts.push(ExpandedTranscript {
                session_id: id.clone(),
                transcript,
            });
        }
    }

    let search_outcome: Option<Result<SearchResponse, String>> = if let Some(query) = &search_query {
        connection.send_status("Searching the web...").await?;
        Some(state.search.search_and_browse(query).await)
    } else {
        None
    };

    let search_context = search_outcome
        .as_ref()
        .map(|outcome| format_search_results(outcome, crate::config::CONFIG.search.max_chars_per_result));

    let final_inputs = PromptInputs {
        memories: &memories,
        history: &history,
        related_summaries: &related_summaries,
        expanded_transcripts: &expanded_transcripts,
        search_context: search_context.as_deref(),
        user_system_prompt: request.system_prompt.as_deref(),
    };
    let final_prompt = build_system_prompt(&final_inputs, chrono::Utc::now());

    let final_request = GenerateRequest {
        request_id: format!("final-{}", Uuid::new_v4()),
        prompt: request.prompt.clone(),
        system_prompt: Some(final_prompt),
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        priority: request.priority,
        session_id: session_id.clone(),
        include_history: false,
    };

    let full_answer = stream_to_client(state, connection, final_request).await?;
    connection.send(&ServerMessage::End { content: String::new() }).await?;

    if let Some(id) = &session_id {
        state.session_manager.append_message(id, "assistant", &full_answer).await?;
    }

    Ok(())
}

fn extract_first(pattern: &Regex, text: &str) -> Option<String> {
    pattern.captures(text).map(|c| c[1].trim().to_string())
}

/// Submit `request`, collect every chunk, and return the full text -
/// used for the probe, which is never streamed to the client.
async fn run_to_completion(state: &Arc<AppState>, request: GenerateRequest) -> anyhow::Result<String> {
    let (tx, mut rx) = mpsc::channel(64);
    state.worker.enqueue(request, tx).await?;

    let mut text = String::new();
    while let Some(msg) = rx.recv().await {
        match msg {
            SinkMessage::Chunk(chunk) => text.push_str(&chunk),
            SinkMessage::Error(e) => {
                warn!("probe generation error: {e}");
                break;
            }
            SinkMessage::EndOfStream => break,
        }
    }
    Ok(text)
}

/// Submit `request` and forward every chunk to the client as it arrives.
/// Returns the full reconstructed text for the session history.
async fn stream_to_client(
    state: &Arc<AppState>,
    connection: &WsConnection,
    request: GenerateRequest,
) -> anyhow::Result<String> {
    let (tx, mut rx) = mpsc::channel(64);
    state.worker.enqueue(request, tx).await?;

    let mut text = String::new();
    while let Some(msg) = rx.recv().await {
        match msg {
            SinkMessage::Chunk(chunk) => {
                text.push_str(&chunk);
                connection.send(&ServerMessage::Token { content: chunk }).await?;
            }
            SinkMessage::Error(e) => {
                connection.send_error(e).await?;
                break;
            }
            SinkMessage::EndOfStream => break,
        }
    }
    Ok(text)
}
