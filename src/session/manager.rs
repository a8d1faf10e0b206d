// src/session/manager.rs
// Turn-level session handling plus the idle-sweep-and-summarize background
// task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::memory::MemoryStore;
use crate::types::{GenerateRequest, SinkMessage};
use crate::worker::InferenceWorker;

use super::store::{format_transcript, SessionStore};
use super::types::now_timestamp;

const SUMMARY_SYSTEM_PROMPT: &str = r#"
You summarize conversation transcripts. Given a TRANSCRIPT, respond with
ONLY a JSON object of the form {"title": "...", "summary": "..."}. The
title is a short label (under 80 characters); the summary captures what
was discussed, decided, or accomplished, using only the transcript.
"#;

pub struct SessionManager {
    store: Arc<SessionStore>,
    memory: Arc<MemoryStore>,
    worker: Arc<InferenceWorker>,
    background_priority: i64,
}

impl SessionManager {
    pub fn new(
        store: Arc<SessionStore>,
        memory: Arc<MemoryStore>,
        worker: Arc<InferenceWorker>,
        background_priority: i64,
    ) -> Self {
        Self {
            store,
            memory,
            worker,
            background_priority,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Validate `id_str` as a UUID and ensure a session row exists for it.
    /// Returns `None` (and logs) on an invalid id, matching the tolerant
    /// behavior the orchestrator needs from a client-supplied session id.
    pub async fn ensure_session(&self, id_str: &str) -> Option<String> {
        if Uuid::parse_str(id_str).is_err() {
            warn!(session_id = %id_str, "invalid session id, ignoring");
            return None;
        }
        if let Err(e) = self.store.create_session(id_str, None).await {
            warn!("failed to ensure session {id_str}: {e}");
            return None;
        }
        Some(id_str.to_string())
    }

    pub async fn append_message(&self, id: &str, role: &str, content: &str) -> anyhow::Result<()> {
        self.store.append_history(id, role, content).await
    }

    /// Summarize one session: builds the transcript, runs it through the
    /// pipeline at background priority, persists the result, and archives
    /// the summary into memory keyed by session id.
    pub async fn summarize(&self, session_id: &str) -> anyhow::Result<()> {
        let Some(session) = self.store.get_session(session_id).await? else {
            return Ok(());
        };
        // Skip only if nothing happened since the last summary. A session
        // reactivated by new activity after being summarized has
        // last_active_at > summarized_at and must be re-summarized.
        if session.is_summarized {
            if let Some(summarized_at) = session.summarized_at {
                if session.last_active_at <= summarized_at {
                    return Ok(());
                }
            } else {
                return Ok(());
            }
        }

        let transcript = format_transcript(&session.history, None);
        if transcript.trim().is_empty() {
            self.store
                .update_session_summary(session_id, Some("Empty Conversation"), Some(""), true)
                .await?;
            return Ok(());
        }

        let (title, summary) = self.generate_summary(&transcript).await?;

        self.store
            .update_session_summary(session_id, Some(&title), Some(&summary), true)
            .await?;

        if !summary.is_empty() {
            let metadata = serde_json::json!({ "session_id": session_id, "title": title });
            self.memory
                .memorize(&summary, "chat_summary", Some(metadata), Some(session_id.to_string()))
                .await?;
        }

        crate::metrics::record_session_summarized();
        Ok(())
    }

    async fn generate_summary(&self, transcript: &str) -> anyhow::Result<(String, String)> {
        let request = GenerateRequest {
            request_id: format!("summary-{}", Uuid::new_v4()),
            prompt: format!("TRANSCRIPT:\n{transcript}"),
            system_prompt: Some(SUMMARY_SYSTEM_PROMPT.trim().to_string()),
            max_tokens: 256,
            temperature: 0.3,
            priority: Some(self.background_priority),
            session_id: None,
            include_history: false,
        };

        let (tx, mut rx) = mpsc::channel(32);
        self.worker.run_direct(request, tx).await;

        let mut text = String::new();
        while let Some(msg) = rx.recv().await {
            match msg {
                SinkMessage::Chunk(chunk) => text.push_str(&chunk),
                SinkMessage::EndOfStream | SinkMessage::Error(_) => break,
            }
        }

        Ok(parse_summary_response(&text))
    }

    /// Long-lived task: wake every `interval` seconds, summarize every
    /// session idle for longer than `idle_timeout` seconds.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        idle_timeout: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = time::interval(interval);
            timer.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = timer.tick() => {
                        if let Err(e) = self.sweep(idle_timeout).await {
                            tracing::error!("session sweep failed: {e}");
                        }
                    }
                }
            }
        })
    }

    async fn sweep(&self, idle_timeout: Duration) -> anyhow::Result<()> {
        let cutoff = now_timestamp() - idle_timeout.as_secs() as i64;
        let stale = self.store.list_active_sessions_older_than(cutoff).await?;
        if !stale.is_empty() {
            info!("sweeping {} idle session(s)", stale.len());
        }
        for session in stale {
            if let Err(e) = self.summarize(&session.id).await {
                tracing::error!("failed to summarize session {}: {e}", session.id);
            }
        }
        Ok(())
    }
}

/// Parse a model response into `(title, summary)`. Prefers the documented
/// `{"title": ..., "summary": ...}` JSON shape; falls back to treating the
/// first non-empty line as the title and the rest as the summary.
fn parse_summary_response(text: &str) -> (String, String) {
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end > start {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text[start..=end]) {
                let title = value
                    .get("title")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Conversation Summary")
                    .to_string();
                let summary = value
                    .get("summary")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                return (title, summary);
            }
        }
    }

    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let title = lines
        .next()
        .map(|l| l.chars().take(80).collect::<String>())
        .unwrap_or_else(|| "Conversation Summary".to_string());
    let summary: String = lines.collect::<Vec<_>>().join("\n").chars().take(2000).collect();

    (title, summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_summary_shape() {
        let text = r#"Sure, here you go: {"title": "Debugging session", "summary": "Fixed the parser bug."}"#;
        let (title, summary) = parse_summary_response(text);
        assert_eq!(title, "Debugging session");
        assert_eq!(summary, "Fixed the parser bug.");
    }

    #[test]
    fn falls_back_to_first_line_heuristic() {
        let text = "Parser Bug Fix\n\nThe user reported a crash and we patched it.";
        let (title, summary) = parse_summary_response(text);
        assert_eq!(title, "Parser Bug Fix");
        assert_eq!(summary, "The user reported a crash and we patched it.");
    }

    #[test]
    fn empty_text_defaults_to_placeholder_title() {
        let (title, summary) = parse_summary_response("");
        assert_eq!(title, "Conversation Summary");
        assert_eq!(summary, "");
    }
}
