// src/session/store.rs
// Relational facade over the sessions table: history append, summary
// update, stale listing, deletion. Each operation is independently atomic.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use super::types::{now_timestamp, HistoryEntry, Session};

pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_session(&self, id: &str, title: Option<&str>) -> Result<Session> {
        if let Some(existing) = self.get_session(id).await? {
            return Ok(existing);
        }

        let now = now_timestamp();
        let title = title.unwrap_or("New Conversation");

        sqlx::query(
            r#"
            INSERT INTO sessions (id, title, created_at, last_active_at, updated_at, is_active, is_summarized, history_json)
            VALUES (?, ?, ?, ?, ?, 1, 0, '[]')
            "#,
        )
        .bind(id)
        .bind(title)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(session_id = %id, "created session");
        self.get_session(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("session {id} disappeared immediately after insert"))
    }

    pub async fn append_history(&self, id: &str, role: &str, content: &str) -> Result<()> {
        self.create_session(id, None).await?;

        let row = sqlx::query("SELECT history_json FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        let history_json: String = row.get("history_json");
        let mut history: Vec<HistoryEntry> = serde_json::from_str(&history_json)?;
        history.push(HistoryEntry {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: now_timestamp(),
        });

        let now = now_timestamp();
        sqlx::query(
            r#"
            UPDATE sessions
            SET history_json = ?, last_active_at = ?, updated_at = ?, is_active = 1
            WHERE id = ?
            "#,
        )
        .bind(serde_json::to_string(&history)?)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let row = sqlx::query(
            r#"
            SELECT id, title, created_at, last_active_at, updated_at, is_active, is_summarized, summarized_at, summary, history_json
            FROM sessions WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let history_json: String = row.get("history_json");
        let history: Vec<HistoryEntry> = serde_json::from_str(&history_json).unwrap_or_default();

        Ok(Some(Session {
            id: row.get("id"),
            title: row.get("title"),
            created_at: row.get("created_at"),
            last_active_at: row.get("last_active_at"),
            updated_at: row.get("updated_at"),
            is_active: row.get::<i64, _>("is_active") != 0,
            is_summarized: row.get::<i64, _>("is_summarized") != 0,
            summarized_at: row.get("summarized_at"),
            summary: row.get("summary"),
            history,
        }))
    }

    pub async fn update_session_summary(
        &self,
        id: &str,
        title: Option<&str>,
        summary: Option<&str>,
        mark_inactive: bool,
    ) -> Result<()> {
        let now = now_timestamp();
        sqlx::query(
            r#"
            UPDATE sessions
            SET
                title = COALESCE(?, title),
                summary = COALESCE(?, summary),
                is_summarized = 1,
                summarized_at = ?,
                is_active = CASE WHEN ? THEN 0 ELSE is_active END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(title)
        .bind(summary)
        .bind(now)
        .bind(mark_inactive)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_active_sessions_older_than(&self, cutoff: i64) -> Result<Vec<Session>> {
        let rows = sqlx::query("SELECT id FROM sessions WHERE is_active = 1 AND last_active_at < ?")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            if let Some(session) = self.get_session(&id).await? {
                sessions.push(session);
            }
        }
        Ok(sessions)
    }

    pub async fn delete_session(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn fetch_full_session_transcript(&self, id: &str) -> Result<String> {
        let Some(session) = self.get_session(id).await? else {
            return Ok(String::new());
        };
        Ok(format_transcript(&session.history, None))
    }

    pub async fn list_summaries(&self) -> Result<Vec<Session>> {
        let rows = sqlx::query("SELECT id FROM sessions WHERE is_summarized = 1 ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await?;
        let mut sessions = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            if let Some(session) = self.get_session(&id).await? {
                sessions.push(session);
            }
        }
        Ok(sessions)
    }
}

/// `"ROLE: content"` lines, optionally capped to the last `max_messages`.
pub fn format_transcript(history: &[HistoryEntry], max_messages: Option<usize>) -> String {
    let slice: &[HistoryEntry] = match max_messages {
        Some(n) if history.len() > n => &history[history.len() - n..],
        _ => history,
    };
    slice
        .iter()
        .map(|entry| format!("{}: {}", entry.role.to_uppercase(), entry.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn append_history_creates_session_and_updates_timestamps() {
        let store = SessionStore::new(test_pool().await);
        store.append_history("s1", "user", "hello").await.unwrap();
        let session = store.get_session("s1").await.unwrap().unwrap();

        assert_eq!(session.history.len(), 1);
        assert!(session.is_active);
        assert!(session.last_active_at >= session.created_at);
    }

    #[tokio::test]
    async fn summary_invariant_holds_after_update() {
        let store = SessionStore::new(test_pool().await);
        store.create_session("s2", None).await.unwrap();
        store
            .update_session_summary("s2", Some("Title"), Some("Summary text"), true)
            .await
            .unwrap();

        let session = store.get_session("s2").await.unwrap().unwrap();
        assert!(session.is_summarized);
        assert!(!session.is_active);
        assert_eq!(session.summary.as_deref(), Some("Summary text"));
    }

    #[tokio::test]
    async fn stale_listing_respects_cutoff() {
        let store = SessionStore::new(test_pool().await);
        store.append_history("old", "user", "hi").await.unwrap();

        let future_cutoff = now_timestamp() + 3600;
        let stale = store.list_active_sessions_older_than(future_cutoff).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, "old");
    }
}
