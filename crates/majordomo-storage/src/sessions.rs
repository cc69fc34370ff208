//! Per-butler session records, plus the durable queue that survives a
//! daemon restart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use majordomo_core::{RequestContext, RequestId, SessionId};

use crate::db::Database;
use crate::error::{StorageError, StorageResult};

const TABLE: &str = "sessions";
const QUEUE_TABLE: &str = "session_queue";

/// Width at which prompts are truncated for logs and summaries.
pub const PROMPT_LOG_MAX: usize = 200;

/// One spawned session. Immutable once `completed_at` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session id.
    pub id: SessionId,
    /// Butler that ran it.
    pub butler: String,
    /// What triggered it: `ingress`, `schedule`, `tick`, `mcp`, `manual`.
    pub trigger_source: String,
    /// Full prompt (truncate with [`truncate_prompt`] for observability).
    pub prompt: String,
    /// When the worker picked the request up.
    pub started_at: DateTime<Utc>,
    /// `started_at` as epoch milliseconds, for ordering.
    pub started_at_ms: i64,
    /// When the child exited, if it has.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Whether the session succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    /// Wall-clock duration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Failure detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Model the CLI reported, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Originating inbox row, for ingress-triggered sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
}

/// Truncate a prompt for log lines.
#[must_use]
pub fn truncate_prompt(prompt: &str) -> String {
    prompt.chars().take(PROMPT_LOG_MAX).collect()
}

/// A queued-but-not-yet-spawned session request, persisted so a restart
/// re-enqueues unfinished work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedSession {
    /// Pre-minted session id.
    pub id: SessionId,
    /// What triggered it.
    pub trigger_source: String,
    /// Trigger prompt text.
    pub prompt: String,
    /// Originating-request block, for ingress triggers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_context: Option<RequestContext>,
    /// When the request was accepted into the queue.
    pub enqueued_at: DateTime<Utc>,
}

/// Typed access to a butler's session tables.
#[derive(Debug, Clone)]
pub struct SessionStore {
    db: Database,
}

impl SessionStore {
    /// Wrap a database handle.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record a session the moment its worker picks it up.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn insert_started(&self, record: SessionRecord) -> StorageResult<()> {
        let _created: Option<SessionRecord> = self
            .db
            .client()
            .create((TABLE, record.id.to_string()))
            .content(record)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    /// Close a session record. The second of the two writes bracketing the
    /// external spawn.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the start row vanished.
    pub async fn complete(
        &self,
        id: SessionId,
        success: bool,
        duration_ms: u64,
        error: Option<String>,
        model: Option<String>,
    ) -> StorageResult<SessionRecord> {
        let mut record: SessionRecord = self
            .db
            .client()
            .select((TABLE, id.to_string()))
            .await
            .map_err(StorageError::from)?
            .ok_or_else(|| StorageError::NotFound(format!("session {id}")))?;
        record.completed_at = Some(Utc::now());
        record.success = Some(success);
        record.duration_ms = Some(duration_ms);
        record.error = error;
        record.model = model;
        let stored: Option<SessionRecord> = self
            .db
            .client()
            .upsert((TABLE, id.to_string()))
            .content(record.clone())
            .await
            .map_err(StorageError::from)?;
        Ok(stored.unwrap_or(record))
    }

    /// Most recent sessions first.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn list_recent(&self, limit: usize) -> StorageResult<Vec<SessionRecord>> {
        let mut records: Vec<SessionRecord> = self
            .db
            .client()
            .select(TABLE)
            .await
            .map_err(StorageError::from)?;
        records.sort_by_key(|r| std::cmp::Reverse(r.started_at_ms));
        records.truncate(limit);
        Ok(records)
    }

    /// Persist an accepted queue entry.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn enqueue(&self, queued: QueuedSession) -> StorageResult<()> {
        let _created: Option<QueuedSession> = self
            .db
            .client()
            .create((QUEUE_TABLE, queued.id.to_string()))
            .content(queued)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    /// Drop a queue entry once its session row exists.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn dequeue(&self, id: SessionId) -> StorageResult<()> {
        let _removed: Option<QueuedSession> = self
            .db
            .client()
            .delete((QUEUE_TABLE, id.to_string()))
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    /// Unfinished queue entries, oldest first. Called once on startup to
    /// resume work accepted before a crash.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn list_queued(&self) -> StorageResult<Vec<QueuedSession>> {
        let mut queued: Vec<QueuedSession> = self
            .db
            .client()
            .select(QUEUE_TABLE)
            .await
            .map_err(StorageError::from)?;
        queued.sort_by_key(|q| q.enqueued_at);
        Ok(queued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(trigger: &str) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            id: SessionId::new(),
            butler: "health".to_owned(),
            trigger_source: trigger.to_owned(),
            prompt: "Log my weight 75 kg".to_owned(),
            started_at: now,
            started_at_ms: now.timestamp_millis(),
            completed_at: None,
            success: None,
            duration_ms: None,
            error: None,
            model: None,
            request_id: Some(RequestId::new()),
        }
    }

    async fn store() -> SessionStore {
        let db = Database::connect_memory("health").await.unwrap();
        SessionStore::new(db)
    }

    #[tokio::test]
    async fn start_then_complete() {
        let store = store().await;
        let rec = record("ingress");
        let id = rec.id;
        store.insert_started(rec).await.unwrap();

        let done = store
            .complete(id, true, 1234, None, Some("sonnet".to_owned()))
            .await
            .unwrap();
        assert_eq!(done.success, Some(true));
        assert_eq!(done.duration_ms, Some(1234));
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn complete_unknown_session_fails() {
        let store = store().await;
        let err = store
            .complete(SessionId::new(), false, 0, Some("boom".to_owned()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn recent_is_newest_first() {
        let store = store().await;
        let mut older = record("schedule");
        older.started_at_ms = 1000;
        let mut newer = record("ingress");
        newer.started_at_ms = 2000;
        store.insert_started(older).await.unwrap();
        store.insert_started(newer).await.unwrap();

        let recent = store.list_recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].trigger_source, "ingress");
    }

    #[tokio::test]
    async fn queue_roundtrip_survives_restart_pattern() {
        let store = store().await;
        let q = QueuedSession {
            id: SessionId::new(),
            trigger_source: "schedule".to_owned(),
            prompt: "Morning brief".to_owned(),
            request_context: None,
            enqueued_at: Utc::now(),
        };
        store.enqueue(q.clone()).await.unwrap();
        let pending = store.list_queued().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].prompt, "Morning brief");

        store.dequeue(q.id).await.unwrap();
        assert!(store.list_queued().await.unwrap().is_empty());
    }

    #[test]
    fn prompt_truncation() {
        let long = "y".repeat(1000);
        assert_eq!(truncate_prompt(&long).len(), PROMPT_LOG_MAX);
        assert_eq!(truncate_prompt("short"), "short");
    }
}
