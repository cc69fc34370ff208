//! Per-butler scheduled tasks.
//!
//! The store enforces per-butler name uniqueness and keeps the fire
//! decision and the `last_run_at` / `next_run_at` advancement in one
//! write, so a crash between evaluation and dispatch never double-fires.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{StorageError, StorageResult};

const TABLE: &str = "scheduled_tasks";

/// One scheduled task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Task id.
    pub id: Uuid,
    /// Name, unique within the butler.
    pub name: String,
    /// Five-field cron expression or RFC 3339 one-shot instant.
    pub spec: String,
    /// IANA timezone the spec is evaluated in.
    pub timezone: String,
    /// `prompt` or `job`.
    pub dispatch_mode: String,
    /// Prompt text; set exactly when `dispatch_mode = "prompt"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Job name; set exactly when `dispatch_mode = "job"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    /// Job arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_args: Option<Value>,
    /// Whether the scheduler considers this task at all.
    pub enabled: bool,
    /// Next due instant; absent exactly when disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
    /// Last fire time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    /// Outcome of the last fire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<String>,
    /// Hard stop: due after this instant means disable, not fire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until_at: Option<DateTime<Utc>>,
}

/// Typed access to a butler's `scheduled_tasks` table.
#[derive(Debug, Clone)]
pub struct ScheduleStore {
    db: Database,
}

impl ScheduleStore {
    /// Wrap a database handle.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a task. Names are unique per butler; callers replacing a
    /// one-shot must delete the prior row first.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Duplicate`] when the name is taken.
    pub async fn create(&self, task: TaskRecord) -> StorageResult<TaskRecord> {
        if self.find_by_name(&task.name).await?.is_some() {
            return Err(StorageError::Duplicate(format!("task {:?}", task.name)));
        }
        let created: Option<TaskRecord> = self
            .db
            .client()
            .create((TABLE, task.name.clone()))
            .content(task.clone())
            .await
            // The unique index closes the check-then-create race.
            .map_err(StorageError::from)?;
        created.ok_or_else(|| StorageError::Duplicate(format!("task {:?}", task.name)))
    }

    /// Upsert a task from configuration, preserving run history on
    /// existing rows with the same name.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn upsert_from_config(&self, mut task: TaskRecord) -> StorageResult<TaskRecord> {
        if let Some(existing) = self.find_by_name(&task.name).await? {
            task.id = existing.id;
            task.last_run_at = existing.last_run_at;
            task.last_result = existing.last_result;
        }
        let stored: Option<TaskRecord> = self
            .db
            .client()
            .upsert((TABLE, task.name.clone()))
            .content(task.clone())
            .await
            .map_err(StorageError::from)?;
        Ok(stored.unwrap_or(task))
    }

    /// Delete a task by name.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown names.
    pub async fn delete_by_name(&self, name: &str) -> StorageResult<()> {
        if self.find_by_name(name).await?.is_none() {
            return Err(StorageError::NotFound(format!("task {name}")));
        }
        let _removed: Option<TaskRecord> = self
            .db
            .client()
            .delete((TABLE, name))
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    /// Look a task up by name.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn find_by_name(&self, name: &str) -> StorageResult<Option<TaskRecord>> {
        let task: Option<TaskRecord> = self
            .db
            .client()
            .select((TABLE, name))
            .await
            .map_err(StorageError::from)?;
        Ok(task)
    }

    /// All tasks, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn list(&self) -> StorageResult<Vec<TaskRecord>> {
        let mut tasks: Vec<TaskRecord> = self
            .db
            .client()
            .select(TABLE)
            .await
            .map_err(StorageError::from)?;
        tasks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tasks)
    }

    /// Enabled tasks whose `next_run_at` has passed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn list_due(&self, now: DateTime<Utc>) -> StorageResult<Vec<TaskRecord>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|t| t.enabled && t.next_run_at.is_some_and(|at| at <= now))
            .collect())
    }

    /// Advance a fired task in one write: set `last_run_at`, record the
    /// result, and either schedule the next occurrence or disable the
    /// task (one-shots, and cron tasks with no further occurrence).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the task vanished.
    pub async fn mark_fired(
        &self,
        name: &str,
        fired_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
        result: &str,
    ) -> StorageResult<TaskRecord> {
        let mut task = self
            .find_by_name(name)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("task {name}")))?;
        task.last_run_at = Some(fired_at);
        task.last_result = Some(result.to_owned());
        task.next_run_at = next_run_at;
        task.enabled = next_run_at.is_some();
        let stored: Option<TaskRecord> = self
            .db
            .client()
            .upsert((TABLE, name))
            .content(task.clone())
            .await
            .map_err(StorageError::from)?;
        Ok(stored.unwrap_or(task))
    }

    /// Record the dispatch outcome of the most recent fire without moving
    /// `next_run_at`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the task vanished.
    pub async fn record_result(&self, name: &str, result: &str) -> StorageResult<()> {
        let mut task = self
            .find_by_name(name)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("task {name}")))?;
        task.last_result = Some(result.to_owned());
        let _stored: Option<TaskRecord> = self
            .db
            .client()
            .upsert((TABLE, name))
            .content(task)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    /// Disable a task that expired (`until_at` passed) without firing it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the task vanished.
    pub async fn disable_expired(&self, name: &str) -> StorageResult<TaskRecord> {
        let mut task = self
            .find_by_name(name)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("task {name}")))?;
        task.enabled = false;
        task.next_run_at = None;
        task.last_result = Some("expired".to_owned());
        let stored: Option<TaskRecord> = self
            .db
            .client()
            .upsert((TABLE, name))
            .content(task.clone())
            .await
            .map_err(StorageError::from)?;
        Ok(stored.unwrap_or(task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn task(name: &str, next: Option<DateTime<Utc>>) -> TaskRecord {
        TaskRecord {
            id: Uuid::new_v4(),
            name: name.to_owned(),
            spec: "0 7 * * *".to_owned(),
            timezone: "UTC".to_owned(),
            dispatch_mode: "prompt".to_owned(),
            prompt: Some("Morning brief".to_owned()),
            job_name: None,
            job_args: None,
            enabled: next.is_some(),
            next_run_at: next,
            last_run_at: None,
            last_result: None,
            until_at: None,
        }
    }

    async fn store() -> ScheduleStore {
        let db = Database::connect_memory("health").await.unwrap();
        db.define_schema().await.unwrap();
        ScheduleStore::new(db)
    }

    #[tokio::test]
    async fn duplicate_name_creation_fails() {
        let store = store().await;
        store.create(task("brief", Some(Utc::now()))).await.unwrap();
        let err = store.create(task("brief", Some(Utc::now()))).await.unwrap_err();
        assert!(matches!(err, StorageError::Duplicate(_)));
    }

    #[tokio::test]
    async fn delete_then_recreate_works() {
        let store = store().await;
        store.create(task("brief", Some(Utc::now()))).await.unwrap();
        store.delete_by_name("brief").await.unwrap();
        assert!(store.find_by_name("brief").await.unwrap().is_none());
        store.create(task("brief", Some(Utc::now()))).await.unwrap();
    }

    #[tokio::test]
    async fn list_due_honors_enabled_and_time() {
        let store = store().await;
        let now = Utc::now();
        store.create(task("past", Some(now - Duration::minutes(1)))).await.unwrap();
        store.create(task("future", Some(now + Duration::minutes(5)))).await.unwrap();
        store.create(task("disabled", None)).await.unwrap();

        let due = store.list_due(now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].name, "past");
    }

    #[tokio::test]
    async fn mark_fired_advances_or_disables() {
        let store = store().await;
        let now = Utc::now();
        store.create(task("brief", Some(now))).await.unwrap();

        // Cron-style: next occurrence supplied.
        let advanced = store
            .mark_fired("brief", now, Some(now + Duration::days(1)), "ok")
            .await
            .unwrap();
        assert!(advanced.enabled);
        assert_eq!(advanced.last_result.as_deref(), Some("ok"));

        // One-shot style: no next occurrence.
        let done = store.mark_fired("brief", now, None, "ok").await.unwrap();
        assert!(!done.enabled);
        assert!(done.next_run_at.is_none());
    }

    #[tokio::test]
    async fn disable_expired_never_fires() {
        let store = store().await;
        store.create(task("review", Some(Utc::now()))).await.unwrap();
        let expired = store.disable_expired("review").await.unwrap();
        assert!(!expired.enabled);
        assert!(expired.next_run_at.is_none());
        assert!(expired.last_run_at.is_none());
        assert_eq!(expired.last_result.as_deref(), Some("expired"));
    }
}
