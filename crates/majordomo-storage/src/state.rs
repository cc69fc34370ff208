//! Per-butler JSON key-value state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::Database;
use crate::error::{StorageError, StorageResult};

const TABLE: &str = "state";

/// One state entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    /// The key.
    pub key: String,
    /// Arbitrary JSON value.
    pub value: Value,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

/// Typed access to a butler's `state` table.
#[derive(Debug, Clone)]
pub struct StateStore {
    db: Database,
}

impl StateStore {
    /// Wrap a database handle.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Read a key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        let entry: Option<StateEntry> = self
            .db
            .client()
            .select((TABLE, key))
            .await
            .map_err(StorageError::from)?;
        Ok(entry.map(|e| e.value))
    }

    /// Write-through upsert.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        let entry = StateEntry {
            key: key.to_owned(),
            value,
            updated_at: Utc::now(),
        };
        let _stored: Option<StateEntry> = self
            .db
            .client()
            .upsert((TABLE, key))
            .content(entry)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    /// Delete a key. Idempotent: deleting a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        let _removed: Option<StateEntry> = self
            .db
            .client()
            .delete((TABLE, key))
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    /// List entries, optionally filtered by key prefix, sorted by key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn list(&self, prefix: Option<&str>) -> StorageResult<Vec<StateEntry>> {
        let mut entries: Vec<StateEntry> = self
            .db
            .client()
            .select(TABLE)
            .await
            .map_err(StorageError::from)?;
        if let Some(prefix) = prefix {
            entries.retain(|e| e.key.starts_with(prefix));
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> StateStore {
        let db = Database::connect_memory("health").await.unwrap();
        StateStore::new(db)
    }

    #[tokio::test]
    async fn set_get_delete_roundtrip() {
        let store = store().await;
        assert!(store.get("weight").await.unwrap().is_none());

        store
            .set("weight", serde_json::json!({"kg": 75}))
            .await
            .unwrap();
        assert_eq!(
            store.get("weight").await.unwrap().unwrap()["kg"],
            serde_json::json!(75)
        );

        // Upsert overwrites.
        store
            .set("weight", serde_json::json!({"kg": 74}))
            .await
            .unwrap();
        assert_eq!(
            store.get("weight").await.unwrap().unwrap()["kg"],
            serde_json::json!(74)
        );

        store.delete("weight").await.unwrap();
        assert!(store.get("weight").await.unwrap().is_none());
        // Idempotent delete.
        store.delete("weight").await.unwrap();
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let store = store().await;
        for key in ["goal:steps", "goal:sleep", "profile:name"] {
            store.set(key, serde_json::json!(1)).await.unwrap();
        }
        let goals = store.list(Some("goal:")).await.unwrap();
        let keys: Vec<_> = goals.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["goal:sleep", "goal:steps"]);

        assert_eq!(store.list(None).await.unwrap().len(), 3);
    }
}
