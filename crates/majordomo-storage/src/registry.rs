//! Butler registry: which daemons exist and where to reach them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::error::{StorageError, StorageResult};

const TABLE: &str = "butler_registry";

/// One registered butler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ButlerRecord {
    /// Butler name; the registry key.
    pub name: String,
    /// Tool-server endpoint.
    pub endpoint_url: String,
    /// Shown to the classifier when picking routes.
    pub description: String,
    /// Capability modules the butler advertises.
    pub modules: Vec<String>,
    /// Last successful contact. Bumped by route success, never by rescans.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,
    /// First registration time.
    pub registered_at: DateTime<Utc>,
}

/// Typed access to the butler registry.
#[derive(Debug, Clone)]
pub struct ButlerRegistryStore {
    db: Database,
}

impl ButlerRegistryStore {
    /// Wrap a database handle.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Upsert a butler from a config rescan.
    ///
    /// Preserves `registered_at` and `last_seen_at` on existing rows;
    /// vanished butlers are never removed here.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn upsert_from_config(
        &self,
        name: &str,
        endpoint_url: &str,
        description: &str,
        modules: &[String],
    ) -> StorageResult<ButlerRecord> {
        let record = if let Some(mut existing) = self.get(name).await? {
            existing.endpoint_url = endpoint_url.to_owned();
            existing.description = description.to_owned();
            existing.modules = modules.to_vec();
            existing
        } else {
            ButlerRecord {
                name: name.to_owned(),
                endpoint_url: endpoint_url.to_owned(),
                description: description.to_owned(),
                modules: modules.to_vec(),
                last_seen_at: None,
                registered_at: Utc::now(),
            }
        };
        let stored: Option<ButlerRecord> = self
            .db
            .client()
            .upsert((TABLE, name))
            .content(record.clone())
            .await
            .map_err(StorageError::from)?;
        Ok(stored.unwrap_or(record))
    }

    /// Record a successful contact.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown butlers.
    pub async fn touch_last_seen(&self, name: &str) -> StorageResult<()> {
        let mut record = self
            .get(name)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("butler {name}")))?;
        record.last_seen_at = Some(Utc::now());
        let _stored: Option<ButlerRecord> = self
            .db
            .client()
            .upsert((TABLE, name))
            .content(record)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    /// Look a butler up by name.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn get(&self, name: &str) -> StorageResult<Option<ButlerRecord>> {
        let record: Option<ButlerRecord> = self
            .db
            .client()
            .select((TABLE, name))
            .await
            .map_err(StorageError::from)?;
        Ok(record)
    }

    /// All registered butlers, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn list(&self) -> StorageResult<Vec<ButlerRecord>> {
        let mut records: Vec<ButlerRecord> = self
            .db
            .client()
            .select(TABLE)
            .await
            .map_err(StorageError::from)?;
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    /// The classifier's view: every butler except the switchboard itself.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn routable_snapshot(&self) -> StorageResult<Vec<ButlerRecord>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|r| r.name != "switchboard")
            .collect())
    }
}
