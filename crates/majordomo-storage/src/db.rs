//! Embedded `SurrealDB` connection wrapper.
//!
//! One namespace (`majordomo`), one database per butler. The switchboard's
//! database additionally carries the fleet-level tables (inbox, routing
//! log, registries). A butler only ever receives a handle to its own
//! database; cross-butler reads go through routing.

use crate::error::{StorageError, StorageResult};

/// Re-export for direct query access when the typed stores are not enough.
pub use surrealdb;

/// Namespace every fleet database lives in.
const NAMESPACE: &str = "majordomo";

/// `SurrealDB` connection scoped to one butler's database.
#[derive(Clone)]
pub struct Database {
    inner: surrealdb::Surreal<surrealdb::engine::any::Any>,
    butler: String,
}

impl Database {
    /// Connect to the embedded engine with durable `SurrealKV` storage,
    /// scoped to `butler`'s database.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connection`] if the connection fails.
    pub async fn connect_embedded(path: &str, butler: &str) -> StorageResult<Self> {
        let endpoint = format!("surrealkv://{path}");
        Self::connect(&endpoint, butler).await
    }

    /// Connect to an in-memory engine (tests).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connection`] if the connection fails.
    pub async fn connect_memory(butler: &str) -> StorageResult<Self> {
        Self::connect("mem://", butler).await
    }

    async fn connect(endpoint: &str, butler: &str) -> StorageResult<Self> {
        let db: surrealdb::Surreal<surrealdb::engine::any::Any> = surrealdb::Surreal::init();
        db.connect(endpoint)
            .await
            .map_err(|e: surrealdb::Error| StorageError::Connection(e.to_string()))?;
        db.use_ns(NAMESPACE)
            .use_db(butler)
            .await
            .map_err(|e: surrealdb::Error| StorageError::Connection(e.to_string()))?;
        Ok(Self {
            inner: db,
            butler: butler.to_owned(),
        })
    }

    /// Define the unique indexes the stores rely on.
    ///
    /// Idempotent; run once on startup. The dedupe-key index is the
    /// backstop under the advisory locks, the task-name index enforces
    /// per-butler task uniqueness.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] if a definition fails.
    pub async fn define_schema(&self) -> StorageResult<()> {
        self.inner
            .query(
                "DEFINE INDEX IF NOT EXISTS inbox_dedupe_key
                     ON TABLE message_inbox FIELDS dedupe_key UNIQUE;
                 DEFINE INDEX IF NOT EXISTS task_name
                     ON TABLE scheduled_tasks FIELDS name UNIQUE;
                 DEFINE INDEX IF NOT EXISTS connector_key
                     ON TABLE connector_registry FIELDS connector_type, endpoint_identity UNIQUE;",
            )
            .await?
            .check()?;
        Ok(())
    }

    /// Which butler's database this handle is scoped to.
    #[must_use]
    pub fn butler(&self) -> &str {
        &self.butler
    }

    /// The underlying client, for queries the typed stores do not cover.
    #[must_use]
    pub fn client(&self) -> &surrealdb::Surreal<surrealdb::engine::any::Any> {
        &self.inner
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("butler", &self.butler)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_memory_and_define_schema() {
        let db = Database::connect_memory("health").await.unwrap();
        assert_eq!(db.butler(), "health");
        db.define_schema().await.unwrap();
        // Idempotent.
        db.define_schema().await.unwrap();
    }
}
