//! Outbound delivery log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use majordomo_core::RequestId;

use crate::db::Database;
use crate::error::{StorageError, StorageResult};

const TABLE: &str = "notifications";

/// One outbound delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Delivery id.
    pub id: Uuid,
    /// Channel the message went out on.
    pub channel: String,
    /// Recipient identity on that channel.
    pub recipient: String,
    /// The delivered text.
    pub message: String,
    /// Intent: `send`, `reply`, `react`, or `proactive`.
    pub intent: String,
    /// `sent` or `failed`.
    pub status: String,
    /// Failure detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Butler that asked for the delivery.
    pub source_butler: String,
    /// Originating inbox row, for replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    /// When the attempt happened.
    pub created_at: DateTime<Utc>,
}

/// Typed access to the notifications table.
#[derive(Debug, Clone)]
pub struct NotificationStore {
    db: Database,
}

impl NotificationStore {
    /// Wrap a database handle.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append one delivery attempt.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn append(&self, record: NotificationRecord) -> StorageResult<()> {
        let _created: Option<NotificationRecord> = self
            .db
            .client()
            .create(TABLE)
            .content(record)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    /// Deliveries tied to one inbox row.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn list_by_request(
        &self,
        request_id: RequestId,
    ) -> StorageResult<Vec<NotificationRecord>> {
        let mut response = self
            .db
            .client()
            .query(format!("SELECT * FROM {TABLE} WHERE request_id = $rid"))
            .bind(("rid", request_id))
            .await?;
        let mut rows: Vec<NotificationRecord> = response
            .take(0)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        rows.sort_by_key(|r| r.created_at);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_and_list_by_request() {
        let db = Database::connect_memory("switchboard").await.unwrap();
        let store = NotificationStore::new(db);
        let rid = RequestId::new();
        store
            .append(NotificationRecord {
                id: Uuid::new_v4(),
                channel: "telegram".to_owned(),
                recipient: "user:77".to_owned(),
                message: "Logged 75 kg".to_owned(),
                intent: "reply".to_owned(),
                status: "sent".to_owned(),
                error: None,
                source_butler: "health".to_owned(),
                request_id: Some(rid),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let rows = store.list_by_request(rid).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].intent, "reply");
        assert!(
            store
                .list_by_request(RequestId::new())
                .await
                .unwrap()
                .is_empty()
        );
    }
}
