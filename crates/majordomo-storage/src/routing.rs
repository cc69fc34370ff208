//! Append-only routing log.
//!
//! The switchboard writes one entry per routing decision; everyone reads.
//! Entries from one decomposed message share a `group_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use majordomo_core::{GroupId, RequestId};

use crate::db::Database;
use crate::error::{StorageError, StorageResult};

const TABLE: &str = "routing_log";

/// One routing decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingEntry {
    /// Entry id.
    pub id: Uuid,
    /// The inbox row this decision descends from, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    /// Channel the message arrived on.
    pub source_channel: String,
    /// Endpoint the message arrived through.
    pub endpoint_identity: String,
    /// Sender identity.
    pub source_sender: String,
    /// Source thread, when threaded (drives thread affinity).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_thread_id: Option<String>,
    /// Target butler, or none when the decision was "no route".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routed_to: Option<String>,
    /// First words of the routed prompt.
    pub prompt_summary: String,
    /// Trace of this sub-route.
    pub trace_id: Uuid,
    /// Links sub-routes of one decomposed message. Absent for
    /// single-target routings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    /// Whether the dispatch succeeded.
    pub success: bool,
    /// Failure detail, when it did not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the entry was appended.
    pub created_at: DateTime<Utc>,
    /// `created_at` as epoch milliseconds, for ordering.
    pub created_at_ms: i64,
}

impl RoutingEntry {
    /// Truncation width of [`summarize_prompt`](Self::summarize_prompt).
    pub const SUMMARY_MAX: usize = 120;

    /// Build the stored prompt summary: first line, truncated on a char
    /// boundary.
    #[must_use]
    pub fn summarize_prompt(prompt: &str) -> String {
        let first_line = prompt.lines().next().unwrap_or_default();
        first_line.chars().take(Self::SUMMARY_MAX).collect()
    }
}

/// Typed access to the routing log.
#[derive(Debug, Clone)]
pub struct RoutingStore {
    db: Database,
}

impl RoutingStore {
    /// Wrap a database handle.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append one entry.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn append(&self, entry: RoutingEntry) -> StorageResult<()> {
        let _created: Option<RoutingEntry> = self
            .db
            .client()
            .create(TABLE)
            .content(entry)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    /// All entries of one decomposition group, in emission order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn list_by_group(&self, group: GroupId) -> StorageResult<Vec<RoutingEntry>> {
        let mut response = self
            .db
            .client()
            .query(format!("SELECT * FROM {TABLE} WHERE group_id = $group"))
            .bind(("group", group))
            .await?;
        let mut rows: Vec<RoutingEntry> = response
            .take(0)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        rows.sort_by_key(|r| r.created_at_ms);
        Ok(rows)
    }

    /// All entries for one inbox row.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn list_by_request(&self, request_id: RequestId) -> StorageResult<Vec<RoutingEntry>> {
        let mut response = self
            .db
            .client()
            .query(format!("SELECT * FROM {TABLE} WHERE request_id = $rid"))
            .bind(("rid", request_id))
            .await?;
        let mut rows: Vec<RoutingEntry> = response
            .take(0)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        rows.sort_by_key(|r| r.created_at_ms);
        Ok(rows)
    }

    /// Most recent successful route for a source thread, for thread
    /// affinity. Only routes that actually reached a butler count.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn latest_route_for_thread(
        &self,
        endpoint_identity: &str,
        external_thread_id: &str,
    ) -> StorageResult<Option<String>> {
        let mut response = self
            .db
            .client()
            .query(format!(
                "SELECT * FROM {TABLE}
                 WHERE endpoint_identity = $endpoint
                   AND external_thread_id = $thread
                   AND success = true
                   AND routed_to != NONE"
            ))
            .bind(("endpoint", endpoint_identity.to_owned()))
            .bind(("thread", external_thread_id.to_owned()))
            .await?;
        let rows: Vec<RoutingEntry> = response
            .take(0)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(rows
            .into_iter()
            .max_by_key(|r| r.created_at_ms)
            .and_then(|r| r.routed_to))
    }

    /// Every entry appended since `since` (rollups).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn list_since(&self, since: DateTime<Utc>) -> StorageResult<Vec<RoutingEntry>> {
        let mut response = self
            .db
            .client()
            .query(format!("SELECT * FROM {TABLE} WHERE created_at_ms >= $since_ms"))
            .bind(("since_ms", since.timestamp_millis()))
            .await?;
        let mut rows: Vec<RoutingEntry> = response
            .take(0)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        rows.sort_by_key(|r| r.created_at_ms);
        Ok(rows)
    }
}
