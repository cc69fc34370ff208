//! The message inbox: one row per accepted envelope, at most one per
//! dedupe key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use majordomo_core::dedupe::{advisory_lock_key, derive_dedupe_key};
use majordomo_core::{IngestEnvelope, RequestId, TriageDecision};

use crate::db::Database;
use crate::error::{StorageError, StorageResult};
use crate::locks::AdvisoryLocks;

/// Table the inbox lives in.
const TABLE: &str = "message_inbox";

/// One accepted envelope. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxRow {
    /// Time-ordered id minted at acceptance.
    pub request_id: RequestId,
    /// When the ingress accepted the envelope.
    pub received_at: DateTime<Utc>,
    /// Channel wire name.
    pub channel: String,
    /// Provider wire name.
    pub provider: String,
    /// Endpoint the message arrived through.
    pub endpoint_identity: String,
    /// Source-native event id.
    pub external_event_id: String,
    /// Source-native thread id, when threaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_thread_id: Option<String>,
    /// Sender identity.
    pub sender_identity: String,
    /// Normalized text, as submitted.
    pub normalized_text: String,
    /// Payload completeness tier at acceptance.
    pub ingestion_tier: String,
    /// Queue-ordering hint carried in from the envelope.
    pub policy_tier: String,
    /// The derived dedupe key. Unique.
    pub dedupe_key: String,
    /// Which ladder rung produced the key.
    pub dedupe_strategy: String,
    /// Triage action recorded at acceptance, when one applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triage_decision: Option<String>,
    /// Butler a triage decision routed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triage_target: Option<String>,
    /// Rule (or marker) behind the triage decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triage_rule_id: Option<String>,
}

/// Typed access to the inbox table.
#[derive(Debug, Clone)]
pub struct InboxStore {
    db: Database,
    locks: AdvisoryLocks,
}

impl InboxStore {
    /// Wrap a database handle.
    #[must_use]
    pub fn new(db: Database, locks: AdvisoryLocks) -> Self {
        Self { db, locks }
    }

    /// Accept an envelope at most once per dedupe key.
    ///
    /// Derives the key, serializes same-key writers through the advisory
    /// lock, then checks-and-inserts. A pre-existing row wins: its
    /// `request_id` is returned with `duplicate = true` and the stored
    /// content (including any differing text) is preserved.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures; those are
    /// retryable for the caller.
    pub async fn insert_deduped(
        &self,
        env: &IngestEnvelope,
        triage: Option<&TriageDecision>,
    ) -> StorageResult<(InboxRow, bool)> {
        let (dedupe_key, strategy) = derive_dedupe_key(env);
        let _guard = self.locks.acquire(advisory_lock_key(&dedupe_key)).await;

        if let Some(existing) = self.find_by_dedupe_key(&dedupe_key).await? {
            return Ok((existing, true));
        }

        // A metadata-only triage action downgrades the processing tier;
        // nothing ever upgrades past what the envelope carried.
        let effective_tier = match triage.and_then(|t| t.action.ingestion_tier()) {
            Some(tier @ majordomo_core::IngestionTier::Metadata) => tier,
            _ => env.control.ingestion_tier,
        };

        let row = InboxRow {
            request_id: RequestId::new(),
            received_at: Utc::now(),
            channel: env.source.channel.as_str().to_owned(),
            provider: env.source.provider.as_str().to_owned(),
            endpoint_identity: env.source.endpoint_identity.clone(),
            external_event_id: env.event.external_event_id.clone(),
            external_thread_id: env.event.external_thread_id.clone(),
            sender_identity: env.sender.identity.clone(),
            normalized_text: env.payload.normalized_text.clone(),
            ingestion_tier: effective_tier.as_str().to_owned(),
            policy_tier: env.control.policy_tier.as_str().to_owned(),
            dedupe_key,
            dedupe_strategy: strategy.as_str().to_owned(),
            triage_decision: triage.map(|t| t.action.as_str().to_owned()),
            triage_target: triage.and_then(|t| t.target.clone()),
            triage_rule_id: triage.map(|t| t.rule_id.clone()),
        };

        let created: Option<InboxRow> = self
            .db
            .client()
            .create(TABLE)
            .content(row.clone())
            .await
            .map_err(StorageError::from)?;
        created
            .map(|r| (r, false))
            .ok_or_else(|| StorageError::Query("inbox insert returned no row".to_owned()))
    }

    /// Look a row up by its dedupe key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn find_by_dedupe_key(&self, dedupe_key: &str) -> StorageResult<Option<InboxRow>> {
        let mut response = self
            .db
            .client()
            .query(format!(
                "SELECT * FROM {TABLE} WHERE dedupe_key = $dedupe_key LIMIT 1"
            ))
            .bind(("dedupe_key", dedupe_key.to_owned()))
            .await?;
        let rows: Vec<InboxRow> = response
            .take(0)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(rows.into_iter().next())
    }

    /// Look a row up by its request id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn find_by_request_id(&self, id: RequestId) -> StorageResult<Option<InboxRow>> {
        let mut response = self
            .db
            .client()
            .query(format!(
                "SELECT * FROM {TABLE} WHERE request_id = $request_id LIMIT 1"
            ))
            .bind(("request_id", id))
            .await?;
        let rows: Vec<InboxRow> = response
            .take(0)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(rows.into_iter().next())
    }

    /// Total accepted rows (tests and rollups).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn count(&self) -> StorageResult<usize> {
        let mut response = self
            .db
            .client()
            .query(format!("SELECT * FROM {TABLE}"))
            .await?;
        let rows: Vec<InboxRow> = response
            .take(0)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(rows.len())
    }
}
