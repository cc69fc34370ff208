//! Connector registry: self-registration from heartbeats, liveness and
//! eligibility state, and the audit trail of eligibility transitions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use majordomo_core::heartbeat::{derive_liveness, Eligibility, HeartbeatEnvelope, Liveness};
use majordomo_core::ConnectorKey;

use crate::db::Database;
use crate::error::{StorageError, StorageResult};

const TABLE: &str = "connector_registry";
const AUDIT_TABLE: &str = "eligibility_audit";

/// One registered connector endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorRecord {
    /// Connector implementation type.
    pub connector_type: String,
    /// Endpoint the connector bridges.
    pub endpoint_identity: String,
    /// Instance id from the last heartbeat; changes on restart.
    pub instance_id: Uuid,
    /// Connector build version, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Heartbeat-recency classification at last update.
    pub liveness: Liveness,
    /// Whether the registry hands this connector work.
    pub eligibility: Eligibility,
    /// Last heartbeat received.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// First heartbeat ever received.
    pub first_seen_at: DateTime<Utc>,
    /// Last reported checkpoint cursor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// How far backfill has progressed, when the connector runs one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backfill_cursor: Option<String>,
    /// Accumulated counter totals across restarts.
    #[serde(default)]
    pub counters: HashMap<String, u64>,
    /// Raw counter snapshot from the last heartbeat, for delta computation.
    #[serde(default)]
    pub counter_snapshot: HashMap<String, u64>,
}

impl ConnectorRecord {
    fn record_key(&self) -> String {
        registry_row_id(&self.connector_type, &self.endpoint_identity)
    }
}

fn registry_row_id(connector_type: &str, endpoint_identity: &str) -> String {
    format!("{connector_type}\u{1f}{endpoint_identity}")
}

/// One audited eligibility transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilityAudit {
    /// Audit row id.
    pub id: Uuid,
    /// Connector type.
    pub connector_type: String,
    /// Endpoint identity.
    pub endpoint_identity: String,
    /// State before the transition.
    pub previous: Eligibility,
    /// State after.
    pub next: Eligibility,
    /// Why the transition happened.
    pub reason: String,
    /// When it happened.
    pub changed_at: DateTime<Utc>,
}

/// Typed access to the connector registry.
#[derive(Debug, Clone)]
pub struct ConnectorRegistryStore {
    db: Database,
}

impl ConnectorRegistryStore {
    /// Wrap a database handle.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Apply one heartbeat: self-register unknown connectors, fold counter
    /// deltas, refresh liveness, and move `stale → active` when recency
    /// allows. Quarantine is never left here — that takes operator action.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn apply_heartbeat(
        &self,
        hb: &HeartbeatEnvelope,
        now: DateTime<Utc>,
    ) -> StorageResult<ConnectorRecord> {
        let key = hb.key();
        let mut record = match self.get(&key).await? {
            Some(existing) => existing,
            None => {
                info!(connector = %key, "self-registering connector from heartbeat");
                ConnectorRecord {
                    connector_type: key.connector_type.clone(),
                    endpoint_identity: key.endpoint_identity.clone(),
                    instance_id: hb.connector.instance_id,
                    version: hb.connector.version.clone(),
                    liveness: Liveness::Online,
                    eligibility: Eligibility::Active,
                    last_heartbeat_at: None,
                    first_seen_at: now,
                    cursor: None,
                    backfill_cursor: None,
                    counters: HashMap::new(),
                    counter_snapshot: HashMap::new(),
                }
            },
        };

        // Deltas against the last snapshot when the same process is still
        // running; against zero after a restart.
        let restarted = record.instance_id != hb.connector.instance_id;
        for (name, value) in &hb.counters {
            let baseline = if restarted {
                0
            } else {
                record.counter_snapshot.get(name).copied().unwrap_or(0)
            };
            let delta = value.saturating_sub(baseline);
            *record.counters.entry(name.clone()).or_insert(0) += delta;
        }
        record.counter_snapshot = hb.counters.clone();
        record.instance_id = hb.connector.instance_id;
        record.version = hb.connector.version.clone();
        record.last_heartbeat_at = Some(hb.sent_at);
        record.liveness = derive_liveness(Some(hb.sent_at), now);
        if let Some(cp) = &hb.checkpoint {
            record.cursor = Some(cp.cursor.clone());
        }

        if record.eligibility == Eligibility::Stale {
            record = self
                .transition(record, Eligibility::Active, "heartbeat received", now)
                .await?;
        }

        self.put(&record).await?;
        Ok(record)
    }

    /// Refresh liveness/eligibility from the clock alone (no heartbeat).
    /// Used by the periodic registry sweep; `active → stale` happens here.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn sweep(&self, now: DateTime<Utc>) -> StorageResult<Vec<ConnectorRecord>> {
        let mut swept = Vec::new();
        for mut record in self.list().await? {
            record.liveness = derive_liveness(record.last_heartbeat_at, now);
            if record.eligibility == Eligibility::Active && record.liveness != Liveness::Online {
                record = self
                    .transition(record, Eligibility::Stale, "heartbeat ttl expired", now)
                    .await?;
            }
            self.put(&record).await?;
            swept.push(record);
        }
        Ok(swept)
    }

    /// Operator action: pull a connector out of rotation.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown connectors.
    pub async fn quarantine(&self, key: &ConnectorKey, reason: &str) -> StorageResult<ConnectorRecord> {
        let record = self
            .get(key)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("connector {key}")))?;
        let record = self
            .transition(record, Eligibility::Quarantined, reason, Utc::now())
            .await?;
        self.put(&record).await?;
        Ok(record)
    }

    /// Operator action: return a quarantined connector to rotation.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown connectors.
    pub async fn reactivate(&self, key: &ConnectorKey, reason: &str) -> StorageResult<ConnectorRecord> {
        let record = self
            .get(key)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("connector {key}")))?;
        let record = self
            .transition(record, Eligibility::Active, reason, Utc::now())
            .await?;
        self.put(&record).await?;
        Ok(record)
    }

    /// Record backfill progress for a connector.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown connectors.
    pub async fn set_backfill_cursor(
        &self,
        key: &ConnectorKey,
        cursor: &str,
    ) -> StorageResult<()> {
        let mut record = self
            .get(key)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("connector {key}")))?;
        record.backfill_cursor = Some(cursor.to_owned());
        self.put(&record).await
    }

    /// Look a connector up.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn get(&self, key: &ConnectorKey) -> StorageResult<Option<ConnectorRecord>> {
        let record: Option<ConnectorRecord> = self
            .db
            .client()
            .select((TABLE, registry_row_id(&key.connector_type, &key.endpoint_identity)))
            .await
            .map_err(StorageError::from)?;
        Ok(record)
    }

    /// All registered connectors.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn list(&self) -> StorageResult<Vec<ConnectorRecord>> {
        let mut records: Vec<ConnectorRecord> = self
            .db
            .client()
            .select(TABLE)
            .await
            .map_err(StorageError::from)?;
        records.sort_by(|a, b| {
            (a.connector_type.as_str(), a.endpoint_identity.as_str())
                .cmp(&(b.connector_type.as_str(), b.endpoint_identity.as_str()))
        });
        Ok(records)
    }

    /// Audit rows for one connector, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn audit_trail(&self, key: &ConnectorKey) -> StorageResult<Vec<EligibilityAudit>> {
        let mut response = self
            .db
            .client()
            .query(format!(
                "SELECT * FROM {AUDIT_TABLE}
                 WHERE connector_type = $ct AND endpoint_identity = $ei"
            ))
            .bind(("ct", key.connector_type.clone()))
            .bind(("ei", key.endpoint_identity.clone()))
            .await?;
        let mut rows: Vec<EligibilityAudit> = response
            .take(0)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        rows.sort_by_key(|r| r.changed_at);
        Ok(rows)
    }

    async fn transition(
        &self,
        mut record: ConnectorRecord,
        next: Eligibility,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<ConnectorRecord> {
        if record.eligibility == next {
            return Ok(record);
        }
        let audit = EligibilityAudit {
            id: Uuid::new_v4(),
            connector_type: record.connector_type.clone(),
            endpoint_identity: record.endpoint_identity.clone(),
            previous: record.eligibility,
            next,
            reason: reason.to_owned(),
            changed_at: now,
        };
        info!(
            connector = %ConnectorKey::new(&record.connector_type, &record.endpoint_identity),
            previous = %audit.previous,
            next = %audit.next,
            reason,
            "connector eligibility transition"
        );
        let _created: Option<EligibilityAudit> = self
            .db
            .client()
            .create(AUDIT_TABLE)
            .content(audit)
            .await
            .map_err(StorageError::from)?;
        record.eligibility = next;
        Ok(record)
    }

    async fn put(&self, record: &ConnectorRecord) -> StorageResult<()> {
        let _stored: Option<ConnectorRecord> = self
            .db
            .client()
            .upsert((TABLE, record.record_key()))
            .content(record.clone())
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }
}
