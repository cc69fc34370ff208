//! Counter and fanout rollups.
//!
//! Periodic jobs snapshot connector counter totals into hourly/daily
//! tables and aggregate routing-log fanout counts per
//! `(channel, endpoint, target butler)`.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::connectors::ConnectorRegistryStore;
use crate::db::Database;
use crate::error::{StorageError, StorageResult};
use crate::routing::RoutingStore;

const HOURLY_TABLE: &str = "connector_stats_hourly";
const DAILY_TABLE: &str = "connector_stats_daily";
const FANOUT_TABLE: &str = "fanout_stats";

/// One counter snapshot row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterStat {
    /// Row id.
    pub id: Uuid,
    /// Bucket label (`2026030514` hourly, `20260305` daily).
    pub bucket: String,
    /// Connector type.
    pub connector_type: String,
    /// Endpoint identity.
    pub endpoint_identity: String,
    /// Counter totals at snapshot time.
    pub counters: HashMap<String, u64>,
    /// When the snapshot ran.
    pub created_at: DateTime<Utc>,
}

/// One fanout aggregate row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanoutStat {
    /// Row id.
    pub id: Uuid,
    /// Bucket label.
    pub bucket: String,
    /// Source channel.
    pub source_channel: String,
    /// Endpoint identity.
    pub endpoint_identity: String,
    /// Target butler.
    pub target_butler: String,
    /// Routed count in the bucket.
    pub count: u64,
    /// When the aggregate ran.
    pub created_at: DateTime<Utc>,
}

/// Rollup jobs over the switchboard database.
#[derive(Debug, Clone)]
pub struct StatsStore {
    db: Database,
}

impl StatsStore {
    /// Wrap a database handle.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Hour bucket label for an instant.
    #[must_use]
    pub fn hour_bucket(at: DateTime<Utc>) -> String {
        format!(
            "{:04}{:02}{:02}{:02}",
            at.year(),
            at.month(),
            at.day(),
            at.hour()
        )
    }

    /// Day bucket label for an instant.
    #[must_use]
    pub fn day_bucket(at: DateTime<Utc>) -> String {
        format!("{:04}{:02}{:02}", at.year(), at.month(), at.day())
    }

    /// Snapshot every connector's counter totals into the hourly table.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn rollup_hourly(
        &self,
        connectors: &ConnectorRegistryStore,
        now: DateTime<Utc>,
    ) -> StorageResult<usize> {
        self.rollup_counters(connectors, HOURLY_TABLE, &Self::hour_bucket(now), now)
            .await
    }

    /// Snapshot every connector's counter totals into the daily table.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn rollup_daily(
        &self,
        connectors: &ConnectorRegistryStore,
        now: DateTime<Utc>,
    ) -> StorageResult<usize> {
        self.rollup_counters(connectors, DAILY_TABLE, &Self::day_bucket(now), now)
            .await
    }

    async fn rollup_counters(
        &self,
        connectors: &ConnectorRegistryStore,
        table: &str,
        bucket: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<usize> {
        let records = connectors.list().await?;
        let mut written = 0;
        for record in records {
            let row = CounterStat {
                id: Uuid::new_v4(),
                bucket: bucket.to_owned(),
                connector_type: record.connector_type.clone(),
                endpoint_identity: record.endpoint_identity.clone(),
                counters: record.counters.clone(),
                created_at: now,
            };
            let row_key = format!("{bucket}\u{1f}{}\u{1f}{}", row.connector_type, row.endpoint_identity);
            let _stored: Option<CounterStat> = self
                .db
                .client()
                .upsert((table, row_key))
                .content(row)
                .await
                .map_err(StorageError::from)?;
            written += 1;
        }
        Ok(written)
    }

    /// Aggregate routed counts from the routing log since `since` into the
    /// fanout table, keyed by `(channel, endpoint, target)`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on engine failures.
    pub async fn rollup_fanout(
        &self,
        routing: &RoutingStore,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<FanoutStat>> {
        let entries = routing.list_since(since).await?;
        let mut counts: HashMap<(String, String, String), u64> = HashMap::new();
        for entry in entries {
            let Some(target) = entry.routed_to else {
                continue;
            };
            *counts
                .entry((entry.source_channel, entry.endpoint_identity, target))
                .or_insert(0) += 1;
        }

        let bucket = Self::hour_bucket(now);
        let mut written = Vec::new();
        for ((channel, endpoint, target), count) in counts {
            let row = FanoutStat {
                id: Uuid::new_v4(),
                bucket: bucket.clone(),
                source_channel: channel,
                endpoint_identity: endpoint,
                target_butler: target,
                count,
                created_at: now,
            };
            let row_key = format!(
                "{bucket}\u{1f}{}\u{1f}{}\u{1f}{}",
                row.source_channel, row.endpoint_identity, row.target_butler
            );
            let stored: Option<FanoutStat> = self
                .db
                .client()
                .upsert((FANOUT_TABLE, row_key))
                .content(row.clone())
                .await
                .map_err(StorageError::from)?;
            written.push(stored.unwrap_or(row));
        }
        written.sort_by(|a, b| a.target_butler.cmp(&b.target_butler));
        Ok(written)
    }
}
