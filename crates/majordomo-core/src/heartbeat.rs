//! Connector heartbeat envelope (`connector.heartbeat.v1`) and the
//! liveness/eligibility states the registry derives from it.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The stable schema version of the heartbeat contract.
pub const HEARTBEAT_SCHEMA_VERSION: &str = "connector.heartbeat.v1";

/// Lower clamp of the heartbeat interval, in seconds.
pub const MIN_HEARTBEAT_INTERVAL_S: u64 = 30;
/// Upper clamp of the heartbeat interval, in seconds.
pub const MAX_HEARTBEAT_INTERVAL_S: u64 = 300;
/// Default heartbeat interval, in seconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_S: u64 = 120;

/// Heartbeat age below which a connector counts as online, in seconds.
pub const ONLINE_THRESHOLD_S: i64 = 300;
/// Heartbeat age below which a connector counts as stale, in seconds.
pub const STALE_THRESHOLD_S: i64 = 900;

/// Clamp a configured heartbeat interval into the accepted band.
///
/// The connector clamps silently; the server accepts whatever arrives.
#[must_use]
pub fn clamp_heartbeat_interval(interval_s: u64) -> u64 {
    interval_s.clamp(MIN_HEARTBEAT_INTERVAL_S, MAX_HEARTBEAT_INTERVAL_S)
}

// ---------------------------------------------------------------------------
// ConnectorKey
// ---------------------------------------------------------------------------

/// Registry key of a connector: what it is plus which endpoint it serves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectorKey {
    /// Connector implementation type (`telegram`, `gmail`, …).
    pub connector_type: String,
    /// Stable identity of the endpoint the connector bridges.
    pub endpoint_identity: String,
}

impl ConnectorKey {
    /// Build a key.
    #[must_use]
    pub fn new(connector_type: impl Into<String>, endpoint_identity: impl Into<String>) -> Self {
        Self {
            connector_type: connector_type.into(),
            endpoint_identity: endpoint_identity.into(),
        }
    }
}

impl fmt::Display for ConnectorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.connector_type, self.endpoint_identity)
    }
}

// ---------------------------------------------------------------------------
// Heartbeat envelope
// ---------------------------------------------------------------------------

/// Reported health of the connector process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorHealth {
    /// Reading and submitting normally.
    Healthy,
    /// Still up, but something persistent is wrong.
    Degraded,
    /// The read loop is down.
    Error,
}

/// Status block of a heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatStatus {
    /// Current health.
    pub state: ConnectorHealth,
    /// Detail when degraded or errored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Seconds since the connector process started.
    pub uptime_s: u64,
}

/// Durable-progress block of a heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatCheckpoint {
    /// Opaque source cursor the connector has safely persisted.
    pub cursor: String,
    /// When the cursor was last advanced.
    pub updated_at: DateTime<Utc>,
}

/// Periodic liveness + counters record from a connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatEnvelope {
    /// Always [`HEARTBEAT_SCHEMA_VERSION`].
    pub schema_version: String,
    /// Which connector this is.
    pub connector: HeartbeatConnector,
    /// Health report.
    pub status: HeartbeatStatus,
    /// Monotone counters since process start.
    #[serde(default)]
    pub counters: HashMap<String, u64>,
    /// Durable progress, when the connector checkpoints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<HeartbeatCheckpoint>,
    /// Feature flags the connector supports.
    #[serde(default)]
    pub capabilities: HashMap<String, bool>,
    /// When the connector emitted this heartbeat.
    pub sent_at: DateTime<Utc>,
}

/// Identity block of a heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatConnector {
    /// Connector implementation type.
    pub connector_type: String,
    /// Endpoint the connector bridges.
    pub endpoint_identity: String,
    /// Stable per-process-lifetime id; a change means the process restarted.
    pub instance_id: Uuid,
    /// Connector build version, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl HeartbeatEnvelope {
    /// The registry key this heartbeat belongs to.
    #[must_use]
    pub fn key(&self) -> ConnectorKey {
        ConnectorKey::new(
            self.connector.connector_type.clone(),
            self.connector.endpoint_identity.clone(),
        )
    }
}

// ---------------------------------------------------------------------------
// Liveness / Eligibility
// ---------------------------------------------------------------------------

/// Heartbeat-recency classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    /// Heartbeat within the online window.
    Online,
    /// Heartbeat within the stale window.
    Stale,
    /// No recent heartbeat, or none ever.
    Offline,
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => f.write_str("online"),
            Self::Stale => f.write_str("stale"),
            Self::Offline => f.write_str("offline"),
        }
    }
}

/// Whether the registry will hand work to the connector.
///
/// Quarantine takes precedence over heartbeat recency; leaving quarantine
/// requires explicit operator action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Eligibility {
    /// Heartbeat within TTL and not quarantined.
    Active,
    /// Heartbeat outside TTL.
    Stale,
    /// Operator pulled the connector out of rotation.
    Quarantined,
}

impl fmt::Display for Eligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Stale => f.write_str("stale"),
            Self::Quarantined => f.write_str("quarantined"),
        }
    }
}

/// Derive liveness from the last heartbeat time.
#[must_use]
pub fn derive_liveness(last_heartbeat_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Liveness {
    let Some(last) = last_heartbeat_at else {
        return Liveness::Offline;
    };
    let age = (now - last).num_seconds();
    if age < ONLINE_THRESHOLD_S {
        Liveness::Online
    } else if age < STALE_THRESHOLD_S {
        Liveness::Stale
    } else {
        Liveness::Offline
    }
}
