//! The heartbeat side-loop.
//!
//! Emits `connector.heartbeat.v1` on the clamped cadence. Submission
//! failures never crash or block the ingestion loop — they log and the
//! next beat tries again.

use std::time::Instant;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use majordomo_core::heartbeat::{
    HeartbeatCheckpoint, HeartbeatConnector, HeartbeatEnvelope, HeartbeatStatus,
    HEARTBEAT_SCHEMA_VERSION,
};
use majordomo_core::Eligibility;

use crate::runtime::ConnectorRuntime;

/// Run the heartbeat loop until shutdown.
pub async fn run_heartbeat(runtime: &ConnectorRuntime, mut shutdown_rx: watch::Receiver<bool>) {
    let interval = runtime.settings().heartbeat_interval();
    let started = Instant::now();
    let mut ticker = tokio::time::interval(interval);
    let health = runtime.health();
    info!(interval_s = interval.as_secs(), "heartbeat loop started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let envelope = build_envelope(runtime, &health, started).await;
                match runtime.client().heartbeat(envelope).await {
                    Ok(ack) => {
                        debug!(eligibility = %ack.eligibility, "heartbeat acked");
                        if ack.eligibility == Eligibility::Quarantined {
                            warn!("registry reports this connector quarantined");
                        }
                    },
                    Err(e) => {
                        // Never fatal; the read loop keeps going.
                        warn!(error = %e, "heartbeat submission failed");
                    },
                }
            }
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    info!("heartbeat loop shutting down");
                    break;
                }
            }
        }
    }
}

async fn build_envelope(
    runtime: &ConnectorRuntime,
    health: &watch::Receiver<(majordomo_core::heartbeat::ConnectorHealth, Option<String>)>,
    started: Instant,
) -> HeartbeatEnvelope {
    let settings = runtime.settings();
    let (state, error_message) = health.borrow().clone();
    let checkpoint = runtime
        .checkpoint()
        .load()
        .await
        .ok()
        .flatten()
        .map(|cp| HeartbeatCheckpoint {
            cursor: cp.cursor,
            updated_at: cp.updated_at,
        });

    HeartbeatEnvelope {
        schema_version: HEARTBEAT_SCHEMA_VERSION.to_owned(),
        connector: HeartbeatConnector {
            connector_type: settings.connector_type.clone(),
            endpoint_identity: settings.endpoint_identity.clone(),
            instance_id: runtime.instance_id(),
            version: settings.version.clone(),
        },
        status: HeartbeatStatus {
            state,
            error_message,
            uptime_s: started.elapsed().as_secs(),
        },
        counters: runtime.counters().snapshot(),
        checkpoint,
        capabilities: std::collections::HashMap::from([("backfill".to_owned(), true)]),
        sent_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointFile;
    use crate::rpc::SwitchboardClient;
    use crate::runtime::ConnectorSettings;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn envelope_carries_counters_and_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = CheckpointFile::new(dir.path().join("cursor.json"));
        checkpoint.save("offset:7").await.unwrap();

        let runtime = ConnectorRuntime::new(
            ConnectorSettings::new("telegram", "telegram:bot:b1"),
            Arc::new(SwitchboardClient::new(
                "ws://127.0.0.1:1",
                Duration::from_millis(100),
            )),
            checkpoint,
        );
        runtime
            .counters()
            .ingested
            .fetch_add(4, std::sync::atomic::Ordering::Relaxed);

        let envelope = build_envelope(&runtime, &runtime.health(), Instant::now()).await;
        assert_eq!(envelope.schema_version, HEARTBEAT_SCHEMA_VERSION);
        assert_eq!(envelope.connector.connector_type, "telegram");
        assert_eq!(envelope.counters["ingested"], 4);
        assert_eq!(envelope.checkpoint.unwrap().cursor, "offset:7");
        assert!(envelope.capabilities["backfill"]);
    }
}
