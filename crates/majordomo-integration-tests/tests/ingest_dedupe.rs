//! Duplicate submission and connector replay over the real ingress RPC.

use std::sync::Arc;
use std::time::Duration;

use majordomo_connector::{
    ChannelSource, CheckpointFile, ConnectorRuntime, ConnectorSettings, SourceItem,
    SwitchboardClient,
};
use majordomo_core::{Channel, IngestEnvelope, Provider};
use majordomo_integration_tests::{mem_switchboard_config, ScriptedClassifier};
use majordomo_storage::{AdvisoryLocks, InboxStore, RoutingStore};
use majordomo_switchboard::SwitchboardDaemon;

fn telegram_envelope(event_id: &str, text: &str) -> IngestEnvelope {
    IngestEnvelope::builder(Channel::Telegram, Provider::Telegram, "telegram:bot:b1")
        .external_event_id(event_id)
        .sender("user:77")
        .raw(serde_json::json!({"message_id": 42}))
        .normalized_text(text)
        .build()
}

async fn start_switchboard() -> (SwitchboardDaemon, SwitchboardClient) {
    let classifier = ScriptedClassifier::new(Vec::new());
    let daemon = SwitchboardDaemon::start(
        &mem_switchboard_config(),
        None,
        Some(classifier.clone()),
        None,
    )
    .await
    .unwrap();
    classifier.connect(daemon.tool_endpoint());
    let client = SwitchboardClient::new(daemon.ingress_endpoint(), Duration::from_secs(10));
    (daemon, client)
}

#[tokio::test]
async fn duplicate_submission_returns_original_request_id() {
    let (daemon, client) = start_switchboard().await;

    let first = client
        .ingest(telegram_envelope("42", "Log my weight 75 kg"))
        .await
        .unwrap();
    assert!(!first.duplicate);

    let second = client
        .ingest(telegram_envelope("42", "Log my weight 75 kg"))
        .await
        .unwrap();
    assert!(second.duplicate);
    assert_eq!(first.request_id, second.request_id);

    // One inbox row, and no second classification was recorded.
    let inbox = InboxStore::new(daemon.database().clone(), AdvisoryLocks::new());
    assert_eq!(inbox.count().await.unwrap(), 1);
    let routing = RoutingStore::new(daemon.database().clone());
    let entries = routing.list_by_request(first.request_id).await.unwrap();
    assert!(entries.len() <= 1, "duplicate must not route again");

    daemon.shutdown().await;
}

#[tokio::test]
async fn invalid_envelope_is_rejected_terminally() {
    let (daemon, client) = start_switchboard().await;

    let mut env = telegram_envelope("43", "hello");
    env.payload.raw = None; // full tier requires raw
    let err = client.ingest(env).await.unwrap_err();
    assert!(!err.is_retryable(), "validation failures must not be retried");

    daemon.shutdown().await;
}

#[tokio::test]
async fn backfill_round_reports_progress_without_touching_the_live_cursor() {
    use majordomo_core::heartbeat::{
        ConnectorHealth, HeartbeatConnector, HeartbeatEnvelope, HeartbeatStatus,
        HEARTBEAT_SCHEMA_VERSION,
    };

    let (daemon, client) = start_switchboard().await;
    let client = Arc::new(client);

    // A heartbeat self-registers the connector; only then is backfill
    // work granted.
    let heartbeat = HeartbeatEnvelope {
        schema_version: HEARTBEAT_SCHEMA_VERSION.to_owned(),
        connector: HeartbeatConnector {
            connector_type: "telegram".to_owned(),
            endpoint_identity: "telegram:bot:b1".to_owned(),
            instance_id: uuid::Uuid::new_v4(),
            version: None,
        },
        status: HeartbeatStatus {
            state: ConnectorHealth::Healthy,
            error_message: None,
            uptime_s: 1,
        },
        counters: std::collections::HashMap::new(),
        checkpoint: None,
        capabilities: std::collections::HashMap::new(),
        sent_at: chrono::Utc::now(),
    };
    client.heartbeat(heartbeat).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let runtime = ConnectorRuntime::new(
        ConnectorSettings::new("telegram", "telegram:bot:b1"),
        Arc::clone(&client),
        CheckpointFile::new(dir.path().join("cursor.json")),
    );

    let (feed, mut source) = ChannelSource::new(8);
    for n in 0..3 {
        feed.send(SourceItem {
            envelope: telegram_envelope(&format!("old-{n}"), &format!("historic message {n}")),
            cursor: format!("backfill:{n}"),
        })
        .await
        .unwrap();
    }

    let submitted = runtime.run_backfill_once(&mut source).await.unwrap();
    assert_eq!(submitted, 3);

    // Progress landed server-side; the live checkpoint never moved.
    let record = daemon
        .connectors()
        .get(&majordomo_core::ConnectorKey::new(
            "telegram",
            "telegram:bot:b1",
        ))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.backfill_cursor.as_deref(), Some("backfill:2"));
    assert!(runtime.checkpoint().load().await.unwrap().is_none());

    let inbox = InboxStore::new(daemon.database().clone(), AdvisoryLocks::new());
    assert_eq!(inbox.count().await.unwrap(), 3);

    daemon.shutdown().await;
}

#[tokio::test]
async fn replayed_batch_after_lost_checkpoint_is_harmless() {
    let (daemon, client) = start_switchboard().await;
    let client = Arc::new(client);

    let dir = tempfile::tempdir().unwrap();
    let item = SourceItem {
        envelope: telegram_envelope("99", "Remind me to water the plants"),
        cursor: "offset:99".to_owned(),
    };

    // First connector process: submits and checkpoints.
    let runtime = ConnectorRuntime::new(
        ConnectorSettings::new("telegram", "telegram:bot:b1"),
        Arc::clone(&client),
        CheckpointFile::new(dir.path().join("cursor.json")),
    );
    runtime.submit_batch(vec![item.clone()], false).await.unwrap();
    assert_eq!(
        runtime.checkpoint().load().await.unwrap().unwrap().cursor,
        "offset:99"
    );

    // Crash before the checkpoint landed: wipe it and replay from a
    // fresh process.
    std::fs::remove_file(dir.path().join("cursor.json")).unwrap();
    let restarted = ConnectorRuntime::new(
        ConnectorSettings::new("telegram", "telegram:bot:b1"),
        Arc::clone(&client),
        CheckpointFile::new(dir.path().join("cursor.json")),
    );
    restarted.submit_batch(vec![item], false).await.unwrap();

    // The replay deduplicated and the cursor advanced again.
    assert_eq!(
        restarted.checkpoint().load().await.unwrap().unwrap().cursor,
        "offset:99"
    );
    assert_eq!(
        restarted
            .counters()
            .duplicates
            .load(std::sync::atomic::Ordering::Relaxed),
        1
    );
    let inbox = InboxStore::new(daemon.database().clone(), AdvisoryLocks::new());
    assert_eq!(inbox.count().await.unwrap(), 1);

    daemon.shutdown().await;
}
