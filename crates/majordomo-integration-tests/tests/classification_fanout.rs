//! Classification, decomposition, and partial fan-out failure across
//! real daemons.

use std::time::Duration;

use majordomo_butler::{ButlerDaemon, JobRegistry};
use majordomo_connector::SwitchboardClient;
use majordomo_core::{Channel, IngestEnvelope, Provider};
use majordomo_integration_tests::{
    eventually, mem_butler_config, mem_switchboard_config, ReplyingButler, ScriptedClassifier,
    ScriptedRoute,
};
use majordomo_storage::{NotificationStore, RoutingStore, SessionStore};
use majordomo_switchboard::SwitchboardDaemon;

fn telegram_envelope(event_id: &str, text: &str) -> IngestEnvelope {
    IngestEnvelope::builder(Channel::Telegram, Provider::Telegram, "telegram:bot:b1")
        .external_event_id(event_id)
        .sender("user:77")
        .raw(serde_json::json!({"message_id": 1}))
        .normalized_text(text)
        .build()
}

async fn start_butler(name: &str) -> ButlerDaemon {
    let launcher = ReplyingButler::new();
    let daemon = ButlerDaemon::start(
        &mem_butler_config(name),
        Vec::new(),
        JobRegistry::new(),
        Some(launcher.clone()),
        None,
    )
    .await
    .unwrap();
    launcher.connect(daemon.endpoint_url());
    daemon
}

#[tokio::test]
async fn single_target_classification_replies_from_the_butler() {
    let health = start_butler("health").await;

    let classifier = ScriptedClassifier::new(vec![ScriptedRoute {
        butler: "health".to_owned(),
        prompt: "Log my weight 75 kg".to_owned(),
    }]);
    let switchboard = SwitchboardDaemon::start(
        &mem_switchboard_config(),
        None,
        Some(classifier.clone()),
        None,
    )
    .await
    .unwrap();
    classifier.connect(switchboard.tool_endpoint());
    switchboard
        .registry()
        .upsert_from_config("health", &health.endpoint_url(), "Health tracking", &[])
        .await
        .unwrap();

    let ingress = SwitchboardClient::new(switchboard.ingress_endpoint(), Duration::from_secs(10));
    let accepted = ingress
        .ingest(telegram_envelope("42", "Log my weight 75 kg"))
        .await
        .unwrap();
    assert!(!accepted.duplicate);

    // One routing entry, no group (single target).
    let routing = RoutingStore::new(switchboard.database().clone());
    let entries = eventually(|| async {
        let entries = routing.list_by_request(accepted.request_id).await.unwrap();
        (!entries.is_empty()).then_some(entries)
    })
    .await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].routed_to.as_deref(), Some("health"));
    assert!(entries[0].group_id.is_none());
    assert!(entries[0].success);

    // One session ran on health, and it replied on the originating
    // channel with the request context attached.
    let health_sessions = SessionStore::new(health.database().clone());
    let session = eventually(|| async {
        health_sessions
            .list_recent(8)
            .await
            .unwrap()
            .into_iter()
            .find(|s| s.completed_at.is_some())
    })
    .await;
    assert_eq!(session.trigger_source, "ingress");
    assert_eq!(session.request_id, Some(accepted.request_id));

    let health_notifications = NotificationStore::new(health.database().clone());
    let replies = eventually(|| async {
        let replies = health_notifications
            .list_by_request(accepted.request_id)
            .await
            .unwrap();
        (!replies.is_empty()).then_some(replies)
    })
    .await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].intent, "reply");
    assert_eq!(replies[0].channel, "telegram");
    assert_eq!(replies[0].recipient, "user:77");

    switchboard.shutdown().await;
    health.shutdown().await;
}

#[tokio::test]
async fn decomposed_message_shares_a_group_and_aggregates_one_reply() {
    let relationship = start_butler("relationship").await;
    let health = start_butler("health").await;

    let classifier = ScriptedClassifier::new(vec![
        ScriptedRoute {
            butler: "relationship".to_owned(),
            prompt: "Remind me to call Mom on Tuesday".to_owned(),
        },
        ScriptedRoute {
            butler: "health".to_owned(),
            prompt: "Log my weight 75 kg".to_owned(),
        },
    ]);
    let switchboard = SwitchboardDaemon::start(
        &mem_switchboard_config(),
        None,
        Some(classifier.clone()),
        None,
    )
    .await
    .unwrap();
    classifier.connect(switchboard.tool_endpoint());
    for (name, endpoint) in [
        ("relationship", relationship.endpoint_url()),
        ("health", health.endpoint_url()),
    ] {
        switchboard
            .registry()
            .upsert_from_config(name, &endpoint, "", &[])
            .await
            .unwrap();
    }

    let ingress = SwitchboardClient::new(switchboard.ingress_endpoint(), Duration::from_secs(10));
    let accepted = ingress
        .ingest(telegram_envelope(
            "7",
            "Remind me to call Mom on Tuesday and log my weight 75 kg",
        ))
        .await
        .unwrap();

    let routing = RoutingStore::new(switchboard.database().clone());
    let entries = eventually(|| async {
        let entries = routing.list_by_request(accepted.request_id).await.unwrap();
        (entries.len() >= 2).then_some(entries)
    })
    .await;
    assert_eq!(entries.len(), 2);
    let group = entries[0].group_id.expect("decomposed entries carry a group");
    assert!(entries.iter().all(|e| e.group_id == Some(group)));
    assert_eq!(entries[0].routed_to.as_deref(), Some("relationship"));
    assert_eq!(entries[1].routed_to.as_deref(), Some("health"));
    assert!(entries[0].created_at_ms <= entries[1].created_at_ms);

    // One aggregated reply from the switchboard attributing both parts.
    let sb_notifications = NotificationStore::new(switchboard.database().clone());
    let replies = eventually(|| async {
        let replies = sb_notifications
            .list_by_request(accepted.request_id)
            .await
            .unwrap();
        (!replies.is_empty()).then_some(replies)
    })
    .await;
    assert_eq!(replies.len(), 1);
    assert!(replies[0].message.contains("relationship:"));
    assert!(replies[0].message.contains("health:"));

    switchboard.shutdown().await;
    relationship.shutdown().await;
    health.shutdown().await;
}

#[tokio::test]
async fn partial_fanout_failure_names_the_failed_butler() {
    let relationship = start_butler("relationship").await;

    let classifier = ScriptedClassifier::new(vec![
        ScriptedRoute {
            butler: "relationship".to_owned(),
            prompt: "Remind me to call Mom".to_owned(),
        },
        ScriptedRoute {
            butler: "health".to_owned(),
            prompt: "Log my weight 75 kg".to_owned(),
        },
    ]);
    let switchboard = SwitchboardDaemon::start(
        &mem_switchboard_config(),
        None,
        Some(classifier.clone()),
        None,
    )
    .await
    .unwrap();
    classifier.connect(switchboard.tool_endpoint());
    switchboard
        .registry()
        .upsert_from_config("relationship", &relationship.endpoint_url(), "", &[])
        .await
        .unwrap();
    // Health is registered but nothing is listening there.
    switchboard
        .registry()
        .upsert_from_config("health", "ws://127.0.0.1:1", "", &[])
        .await
        .unwrap();

    let ingress = SwitchboardClient::new(switchboard.ingress_endpoint(), Duration::from_secs(10));
    let accepted = ingress
        .ingest(telegram_envelope("8", "Remind me to call Mom and log my weight"))
        .await
        .unwrap();

    let routing = RoutingStore::new(switchboard.database().clone());
    let entries = eventually(|| async {
        let entries = routing.list_by_request(accepted.request_id).await.unwrap();
        (entries.len() >= 2).then_some(entries)
    })
    .await;
    assert_eq!(entries.len(), 2);
    let group = entries[0].group_id.expect("both entries share the group");
    assert!(entries.iter().all(|e| e.group_id == Some(group)));
    assert!(entries[0].success);
    assert!(!entries[1].success);
    // The failed dispatch must not count as liveness.
    let health_record = switchboard.registry().get("health").await.unwrap().unwrap();
    assert!(health_record.last_seen_at.is_none());

    let sb_notifications = NotificationStore::new(switchboard.database().clone());
    let replies = eventually(|| async {
        let replies = sb_notifications
            .list_by_request(accepted.request_id)
            .await
            .unwrap();
        (!replies.is_empty()).then_some(replies)
    })
    .await;
    assert!(replies[0].message.contains("health: failed"));
    assert!(replies[0].message.contains("relationship:"));

    switchboard.shutdown().await;
    relationship.shutdown().await;
}
