//! Scheduler semantics driven through a real butler's tool surface.

use chrono::{Duration as ChronoDuration, Utc};
use majordomo_butler::{ButlerDaemon, JobRegistry};
use majordomo_integration_tests::{mem_butler_config, CALL_TIMEOUT};
use majordomo_mcp::McpClient;
use majordomo_session::{SessionLauncher, SpawnOutcome};
use majordomo_storage::QueuedSession;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct CountingLauncher(Arc<AtomicUsize>);

#[async_trait::async_trait]
impl SessionLauncher for CountingLauncher {
    async fn launch(&self, _s: &QueuedSession, _p: &str) -> SpawnOutcome {
        self.0.fetch_add(1, Ordering::SeqCst);
        SpawnOutcome::ok(None)
    }
}

async fn start(counter: Arc<AtomicUsize>) -> (ButlerDaemon, McpClient) {
    let daemon = ButlerDaemon::start(
        &mem_butler_config("memoryline"),
        Vec::new(),
        JobRegistry::new(),
        Some(Arc::new(CountingLauncher(counter))),
        None,
    )
    .await
    .unwrap();
    let client = McpClient::new(daemon.endpoint_url(), CALL_TIMEOUT);
    (daemon, client)
}

#[tokio::test]
async fn expired_one_shot_disables_without_dispatching() {
    let sessions = Arc::new(AtomicUsize::new(0));
    let (daemon, client) = start(Arc::clone(&sessions)).await;

    // Due two days ago, expired one day ago: the system was "down" past
    // the expiry window.
    let due_at = (Utc::now() - ChronoDuration::days(2)).to_rfc3339();
    let until_at = (Utc::now() - ChronoDuration::days(1)).to_rfc3339();
    client
        .call_tool(
            "schedule.create",
            serde_json::json!({
                "name": "review-abc123-rep3",
                "spec": due_at,
                "dispatch_mode": "prompt",
                "prompt": "Run spaced repetition review 3",
                "until_at": until_at,
            }),
        )
        .await
        .unwrap();

    let ticked = client
        .call_tool("tick", serde_json::json!({}))
        .await
        .unwrap();
    let structured = ticked.structured.unwrap();
    assert_eq!(structured["expired"], 1);
    assert_eq!(structured["fired"], 0);

    let listed = client
        .call_tool("schedule.list", serde_json::json!({}))
        .await
        .unwrap();
    let task = &listed.structured.unwrap()["tasks"][0];
    assert_eq!(task["enabled"], false);
    assert!(task["next_run_at"].is_null());
    assert!(task["last_run_at"].is_null(), "expired tasks never fire");
    assert_eq!(sessions.load(Ordering::SeqCst), 0);

    daemon.shutdown().await;
}

#[tokio::test]
async fn live_one_shot_fires_exactly_once() {
    let sessions = Arc::new(AtomicUsize::new(0));
    let (daemon, client) = start(Arc::clone(&sessions)).await;

    let due_at = (Utc::now() - ChronoDuration::minutes(1)).to_rfc3339();
    client
        .call_tool(
            "schedule.create",
            serde_json::json!({
                "name": "one-shot",
                "spec": due_at,
                "dispatch_mode": "prompt",
                "prompt": "Do it once",
            }),
        )
        .await
        .unwrap();

    let first = client.call_tool("tick", serde_json::json!({})).await.unwrap();
    assert_eq!(first.structured.unwrap()["fired"], 1);

    // Re-evaluation never double-fires.
    let second = client.call_tool("tick", serde_json::json!({})).await.unwrap();
    assert_eq!(second.structured.unwrap()["fired"], 0);

    daemon.shutdown().await;
}

#[tokio::test]
async fn create_delete_leaves_no_residual_schedule() {
    let sessions = Arc::new(AtomicUsize::new(0));
    let (daemon, client) = start(sessions).await;

    client
        .call_tool(
            "schedule.create",
            serde_json::json!({
                "name": "transient",
                "spec": "0 7 * * *",
                "dispatch_mode": "prompt",
                "prompt": "morning",
            }),
        )
        .await
        .unwrap();
    client
        .call_tool("schedule.delete", serde_json::json!({"name": "transient"}))
        .await
        .unwrap();

    let listed = client
        .call_tool("schedule.list", serde_json::json!({}))
        .await
        .unwrap();
    assert!(
        listed.structured.unwrap()["tasks"]
            .as_array()
            .unwrap()
            .is_empty()
    );

    // The name is free again.
    client
        .call_tool(
            "schedule.create",
            serde_json::json!({
                "name": "transient",
                "spec": "0 8 * * *",
                "dispatch_mode": "prompt",
                "prompt": "later morning",
            }),
        )
        .await
        .unwrap();

    daemon.shutdown().await;
}
