//! Shared harness for the end-to-end tests.
//!
//! Starts real daemons on ephemeral ports with in-memory databases, plus
//! scripted session launchers standing in for the LLM CLI: the scripted
//! classifier makes `route` calls against the switchboard's own tool
//! server exactly the way a real classification session would, and the
//! replying butler answers through its own `notify` tool.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;

use majordomo_config::ButlerConfig;
use majordomo_mcp::McpClient;
use majordomo_session::{SessionLauncher, SpawnOutcome};
use majordomo_storage::QueuedSession;

/// Tool-call timeout used across the harness.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// A butler config on port 0 with an in-memory database.
///
/// # Panics
///
/// Panics on malformed TOML (test fixture).
#[must_use]
pub fn mem_butler_config(name: &str) -> ButlerConfig {
    toml::from_str(&format!(
        r#"
        [butler]
        name = "{name}"
        port = 0
        description = "{name} butler"

        [database]
        path = "memory"
        "#
    ))
    .expect("fixture config parses")
}

/// A switchboard config on ephemeral ports with an in-memory database.
///
/// # Panics
///
/// Panics on malformed TOML (test fixture).
#[must_use]
pub fn mem_switchboard_config() -> ButlerConfig {
    toml::from_str(
        r#"
        [butler]
        name = "switchboard"
        port = 0
        description = "ingress"

        [database]
        path = "memory"

        [switchboard]
        ingress_port = 0
        "#,
    )
    .expect("fixture config parses")
}

/// One scripted `route` call.
#[derive(Debug, Clone)]
pub struct ScriptedRoute {
    /// Target butler.
    pub butler: String,
    /// Prompt passed to its `trigger` tool.
    pub prompt: String,
}

/// Stands in for the classification session: dials the switchboard's
/// tool server and makes the scripted `route` calls sequentially.
#[derive(Default)]
pub struct ScriptedClassifier {
    endpoint: OnceLock<String>,
    routes: Vec<ScriptedRoute>,
}

impl ScriptedClassifier {
    /// Script the calls this classifier will make.
    #[must_use]
    pub fn new(routes: Vec<ScriptedRoute>) -> Arc<Self> {
        Arc::new(Self {
            endpoint: OnceLock::new(),
            routes,
        })
    }

    /// Point the classifier at the switchboard's tool endpoint (known
    /// only after the daemon binds).
    pub fn connect(&self, endpoint: String) {
        let _ignored = self.endpoint.set(endpoint);
    }
}

#[async_trait]
impl SessionLauncher for ScriptedClassifier {
    async fn launch(&self, _session: &QueuedSession, _prompt: &str) -> SpawnOutcome {
        let Some(endpoint) = self.endpoint.get() else {
            return SpawnOutcome::failed("classifier not connected", None);
        };
        let client = McpClient::new(endpoint.clone(), CALL_TIMEOUT);
        for route in &self.routes {
            // Sequential by construction; each response is awaited.
            let _result = client
                .call_tool(
                    "route",
                    serde_json::json!({
                        "butler": route.butler,
                        "tool": "trigger",
                        "args": {"prompt": route.prompt},
                    }),
                )
                .await;
        }
        SpawnOutcome::ok(Some("scripted".to_owned()))
    }
}

/// Stands in for a specialist butler's session: replies on the
/// originating channel through its own `notify` tool.
#[derive(Default)]
pub struct ReplyingButler {
    endpoint: OnceLock<String>,
}

impl ReplyingButler {
    /// Create the launcher; call [`connect`](Self::connect) after the
    /// daemon binds.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            endpoint: OnceLock::new(),
        })
    }

    /// Point the launcher at its butler's tool endpoint.
    pub fn connect(&self, endpoint: String) {
        let _ignored = self.endpoint.set(endpoint);
    }
}

#[async_trait]
impl SessionLauncher for ReplyingButler {
    async fn launch(&self, session: &QueuedSession, _prompt: &str) -> SpawnOutcome {
        let Some(endpoint) = self.endpoint.get() else {
            return SpawnOutcome::failed("butler launcher not connected", None);
        };
        let Some(context) = &session.request_context else {
            // Nothing to reply to (e.g. a scheduled session).
            return SpawnOutcome::ok(None);
        };
        let client = McpClient::new(endpoint.clone(), CALL_TIMEOUT);
        let result = client
            .call_tool(
                "notify",
                serde_json::json!({
                    "message": format!("handled: {}", session.prompt),
                    "intent": "reply",
                    "request_context": context,
                }),
            )
            .await;
        match result {
            Ok(_) => SpawnOutcome::ok(None),
            Err(e) => SpawnOutcome::failed(e.to_string(), None),
        }
    }
}

/// Poll until `check` returns `Some`, or panic after ~3 seconds.
///
/// # Panics
///
/// Panics when the condition never holds.
pub async fn eventually<T, F, Fut>(mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    for _ in 0..300 {
        if let Some(value) = check().await {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held");
}
