//! Cross-butler routing.
//!
//! `route(butler, tool, args)` looks the target up in the registry,
//! reuses (or opens) a client to its endpoint, propagates the trace
//! context, and produces a routing-log entry whether the dispatch
//! succeeded or not. Only success bumps the target's `last_seen_at`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use majordomo_core::{FleetError, FleetResult, GroupId, RequestId, TraceContext};
use majordomo_mcp::{McpClient, ToolCallResult};
use majordomo_storage::{ButlerRegistryStore, RoutingEntry};

/// Where a routed message originally came from; recorded on every entry.
#[derive(Debug, Clone)]
pub struct RouteOrigin {
    /// The accepted inbox row, when the route descends from one.
    pub request_id: Option<RequestId>,
    /// Channel the message arrived on (`mcp` for butler-initiated routes).
    pub source_channel: String,
    /// Endpoint the message arrived through.
    pub endpoint_identity: String,
    /// Sender identity.
    pub source_sender: String,
    /// Source thread, when threaded.
    pub external_thread_id: Option<String>,
}

impl RouteOrigin {
    /// An origin for butler-initiated routes with no inbox row behind
    /// them.
    #[must_use]
    pub fn internal(caller: impl Into<String>) -> Self {
        Self {
            request_id: None,
            source_channel: "mcp".to_owned(),
            endpoint_identity: "internal".to_owned(),
            source_sender: caller.into(),
            external_thread_id: None,
        }
    }
}

/// Registry-backed dispatch to other butlers.
pub struct RouteService {
    registry: ButlerRegistryStore,
    clients: DashMap<String, Arc<McpClient>>,
    call_timeout: Duration,
}

impl RouteService {
    /// Build a service over the registry.
    #[must_use]
    pub fn new(registry: ButlerRegistryStore, call_timeout: Duration) -> Self {
        Self {
            registry,
            clients: DashMap::new(),
            call_timeout,
        }
    }

    /// The registry this service routes against.
    #[must_use]
    pub fn registry(&self) -> &ButlerRegistryStore {
        &self.registry
    }

    /// Dispatch one tool call to another butler.
    ///
    /// Always returns a routing-log entry describing the attempt; the
    /// caller decides when to append it (immediately for direct routes,
    /// at finalization for classified fan-outs).
    pub async fn route(
        &self,
        butler: &str,
        tool: &str,
        mut args: Value,
        origin: &RouteOrigin,
        trace: &TraceContext,
        group_id: Option<GroupId>,
    ) -> (FleetResult<ToolCallResult>, RoutingEntry) {
        let sub_trace = trace.child();
        let prompt_summary = summarize_args(tool, &args);

        let result = if butler == "switchboard" {
            Err(FleetError::not_permitted("routing to the switchboard itself"))
        } else {
            match self.registry.get(butler).await {
                // Unknown butler: no connection is opened.
                Ok(None) => Err(FleetError::not_found(format!("butler {butler}"))),
                Err(e) => Err(FleetError::from(e)),
                Ok(Some(record)) => {
                    sub_trace.embed(&mut args);
                    let client = self.client_for(&record.name, &record.endpoint_url);
                    let outcome = tokio::time::timeout(
                        self.call_timeout,
                        client.call_tool(tool, args),
                    )
                    .await
                    .unwrap_or_else(|_| {
                        Err(FleetError::DeadlineExceeded {
                            timeout_ms: u64::try_from(self.call_timeout.as_millis())
                                .unwrap_or(u64::MAX),
                        })
                    });
                    if outcome.is_ok() {
                        if let Err(e) = self.registry.touch_last_seen(butler).await {
                            warn!(butler, error = %e, "failed to bump last_seen_at");
                        }
                    }
                    outcome
                },
            }
        };

        match &result {
            Ok(_) => info!(butler, tool, trace_id = %sub_trace.trace_id, "route ok"),
            Err(e) => warn!(butler, tool, trace_id = %sub_trace.trace_id, error = %e, "route failed"),
        }

        let now = Utc::now();
        let entry = RoutingEntry {
            id: Uuid::new_v4(),
            request_id: origin.request_id,
            source_channel: origin.source_channel.clone(),
            endpoint_identity: origin.endpoint_identity.clone(),
            source_sender: origin.source_sender.clone(),
            external_thread_id: origin.external_thread_id.clone(),
            routed_to: Some(butler.to_owned()),
            prompt_summary,
            trace_id: sub_trace.trace_id,
            group_id,
            success: result.is_ok(),
            error: result.as_ref().err().map(ToString::to_string),
            created_at: now,
            created_at_ms: now.timestamp_millis(),
        };
        (result, entry)
    }

    fn client_for(&self, butler: &str, endpoint: &str) -> Arc<McpClient> {
        // Endpoints can move between rescans; drop a stale client.
        if let Some(existing) = self.clients.get(butler) {
            if existing.endpoint() == endpoint {
                return Arc::clone(&existing);
            }
        }
        let client = Arc::new(McpClient::new(endpoint, self.call_timeout));
        self.clients.insert(butler.to_owned(), Arc::clone(&client));
        client
    }
}

impl std::fmt::Debug for RouteService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteService")
            .field("cached_clients", &self.clients.len())
            .finish_non_exhaustive()
    }
}

/// The stored summary: the prompt for trigger-style calls, the tool name
/// otherwise.
fn summarize_args(tool: &str, args: &Value) -> String {
    match args.get("prompt").and_then(Value::as_str) {
        Some(prompt) => RoutingEntry::summarize_prompt(prompt),
        None => tool.to_owned(),
    }
}
