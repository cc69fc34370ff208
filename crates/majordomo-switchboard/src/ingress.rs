//! The connector-facing ingress.
//!
//! Implements the ingress RPC surface: envelope acceptance through the
//! dedupe core, triage, dispatch hand-off, heartbeat processing, and the
//! backfill coordination calls.

use std::sync::Arc;

use chrono::Utc;
use jsonrpsee::core::{async_trait, RpcResult};
use tracing::{info, warn};

use majordomo_butler::Notifier;
use majordomo_config::SwitchboardConfig;
use majordomo_connector::{BackfillJob, HeartbeatAck, IngressRpcServer};
use majordomo_core::{
    AcceptResponse, Channel, ConnectorKey, FleetError, HeartbeatEnvelope, IngestEnvelope,
    RequestContext, TriageAction, TriageDecision,
};
use majordomo_mcp::error::to_rpc_error;
use majordomo_storage::{ConnectorRegistryStore, InboxRow, InboxStore, RoutingStore};

use crate::classify::{ClassifyRequest, Classifier};
use crate::route::RouteOrigin;
use crate::triage::TriageEngine;

/// Items a backfill batch reports progress after.
const BACKFILL_BATCH_LIMIT: usize = 100;

/// The ingress service behind `ingestion.ingest` and friends.
#[derive(Clone)]
pub struct SwitchboardIngress {
    inbox: InboxStore,
    routing_log: RoutingStore,
    connectors: ConnectorRegistryStore,
    triage: TriageEngine,
    classifier: Arc<Classifier>,
    notifier: Arc<dyn Notifier>,
    observed_at_skew_secs: i64,
}

impl SwitchboardIngress {
    /// Assemble the ingress.
    #[must_use]
    pub fn new(
        inbox: InboxStore,
        routing_log: RoutingStore,
        connectors: ConnectorRegistryStore,
        config: &SwitchboardConfig,
        classifier: Arc<Classifier>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            inbox,
            routing_log,
            connectors,
            triage: TriageEngine::new(config.triage_rules.clone()),
            classifier,
            notifier,
            observed_at_skew_secs: config.observed_at_skew_secs,
        }
    }

    /// The full accept pipeline; shared by the RPC handler and in-process
    /// callers (tests, the `api` channel).
    ///
    /// # Errors
    ///
    /// `invalid_envelope` for schema violations; storage errors are
    /// retryable.
    pub async fn accept(&self, env: IngestEnvelope) -> Result<AcceptResponse, FleetError> {
        let skewed = env.validate(Utc::now(), self.observed_at_skew_secs)?;
        if skewed {
            warn!(
                observed_at = %env.event.observed_at,
                "observed_at is further in the future than the allowed skew"
            );
        }

        // Thread affinity first (email only), then the configured rules,
        // then the default.
        let decision = match self.thread_affinity(&env).await {
            Some(decision) => decision,
            None => self
                .triage
                .evaluate(&env)
                .unwrap_or_else(TriageDecision::default_pass_through),
        };

        let (row, duplicate) = self.inbox.insert_deduped(&env, Some(&decision)).await?;
        if duplicate {
            // The first decision is authoritative; no second
            // classification, no second routing entry.
            info!(request_id = %row.request_id, "duplicate envelope; short-circuiting");
            return Ok(accept_response(&row, true));
        }

        metrics::counter!("ingress_accepted", "channel" => row.channel.clone()).increment(1);
        match decision.action {
            TriageAction::Skip => {
                info!(request_id = %row.request_id, rule = %decision.rule_id, "triage skip; no dispatch");
            },
            TriageAction::RouteTo => {
                if let Some(target) = decision.target.clone() {
                    self.dispatch_direct(&env, &row, target).await;
                } else {
                    warn!(rule = %decision.rule_id, "route_to rule without target; classifying");
                    self.enqueue_classification(&env, &row).await;
                }
            },
            TriageAction::PassThrough
            | TriageAction::LowPriorityQueue
            | TriageAction::MetadataOnly => {
                self.enqueue_classification(&env, &row).await;
            },
        }

        Ok(accept_response(&row, false))
    }

    /// Email threads stick to the butler that last handled them.
    async fn thread_affinity(&self, env: &IngestEnvelope) -> Option<TriageDecision> {
        if env.source.channel != Channel::Email {
            return None;
        }
        let thread_id = env.event.external_thread_id.as_deref()?;
        let target = self
            .routing_log
            .latest_route_for_thread(&env.source.endpoint_identity, thread_id)
            .await
            .ok()
            .flatten()?;
        Some(TriageDecision {
            action: TriageAction::RouteTo,
            target: Some(target),
            rule_id: "thread_affinity".to_owned(),
        })
    }

    /// A triage-decided target skips classification entirely.
    async fn dispatch_direct(&self, env: &IngestEnvelope, row: &InboxRow, target: String) {
        let context = RequestContext::for_envelope(row.request_id, env);
        let origin = RouteOrigin {
            request_id: Some(row.request_id),
            source_channel: row.channel.clone(),
            endpoint_identity: row.endpoint_identity.clone(),
            source_sender: row.sender_identity.clone(),
            external_thread_id: row.external_thread_id.clone(),
        };
        let args = serde_json::json!({
            "prompt": env.payload.normalized_text,
            "trigger_source": "ingress",
            "request_context": context,
        });
        let trace = env.control.trace_context.clone();
        let notifier = Arc::clone(&self.notifier);
        let routing_log = self.routing_log.clone();
        let routes = self.classifier.routes();
        tokio::spawn(async move {
            let (result, entry) = routes
                .route(&target, "trigger", args, &origin, &trace, None)
                .await;
            if let Err(e) = routing_log.append(entry).await {
                warn!(error = %e, "failed to append routing entry");
            }
            if let Err(e) = result {
                // A user-facing failure still produces a notification.
                let text = format!("{target}: failed ({e})");
                if let Err(reason) = notifier
                    .deliver(&origin.source_channel, &origin.source_sender, &text)
                    .await
                {
                    warn!(reason = %reason, "failure notification delivery failed");
                }
            }
        });
    }

    async fn enqueue_classification(&self, env: &IngestEnvelope, row: &InboxRow) {
        let request = ClassifyRequest {
            request_id: row.request_id,
            source_channel: row.channel.clone(),
            endpoint_identity: row.endpoint_identity.clone(),
            sender: row.sender_identity.clone(),
            external_thread_id: row.external_thread_id.clone(),
            text: env.payload.normalized_text.clone(),
            trace: env.control.trace_context.clone(),
        };
        if let Err(e) = self.classifier.submit(request).await {
            warn!(request_id = %row.request_id, error = %e, "classification queue rejected message");
        }
    }
}

fn accept_response(row: &InboxRow, duplicate: bool) -> AcceptResponse {
    AcceptResponse {
        request_id: row.request_id,
        duplicate,
        triage_decision: row
            .triage_decision
            .as_deref()
            .and_then(parse_triage_action),
        triage_target: row.triage_target.clone(),
    }
}

fn parse_triage_action(action: &str) -> Option<TriageAction> {
    match action {
        "route_to" => Some(TriageAction::RouteTo),
        "low_priority_queue" => Some(TriageAction::LowPriorityQueue),
        "pass_through" => Some(TriageAction::PassThrough),
        "metadata_only" => Some(TriageAction::MetadataOnly),
        "skip" => Some(TriageAction::Skip),
        _ => None,
    }
}

#[async_trait]
impl IngressRpcServer for SwitchboardIngress {
    async fn ingest(&self, envelope: IngestEnvelope) -> RpcResult<AcceptResponse> {
        self.accept(envelope).await.map_err(|e| to_rpc_error(&e))
    }

    async fn heartbeat(&self, envelope: HeartbeatEnvelope) -> RpcResult<HeartbeatAck> {
        let record = self
            .connectors
            .apply_heartbeat(&envelope, Utc::now())
            .await
            .map_err(|e| to_rpc_error(&FleetError::from(e)))?;
        Ok(HeartbeatAck {
            eligibility: record.eligibility,
        })
    }

    async fn backfill_poll(
        &self,
        connector_type: String,
        endpoint_identity: String,
    ) -> RpcResult<Option<BackfillJob>> {
        let key = ConnectorKey::new(connector_type, endpoint_identity);
        let record = self
            .connectors
            .get(&key)
            .await
            .map_err(|e| to_rpc_error(&FleetError::from(e)))?;
        Ok(record
            .filter(|r| r.eligibility == majordomo_core::Eligibility::Active)
            .map(|r| BackfillJob {
                from_cursor: r.backfill_cursor,
                batch_limit: BACKFILL_BATCH_LIMIT,
            }))
    }

    async fn backfill_progress(
        &self,
        connector_type: String,
        endpoint_identity: String,
        cursor: String,
    ) -> RpcResult<()> {
        let key = ConnectorKey::new(connector_type, endpoint_identity);
        self.connectors
            .set_backfill_cursor(&key, &cursor)
            .await
            .map_err(|e| to_rpc_error(&FleetError::from(e)))?;
        Ok(())
    }
}
