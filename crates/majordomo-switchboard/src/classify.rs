//! The classification pipeline.
//!
//! One classification session runs at a time. The session is an
//! ephemeral LLM CLI handed the routable-registry snapshot and the
//! message; it places the message by calling the switchboard's own
//! `route` tool — once for a single-domain message, several times
//! sequentially for a multi-domain one. The switchboard mints a group id
//! when a message decomposes, logs every sub-route, and delivers one
//! aggregated reply on the originating channel.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use majordomo_butler::Notifier;
use majordomo_core::{
    FleetError, FleetResult, GroupId, RequestContext, RequestId, SessionId, TraceContext,
};
use majordomo_mcp::ToolCallResult;
use majordomo_session::SessionLauncher;
use majordomo_storage::{
    ButlerRecord, NotificationRecord, NotificationStore, QueuedSession, RoutingEntry,
    RoutingStore, SessionRecord, SessionStore,
};

use crate::route::{RouteOrigin, RouteService};

/// Width of per-butler reply excerpts in the aggregated message.
const REPLY_EXCERPT_MAX: usize = 200;

/// One message awaiting classification.
#[derive(Debug, Clone)]
pub struct ClassifyRequest {
    /// The accepted inbox row.
    pub request_id: RequestId,
    /// Channel the message arrived on.
    pub source_channel: String,
    /// Endpoint the message arrived through.
    pub endpoint_identity: String,
    /// Sender identity (also the reply recipient).
    pub sender: String,
    /// Source thread, when threaded.
    pub external_thread_id: Option<String>,
    /// The normalized message text.
    pub text: String,
    /// Trace the classification runs under.
    pub trace: TraceContext,
}

/// One sub-route made by the active classification session.
struct SubRoute {
    entry: RoutingEntry,
    reply: Option<String>,
}

struct ActiveClassification {
    request: ClassifyRequest,
    outcomes: Vec<SubRoute>,
    refusals: Vec<String>,
    unknown_targets: Vec<String>,
}

/// Single-flight classifier.
pub struct Classifier {
    tx: mpsc::Sender<ClassifyRequest>,
    rx: Mutex<Option<mpsc::Receiver<ClassifyRequest>>>,
    active: Mutex<Option<ActiveClassification>>,
    routes: Arc<RouteService>,
    routing_log: RoutingStore,
    sessions: SessionStore,
    notifications: NotificationStore,
    notifier: Arc<dyn Notifier>,
    max_fanout: usize,
    fallback_butler: String,
}

impl Classifier {
    /// Assemble a classifier. Call [`start`](Self::start) to begin
    /// draining the queue.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        routes: Arc<RouteService>,
        routing_log: RoutingStore,
        sessions: SessionStore,
        notifications: NotificationStore,
        notifier: Arc<dyn Notifier>,
        max_fanout: usize,
        fallback_butler: String,
        queue_capacity: usize,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        Arc::new(Self {
            tx,
            rx: Mutex::new(Some(rx)),
            active: Mutex::new(None),
            routes,
            routing_log,
            sessions,
            notifications,
            notifier,
            max_fanout: max_fanout.max(1),
            fallback_butler,
        })
    }

    /// Spawn the single worker draining the classification queue.
    /// Envelopes beyond the one in flight wait here — classification is
    /// single-flight by design.
    pub fn start(self: Arc<Self>, launcher: Arc<dyn SessionLauncher>) {
        let classifier = self;
        tokio::spawn(async move {
            let rx = classifier.rx.lock().await.take();
            let Some(mut rx) = rx else {
                warn!("classifier started twice; second start ignored");
                return;
            };
            while let Some(request) = rx.recv().await {
                classifier.classify_one(request, &launcher).await;
            }
            info!("classifier stopped");
        });
    }

    /// The route service this classifier dispatches through.
    #[must_use]
    pub fn routes(&self) -> Arc<RouteService> {
        Arc::clone(&self.routes)
    }

    /// Queue a message for classification.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::QueueFull`] under back-pressure.
    pub async fn submit(&self, request: ClassifyRequest) -> FleetResult<()> {
        self.tx
            .try_send(request)
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => FleetError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => {
                    FleetError::Internal("classifier is shut down".to_owned())
                },
            })
    }

    /// Route on behalf of whatever session is calling the switchboard's
    /// `route` tool.
    ///
    /// While a classification is active, calls are attributed to it:
    /// dispatched strictly sequentially (the lock is held across the
    /// dispatch), capped at the fan-out limit, stamped with the message's
    /// request context, and their routing-log entries are buffered until
    /// the session finishes so a decomposed message's entries share one
    /// group id. Outside a classification the entry is appended
    /// immediately.
    ///
    /// # Errors
    ///
    /// `not_permitted` past the fan-out cap or for self-routes, plus
    /// whatever the target butler raises.
    pub async fn route_for_session(
        &self,
        butler: &str,
        tool: &str,
        mut args: Value,
    ) -> FleetResult<ToolCallResult> {
        let mut active = self.active.lock().await;
        match active.as_mut() {
            Some(state) => {
                if state.outcomes.len() >= self.max_fanout {
                    warn!(
                        butler,
                        max_fanout = self.max_fanout,
                        "fan-out limit reached; refusing sub-route"
                    );
                    state.refusals.push(butler.to_owned());
                    return Err(FleetError::not_permitted(format!(
                        "fan-out limit of {} sub-routes reached",
                        self.max_fanout
                    )));
                }

                let context = RequestContext {
                    request_id: state.request.request_id,
                    source_channel: state.request.source_channel.clone(),
                    source_sender_identity: state.request.sender.clone(),
                    trace_context: state.request.trace.child(),
                };
                if let Value::Object(map) = &mut args {
                    map.entry("request_context".to_owned()).or_insert_with(|| {
                        serde_json::to_value(&context).unwrap_or(Value::Null)
                    });
                }

                let origin = RouteOrigin {
                    request_id: Some(state.request.request_id),
                    source_channel: state.request.source_channel.clone(),
                    endpoint_identity: state.request.endpoint_identity.clone(),
                    source_sender: state.request.sender.clone(),
                    external_thread_id: state.request.external_thread_id.clone(),
                };
                let (result, entry) = self
                    .routes
                    .route(butler, tool, args, &origin, &state.request.trace, None)
                    .await;
                // An unknown name is "no route", not a failed sub-route:
                // it does not occupy fan-out budget, and a session that
                // only named unknown butlers falls back wholesale.
                if matches!(result, Err(FleetError::NotFound { .. })) {
                    warn!(butler, "classifier named an unknown butler");
                    state.unknown_targets.push(butler.to_owned());
                    return result;
                }
                state.outcomes.push(SubRoute {
                    entry,
                    reply: result.as_ref().ok().map(|r| excerpt(&r.text())),
                });
                result
            },
            None => {
                let origin = RouteOrigin::internal("switchboard");
                let (result, entry) = self
                    .routes
                    .route(butler, tool, args, &origin, &TraceContext::new(), None)
                    .await;
                if let Err(e) = self.routing_log.append(entry).await {
                    error!(error = %e, "failed to append routing entry");
                }
                result
            },
        }
    }

    async fn classify_one(&self, request: ClassifyRequest, launcher: &Arc<dyn SessionLauncher>) {
        info!(request_id = %request.request_id, "classification starting");
        let snapshot = match self.routes.registry().routable_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(error = %e, "registry snapshot failed; message falls back");
                Vec::new()
            },
        };

        {
            let mut active = self.active.lock().await;
            *active = Some(ActiveClassification {
                request: request.clone(),
                outcomes: Vec::new(),
                refusals: Vec::new(),
                unknown_targets: Vec::new(),
            });
        }

        let prompt = build_classifier_prompt(&snapshot, &request.text);
        let queued = QueuedSession {
            id: SessionId::new(),
            trigger_source: "ingress".to_owned(),
            prompt: request.text.clone(),
            request_context: Some(RequestContext {
                request_id: request.request_id,
                source_channel: request.source_channel.clone(),
                source_sender_identity: request.sender.clone(),
                trace_context: request.trace.child(),
            }),
            enqueued_at: Utc::now(),
        };

        let started = Utc::now();
        let record = SessionRecord {
            id: queued.id,
            butler: "switchboard".to_owned(),
            trigger_source: "ingress".to_owned(),
            prompt: request.text.clone(),
            started_at: started,
            started_at_ms: started.timestamp_millis(),
            completed_at: None,
            success: None,
            duration_ms: None,
            error: None,
            model: None,
            request_id: Some(request.request_id),
        };
        if let Err(e) = self.sessions.insert_started(record).await {
            error!(error = %e, "failed to record classification session");
        }

        let clock = std::time::Instant::now();
        let outcome = launcher.launch(&queued, &prompt).await;
        let duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
        if let Err(e) = self
            .sessions
            .complete(
                queued.id,
                outcome.success,
                duration_ms,
                outcome.error.clone(),
                outcome.model.clone(),
            )
            .await
        {
            error!(error = %e, "failed to complete classification session");
        }

        let state = self.active.lock().await.take();
        if let Some(state) = state {
            self.finalize(state).await;
        }
    }

    /// Apply the group id, append the buffered entries, and deliver the
    /// aggregated reply when one is owed.
    async fn finalize(&self, mut state: ActiveClassification) {
        // A session that placed nothing falls back to the general butler.
        if state.outcomes.is_empty() {
            info!(
                request_id = %state.request.request_id,
                fallback = %self.fallback_butler,
                "classifier placed nothing; routing to fallback"
            );
            let context = RequestContext {
                request_id: state.request.request_id,
                source_channel: state.request.source_channel.clone(),
                source_sender_identity: state.request.sender.clone(),
                trace_context: state.request.trace.child(),
            };
            let origin = RouteOrigin {
                request_id: Some(state.request.request_id),
                source_channel: state.request.source_channel.clone(),
                endpoint_identity: state.request.endpoint_identity.clone(),
                source_sender: state.request.sender.clone(),
                external_thread_id: state.request.external_thread_id.clone(),
            };
            let args = serde_json::json!({
                "prompt": state.request.text,
                "trigger_source": "ingress",
                "request_context": context,
            });
            let (result, entry) = self
                .routes
                .route(
                    &self.fallback_butler,
                    "trigger",
                    args,
                    &origin,
                    &state.request.trace,
                    None,
                )
                .await;
            state.outcomes.push(SubRoute {
                entry,
                reply: result.as_ref().ok().map(|r| excerpt(&r.text())),
            });
        }

        // Decomposed messages share one freshly minted group id;
        // single-target routings carry none.
        if state.outcomes.len() > 1 {
            let group = GroupId::new();
            for outcome in &mut state.outcomes {
                outcome.entry.group_id = Some(group);
            }
        }
        for outcome in &state.outcomes {
            if let Err(e) = self.routing_log.append(outcome.entry.clone()).await {
                error!(error = %e, "failed to append routing entry");
            }
        }

        let any_failure = state.outcomes.iter().any(|o| !o.entry.success);
        let decomposed = state.outcomes.len() > 1;
        if decomposed || any_failure {
            let reply =
                compose_aggregate_reply(&state.outcomes, &state.refusals, &state.unknown_targets);
            self.deliver_reply(&state.request, &reply).await;
        }
        info!(
            request_id = %state.request.request_id,
            sub_routes = state.outcomes.len(),
            "classification finalized"
        );
    }

    async fn deliver_reply(&self, request: &ClassifyRequest, reply: &str) {
        let delivery = self
            .notifier
            .deliver(&request.source_channel, &request.sender, reply)
            .await;
        let (status, error) = match &delivery {
            Ok(()) => ("sent", None),
            Err(reason) => {
                warn!(reason = %reason, "aggregated reply delivery failed");
                ("failed", Some(reason.clone()))
            },
        };
        let record = NotificationRecord {
            id: uuid::Uuid::new_v4(),
            channel: request.source_channel.clone(),
            recipient: request.sender.clone(),
            message: reply.to_owned(),
            intent: "reply".to_owned(),
            status: status.to_owned(),
            error,
            source_butler: "switchboard".to_owned(),
            request_id: Some(request.request_id),
            created_at: Utc::now(),
        };
        if let Err(e) = self.notifications.append(record).await {
            error!(error = %e, "failed to record aggregated reply");
        }
    }
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("max_fanout", &self.max_fanout)
            .field("fallback_butler", &self.fallback_butler)
            .finish_non_exhaustive()
    }
}

/// The instruction block handed to every classification session.
fn build_classifier_prompt(snapshot: &[ButlerRecord], text: &str) -> String {
    let mut roster = String::new();
    for butler in snapshot {
        roster.push_str("- ");
        roster.push_str(&butler.name);
        if !butler.description.is_empty() {
            roster.push_str(": ");
            roster.push_str(&butler.description);
        }
        if !butler.modules.is_empty() {
            roster.push_str(" [");
            roster.push_str(&butler.modules.join(", "));
            roster.push(']');
        }
        roster.push('\n');
    }

    format!(
        "You are the switchboard classifier. Place the user's message with \
         the right specialist butlers.\n\n\
         Butlers available:\n{roster}\n\
         Rules:\n\
         - A single-topic message gets exactly one route call: \
           route(butler, \"trigger\", {{\"prompt\": <the relevant part>}}).\n\
         - A message spanning several domains gets one route call per \
           domain, issued one at a time; wait for each response before \
           the next call.\n\
         - Name butlers exactly as listed. Never route to the switchboard.\n\
         - After all route calls return, write one reply that attributes \
           each part to its butler, including any failures.\n\n\
         Message:\n{text}"
    )
}

fn excerpt(text: &str) -> String {
    text.chars().take(REPLY_EXCERPT_MAX).collect()
}

/// One reply attributing each part to its butler; failures, refused
/// sub-routes, and unknown names are called out rather than dropped.
fn compose_aggregate_reply(
    outcomes: &[SubRoute],
    refusals: &[String],
    unknown_targets: &[String],
) -> String {
    let mut lines = Vec::new();
    for outcome in outcomes {
        let butler = outcome.entry.routed_to.as_deref().unwrap_or("unrouted");
        if outcome.entry.success {
            let body = outcome
                .reply
                .clone()
                .unwrap_or_else(|| "done".to_owned());
            lines.push(format!("{butler}: {body}"));
        } else {
            let reason = outcome
                .entry
                .error
                .clone()
                .unwrap_or_else(|| "failed".to_owned());
            lines.push(format!("{butler}: failed ({reason})"));
        }
    }
    for refused in refusals {
        lines.push(format!("{refused}: not dispatched (fan-out limit)"));
    }
    for unknown in unknown_targets {
        lines.push(format!("{unknown}: no such butler"));
    }
    lines.join("\n")
}
