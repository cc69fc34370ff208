//! The core tool set every butler serves.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use majordomo_config::NotifyConfig;
use majordomo_core::{FleetError, FleetResult};
use majordomo_mcp::{ButlerTool, CallContext};
use majordomo_scheduler::{ScheduleSpec, TaskDispatcher};
use majordomo_session::{SessionPool, SessionSubmission};
use majordomo_storage::{
    NotificationRecord, NotificationStore, ScheduleStore, StateStore, TaskRecord,
};

use crate::notify::Notifier;

/// Everything the core tools need.
pub struct CoreToolDeps {
    /// Butler name (recorded on notifications).
    pub butler: String,
    /// The butler's state table.
    pub state: StateStore,
    /// The butler's task table.
    pub schedule: ScheduleStore,
    /// The butler's session pool.
    pub pool: Arc<SessionPool>,
    /// Where `tick` sends fired tasks.
    pub dispatcher: Arc<dyn TaskDispatcher>,
    /// The delivery log.
    pub notifications: NotificationStore,
    /// Outbound delivery.
    pub notifier: Arc<dyn Notifier>,
    /// Default recipients per channel.
    pub notify_config: NotifyConfig,
}

/// Build the core tool set over shared deps.
#[must_use]
pub fn core_tools(deps: Arc<CoreToolDeps>) -> Vec<Arc<dyn ButlerTool>> {
    vec![
        Arc::new(StateGet(Arc::clone(&deps))),
        Arc::new(StateSet(Arc::clone(&deps))),
        Arc::new(StateDelete(Arc::clone(&deps))),
        Arc::new(StateList(Arc::clone(&deps))),
        Arc::new(ScheduleCreate(Arc::clone(&deps))),
        Arc::new(ScheduleDelete(Arc::clone(&deps))),
        Arc::new(ScheduleList(Arc::clone(&deps))),
        Arc::new(Trigger(Arc::clone(&deps))),
        Arc::new(Tick(Arc::clone(&deps))),
        Arc::new(Notify(Arc::clone(&deps))),
        Arc::new(RouteForbidden),
    ]
}

fn require_str<'a>(args: &'a Value, key: &str) -> FleetResult<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| FleetError::invalid_envelope(format!("{key} is required")))
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

// ---------------------------------------------------------------------------
// state.*
// ---------------------------------------------------------------------------

struct StateGet(Arc<CoreToolDeps>);

#[async_trait]
impl ButlerTool for StateGet {
    fn name(&self) -> &str {
        "state.get"
    }
    fn description(&self) -> &str {
        "Read a JSON value from this butler's state by key."
    }
    fn input_schema(&self) -> Value {
        object_schema(serde_json::json!({"key": {"type": "string"}}), &["key"])
    }
    async fn execute(&self, args: Value, _ctx: &CallContext) -> FleetResult<Value> {
        let key = require_str(&args, "key")?;
        let value = self.0.state.get(key).await.map_err(FleetError::from)?;
        Ok(serde_json::json!({"key": key, "value": value}))
    }
}

struct StateSet(Arc<CoreToolDeps>);

#[async_trait]
impl ButlerTool for StateSet {
    fn name(&self) -> &str {
        "state.set"
    }
    fn description(&self) -> &str {
        "Write-through upsert of a JSON value under a key."
    }
    fn input_schema(&self) -> Value {
        object_schema(
            serde_json::json!({"key": {"type": "string"}, "value": {}}),
            &["key", "value"],
        )
    }
    async fn execute(&self, args: Value, _ctx: &CallContext) -> FleetResult<Value> {
        let key = require_str(&args, "key")?;
        let value = args
            .get("value")
            .cloned()
            .ok_or_else(|| FleetError::invalid_envelope("value is required"))?;
        self.0
            .state
            .set(key, value)
            .await
            .map_err(FleetError::from)?;
        Ok(serde_json::json!({"key": key, "stored": true}))
    }
}

struct StateDelete(Arc<CoreToolDeps>);

#[async_trait]
impl ButlerTool for StateDelete {
    fn name(&self) -> &str {
        "state.delete"
    }
    fn description(&self) -> &str {
        "Delete a state key. Deleting a missing key is fine."
    }
    fn input_schema(&self) -> Value {
        object_schema(serde_json::json!({"key": {"type": "string"}}), &["key"])
    }
    async fn execute(&self, args: Value, _ctx: &CallContext) -> FleetResult<Value> {
        let key = require_str(&args, "key")?;
        self.0.state.delete(key).await.map_err(FleetError::from)?;
        Ok(serde_json::json!({"key": key, "deleted": true}))
    }
}

struct StateList(Arc<CoreToolDeps>);

#[async_trait]
impl ButlerTool for StateList {
    fn name(&self) -> &str {
        "state.list"
    }
    fn description(&self) -> &str {
        "List state entries, optionally filtered by key prefix."
    }
    fn input_schema(&self) -> Value {
        object_schema(serde_json::json!({"prefix": {"type": "string"}}), &[])
    }
    async fn execute(&self, args: Value, _ctx: &CallContext) -> FleetResult<Value> {
        let prefix = args.get("prefix").and_then(Value::as_str);
        let entries = self.0.state.list(prefix).await.map_err(FleetError::from)?;
        Ok(serde_json::json!({
            "entries": entries
                .into_iter()
                .map(|e| serde_json::json!({"key": e.key, "value": e.value, "updated_at": e.updated_at}))
                .collect::<Vec<_>>(),
        }))
    }
}

// ---------------------------------------------------------------------------
// schedule.*
// ---------------------------------------------------------------------------

struct ScheduleCreate(Arc<CoreToolDeps>);

#[async_trait]
impl ButlerTool for ScheduleCreate {
    fn name(&self) -> &str {
        "schedule.create"
    }
    fn description(&self) -> &str {
        "Create a scheduled task: five-field cron or RFC 3339 one-shot. \
         Names are unique; replacing a one-shot means delete then create."
    }
    fn input_schema(&self) -> Value {
        object_schema(
            serde_json::json!({
                "name": {"type": "string"},
                "spec": {"type": "string"},
                "timezone": {"type": "string"},
                "dispatch_mode": {"type": "string", "enum": ["prompt", "job"]},
                "prompt": {"type": "string"},
                "job_name": {"type": "string"},
                "job_args": {},
                "until_at": {"type": "string", "format": "date-time"},
            }),
            &["name", "spec", "dispatch_mode"],
        )
    }
    async fn execute(&self, args: Value, _ctx: &CallContext) -> FleetResult<Value> {
        let name = require_str(&args, "name")?;
        let spec_text = require_str(&args, "spec")?;
        let dispatch_mode = require_str(&args, "dispatch_mode")?;
        let timezone = args
            .get("timezone")
            .and_then(Value::as_str)
            .unwrap_or("UTC");
        let prompt = args.get("prompt").and_then(Value::as_str);
        let job_name = args.get("job_name").and_then(Value::as_str);

        match dispatch_mode {
            "prompt" if prompt.is_some() && job_name.is_none() => {},
            "job" if job_name.is_some() && prompt.is_none() => {},
            _ => {
                return Err(FleetError::invalid_envelope(
                    "exactly one of prompt/job_name must match dispatch_mode",
                ));
            },
        }

        let until_at = match args.get("until_at").and_then(Value::as_str) {
            Some(text) => Some(
                chrono::DateTime::parse_from_rfc3339(text)
                    .map_err(|e| FleetError::invalid_envelope(format!("until_at: {e}")))?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        let spec = ScheduleSpec::parse(spec_text, timezone)
            .map_err(|e| FleetError::invalid_envelope(e.to_string()))?;
        let next_run_at = spec.initial_next_run(Utc::now());

        let task = TaskRecord {
            id: Uuid::new_v4(),
            name: name.to_owned(),
            spec: spec_text.to_owned(),
            timezone: timezone.to_owned(),
            dispatch_mode: dispatch_mode.to_owned(),
            prompt: prompt.map(str::to_owned),
            job_name: job_name.map(str::to_owned),
            job_args: args.get("job_args").cloned(),
            enabled: next_run_at.is_some(),
            next_run_at,
            last_run_at: None,
            last_result: None,
            until_at,
        };
        let created = self
            .0
            .schedule
            .create(task)
            .await
            .map_err(FleetError::from)?;
        Ok(serde_json::json!({
            "name": created.name,
            "next_run_at": created.next_run_at,
            "enabled": created.enabled,
        }))
    }
}

struct ScheduleDelete(Arc<CoreToolDeps>);

#[async_trait]
impl ButlerTool for ScheduleDelete {
    fn name(&self) -> &str {
        "schedule.delete"
    }
    fn description(&self) -> &str {
        "Delete a scheduled task by name."
    }
    fn input_schema(&self) -> Value {
        object_schema(serde_json::json!({"name": {"type": "string"}}), &["name"])
    }
    async fn execute(&self, args: Value, _ctx: &CallContext) -> FleetResult<Value> {
        let name = require_str(&args, "name")?;
        self.0
            .schedule
            .delete_by_name(name)
            .await
            .map_err(FleetError::from)?;
        Ok(serde_json::json!({"name": name, "deleted": true}))
    }
}

struct ScheduleList(Arc<CoreToolDeps>);

#[async_trait]
impl ButlerTool for ScheduleList {
    fn name(&self) -> &str {
        "schedule.list"
    }
    fn description(&self) -> &str {
        "List this butler's scheduled tasks."
    }
    async fn execute(&self, _args: Value, _ctx: &CallContext) -> FleetResult<Value> {
        let tasks = self.0.schedule.list().await.map_err(FleetError::from)?;
        Ok(serde_json::json!({
            "tasks": tasks
                .into_iter()
                .map(|t| serde_json::json!({
                    "name": t.name,
                    "spec": t.spec,
                    "dispatch_mode": t.dispatch_mode,
                    "enabled": t.enabled,
                    "next_run_at": t.next_run_at,
                    "last_run_at": t.last_run_at,
                    "last_result": t.last_result,
                }))
                .collect::<Vec<_>>(),
        }))
    }
}

// ---------------------------------------------------------------------------
// trigger / tick
// ---------------------------------------------------------------------------

struct Trigger(Arc<CoreToolDeps>);

#[async_trait]
impl ButlerTool for Trigger {
    fn name(&self) -> &str {
        "trigger"
    }
    fn description(&self) -> &str {
        "Enqueue a session on this butler with the given prompt."
    }
    fn input_schema(&self) -> Value {
        object_schema(
            serde_json::json!({
                "prompt": {"type": "string"},
                "trigger_source": {"type": "string"},
                "request_context": {"type": "object"},
            }),
            &["prompt"],
        )
    }
    async fn execute(&self, args: Value, ctx: &CallContext) -> FleetResult<Value> {
        let prompt = require_str(&args, "prompt")?;
        // A trigger carrying a request context descends from the ingress;
        // anything else is butler-to-butler self-dispatch.
        let default_source = if ctx.request_context.is_some() {
            "ingress"
        } else {
            "mcp"
        };
        let trigger_source = args
            .get("trigger_source")
            .and_then(Value::as_str)
            .unwrap_or(default_source);
        let id = self
            .0
            .pool
            .submit(SessionSubmission {
                trigger_source: trigger_source.to_owned(),
                prompt: prompt.to_owned(),
                request_context: ctx.request_context.clone(),
            })
            .await?;
        Ok(serde_json::json!({"session_id": id, "queued": true}))
    }
}

struct Tick(Arc<CoreToolDeps>);

#[async_trait]
impl ButlerTool for Tick {
    fn name(&self) -> &str {
        "tick"
    }
    fn description(&self) -> &str {
        "Evaluate due schedules immediately. A no-op when nothing is due."
    }
    async fn execute(&self, _args: Value, _ctx: &CallContext) -> FleetResult<Value> {
        let result = majordomo_scheduler::tick(&self.0.schedule, &self.0.dispatcher)
            .await
            .map_err(|e| FleetError::Internal(e.to_string()))?;
        Ok(serde_json::json!({"fired": result.fired, "expired": result.expired}))
    }
}

// ---------------------------------------------------------------------------
// notify
// ---------------------------------------------------------------------------

struct Notify(Arc<CoreToolDeps>);

#[async_trait]
impl ButlerTool for Notify {
    fn name(&self) -> &str {
        "notify"
    }
    fn description(&self) -> &str {
        "Deliver a message. With intent \"reply\" and a request context the \
         message goes back to the originating channel; \"send\" targets the \
         configured default recipient."
    }
    fn input_schema(&self) -> Value {
        object_schema(
            serde_json::json!({
                "channel": {"type": "string"},
                "message": {"type": "string"},
                "intent": {"type": "string", "enum": ["send", "reply", "react", "proactive"]},
                "recipient": {"type": "string"},
                "request_context": {"type": "object"},
            }),
            &["message", "intent"],
        )
    }
    async fn execute(&self, args: Value, ctx: &CallContext) -> FleetResult<Value> {
        let message = require_str(&args, "message")?;
        let intent = require_str(&args, "intent")?;
        if !matches!(intent, "send" | "reply" | "react" | "proactive") {
            return Err(FleetError::invalid_envelope(format!(
                "unknown intent {intent:?}"
            )));
        }

        let (channel, recipient) = if intent == "reply" {
            let rc = ctx.request_context.as_ref().ok_or_else(|| {
                FleetError::invalid_envelope("reply intent requires a request_context")
            })?;
            (rc.source_channel.clone(), rc.source_sender_identity.clone())
        } else {
            let channel = require_str(&args, "channel")?.to_owned();
            let recipient = match args.get("recipient").and_then(Value::as_str) {
                Some(r) => r.to_owned(),
                None => self
                    .0
                    .notify_config
                    .default_recipients
                    .get(&channel)
                    .cloned()
                    .ok_or_else(|| {
                        FleetError::not_found(format!("default recipient for channel {channel}"))
                    })?,
            };
            (channel, recipient)
        };

        let delivery = self.0.notifier.deliver(&channel, &recipient, message).await;
        let (status, error) = match &delivery {
            Ok(()) => ("sent", None),
            Err(reason) => ("failed", Some(reason.clone())),
        };
        self.0
            .notifications
            .append(NotificationRecord {
                id: Uuid::new_v4(),
                channel: channel.clone(),
                recipient: recipient.clone(),
                message: message.to_owned(),
                intent: intent.to_owned(),
                status: status.to_owned(),
                error: error.clone(),
                source_butler: self.0.butler.clone(),
                request_id: ctx.request_context.as_ref().map(|c| c.request_id),
                created_at: Utc::now(),
            })
            .await
            .map_err(FleetError::from)?;

        match delivery {
            Ok(()) => Ok(serde_json::json!({
                "channel": channel,
                "recipient": recipient,
                "status": "sent",
            })),
            Err(reason) => Err(FleetError::Tool {
                message: format!("delivery failed: {reason}"),
                payload: None,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// route (forbidden off the switchboard)
// ---------------------------------------------------------------------------

/// Present on every non-ingress butler so the surface is uniform; always
/// refuses.
struct RouteForbidden;

#[async_trait]
impl ButlerTool for RouteForbidden {
    fn name(&self) -> &str {
        "route"
    }
    fn description(&self) -> &str {
        "Cross-butler routing. Only the switchboard may route."
    }
    async fn execute(&self, _args: Value, ctx: &CallContext) -> FleetResult<Value> {
        Err(FleetError::not_permitted(format!(
            "routing is not permitted on butler {}",
            ctx.butler
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::PoolDispatcher;
    use crate::jobs::JobRegistry;
    use crate::notify::LogNotifier;
    use majordomo_mcp::ToolRegistry;
    use majordomo_session::{SessionLauncher, SpawnOutcome};
    use majordomo_storage::{Database, QueuedSession, SessionStore};

    struct NoopLauncher;

    #[async_trait]
    impl SessionLauncher for NoopLauncher {
        async fn launch(&self, _s: &QueuedSession, _p: &str) -> SpawnOutcome {
            SpawnOutcome::ok(None)
        }
    }

    async fn registry() -> ToolRegistry {
        let db = Database::connect_memory("health").await.unwrap();
        db.define_schema().await.unwrap();
        let pool = Arc::new(SessionPool::start(
            "health",
            SessionStore::new(db.clone()),
            Arc::new(NoopLauncher),
            1,
            16,
            String::new(),
            Vec::new(),
        ));
        let schedule = ScheduleStore::new(db.clone());
        let dispatcher: Arc<dyn TaskDispatcher> = Arc::new(PoolDispatcher::new(
            Arc::clone(&pool),
            JobRegistry::new(),
        ));
        let mut notify_config = NotifyConfig::default();
        notify_config
            .default_recipients
            .insert("telegram".to_owned(), "user:owner".to_owned());
        let deps = Arc::new(CoreToolDeps {
            butler: "health".to_owned(),
            state: StateStore::new(db.clone()),
            schedule,
            pool,
            dispatcher,
            notifications: NotificationStore::new(db.clone()),
            notifier: Arc::new(LogNotifier),
            notify_config,
        });
        ToolRegistry::new("health", core_tools(deps))
    }

    #[tokio::test]
    async fn state_tools_read_your_writes() {
        let reg = registry().await;
        reg.call(
            "state.set",
            serde_json::json!({"key": "goal", "value": {"steps": 10000}}),
        )
        .await
        .unwrap();

        let result = reg
            .call("state.get", serde_json::json!({"key": "goal"}))
            .await
            .unwrap();
        assert_eq!(result.structured.unwrap()["value"]["steps"], 10000);

        reg.call("state.delete", serde_json::json!({"key": "goal"}))
            .await
            .unwrap();
        let result = reg
            .call("state.get", serde_json::json!({"key": "goal"}))
            .await
            .unwrap();
        assert!(result.structured.unwrap()["value"].is_null());
    }

    #[tokio::test]
    async fn schedule_create_then_delete_leaves_nothing() {
        let reg = registry().await;
        let result = reg
            .call(
                "schedule.create",
                serde_json::json!({
                    "name": "review-abc123-rep3",
                    "spec": "2026-03-05T14:30:00Z",
                    "dispatch_mode": "prompt",
                    "prompt": "Run the review",
                }),
            )
            .await
            .unwrap();
        assert_eq!(result.structured.as_ref().unwrap()["enabled"], true);

        // Duplicate creation fails.
        let err = reg
            .call(
                "schedule.create",
                serde_json::json!({
                    "name": "review-abc123-rep3",
                    "spec": "2026-03-06T14:30:00Z",
                    "dispatch_mode": "prompt",
                    "prompt": "Run the review",
                }),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "storage");

        reg.call(
            "schedule.delete",
            serde_json::json!({"name": "review-abc123-rep3"}),
        )
        .await
        .unwrap();

        let listed = reg
            .call("schedule.list", serde_json::json!({}))
            .await
            .unwrap();
        assert!(
            listed.structured.unwrap()["tasks"]
                .as_array()
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn schedule_create_rejects_mode_mismatch() {
        let reg = registry().await;
        let err = reg
            .call(
                "schedule.create",
                serde_json::json!({
                    "name": "broken",
                    "spec": "0 7 * * *",
                    "dispatch_mode": "prompt",
                    "job_name": "rollup",
                }),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_envelope");
    }

    #[tokio::test]
    async fn trigger_queues_a_session() {
        let reg = registry().await;
        let result = reg
            .call("trigger", serde_json::json!({"prompt": "do the thing"}))
            .await
            .unwrap();
        assert_eq!(result.structured.unwrap()["queued"], true);
    }

    #[tokio::test]
    async fn notify_send_uses_default_recipient() {
        let reg = registry().await;
        let result = reg
            .call(
                "notify",
                serde_json::json!({
                    "channel": "telegram",
                    "message": "hello",
                    "intent": "send",
                }),
            )
            .await
            .unwrap();
        let structured = result.structured.unwrap();
        assert_eq!(structured["recipient"], "user:owner");
        assert_eq!(structured["status"], "sent");
    }

    #[tokio::test]
    async fn notify_reply_requires_request_context() {
        let reg = registry().await;
        let err = reg
            .call(
                "notify",
                serde_json::json!({"message": "hello", "intent": "reply"}),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_envelope");
    }

    #[tokio::test]
    async fn route_is_forbidden_off_the_switchboard() {
        let reg = registry().await;
        let err = reg
            .call(
                "route",
                serde_json::json!({"butler": "health", "tool": "state.get", "args": {}}),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_permitted");
    }
}
