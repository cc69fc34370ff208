//! Switchboard-only tools: real routing plus connector administration.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use majordomo_core::{ConnectorKey, FleetError, FleetResult};
use majordomo_mcp::{ButlerTool, CallContext};
use majordomo_storage::ConnectorRegistryStore;

use crate::classify::Classifier;

fn require_str<'a>(args: &'a Value, key: &str) -> FleetResult<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| FleetError::invalid_envelope(format!("{key} is required")))
}

/// The real `route` tool. Registered on the switchboard only; it
/// replaces the always-refusing stub from the core tool set.
pub struct RouteTool {
    classifier: Arc<Classifier>,
}

impl RouteTool {
    /// Build the tool over the classifier (which owns routing state).
    #[must_use]
    pub fn new(classifier: Arc<Classifier>) -> Self {
        Self { classifier }
    }
}

#[async_trait]
impl ButlerTool for RouteTool {
    fn name(&self) -> &str {
        "route"
    }
    fn description(&self) -> &str {
        "Dispatch a tool call to a named butler. During classification, \
         sequential calls to several butlers decompose the message."
    }
    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "butler": {"type": "string"},
                "tool": {"type": "string"},
                "args": {"type": "object"},
            },
            "required": ["butler", "tool"],
        })
    }
    async fn execute(&self, args: Value, _ctx: &CallContext) -> FleetResult<Value> {
        let butler = require_str(&args, "butler")?.to_owned();
        let tool = require_str(&args, "tool")?.to_owned();
        let tool_args = args.get("args").cloned().unwrap_or_else(|| serde_json::json!({}));
        let result = self
            .classifier
            .route_for_session(&butler, &tool, tool_args)
            .await?;
        Ok(result
            .structured
            .unwrap_or_else(|| serde_json::json!({"text": result.text()})))
    }
}

/// Operator action: pull a connector out of rotation.
pub struct ConnectorQuarantine {
    connectors: ConnectorRegistryStore,
}

impl ConnectorQuarantine {
    /// Build the tool.
    #[must_use]
    pub fn new(connectors: ConnectorRegistryStore) -> Self {
        Self { connectors }
    }
}

#[async_trait]
impl ButlerTool for ConnectorQuarantine {
    fn name(&self) -> &str {
        "connector.quarantine"
    }
    fn description(&self) -> &str {
        "Quarantine a connector. Quarantine outranks heartbeat recency \
         and only connector.reactivate lifts it."
    }
    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "connector_type": {"type": "string"},
                "endpoint_identity": {"type": "string"},
                "reason": {"type": "string"},
            },
            "required": ["connector_type", "endpoint_identity", "reason"],
        })
    }
    async fn execute(&self, args: Value, _ctx: &CallContext) -> FleetResult<Value> {
        let key = ConnectorKey::new(
            require_str(&args, "connector_type")?,
            require_str(&args, "endpoint_identity")?,
        );
        let reason = require_str(&args, "reason")?;
        let record = self
            .connectors
            .quarantine(&key, reason)
            .await
            .map_err(FleetError::from)?;
        Ok(serde_json::json!({
            "connector": key.to_string(),
            "eligibility": record.eligibility,
        }))
    }
}

/// Operator action: return a quarantined connector to rotation.
pub struct ConnectorReactivate {
    connectors: ConnectorRegistryStore,
}

impl ConnectorReactivate {
    /// Build the tool.
    #[must_use]
    pub fn new(connectors: ConnectorRegistryStore) -> Self {
        Self { connectors }
    }
}

#[async_trait]
impl ButlerTool for ConnectorReactivate {
    fn name(&self) -> &str {
        "connector.reactivate"
    }
    fn description(&self) -> &str {
        "Lift a connector's quarantine."
    }
    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "connector_type": {"type": "string"},
                "endpoint_identity": {"type": "string"},
                "reason": {"type": "string"},
            },
            "required": ["connector_type", "endpoint_identity", "reason"],
        })
    }
    async fn execute(&self, args: Value, _ctx: &CallContext) -> FleetResult<Value> {
        let key = ConnectorKey::new(
            require_str(&args, "connector_type")?,
            require_str(&args, "endpoint_identity")?,
        );
        let reason = require_str(&args, "reason")?;
        let record = self
            .connectors
            .reactivate(&key, reason)
            .await
            .map_err(FleetError::from)?;
        Ok(serde_json::json!({
            "connector": key.to_string(),
            "eligibility": record.eligibility,
        }))
    }
}
