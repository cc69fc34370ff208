//! The per-butler tool registry.
//!
//! Tools implement [`ButlerTool`]; the registry dispatches `tools/call`
//! with per-call tracing and sensitivity gating in front of every
//! execution.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{info, warn};

use majordomo_core::{FleetError, FleetResult, RequestContext, TraceContext};

use crate::approvals::{ApprovalLedger, GateOutcome};
use crate::types::{ToolCallResult, ToolDefinition};

/// Ambient data for one tool call.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Butler serving the call.
    pub butler: String,
    /// Trace the call runs under (extracted from `_trace_context` or
    /// freshly minted).
    pub trace: TraceContext,
    /// Originating-request block, when the caller supplied one.
    pub request_context: Option<RequestContext>,
}

/// One tool on a butler's surface.
#[async_trait::async_trait]
pub trait ButlerTool: Send + Sync {
    /// Tool name (`state.get`, `notify`, …).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema of the input object.
    fn input_schema(&self) -> Value {
        serde_json::json!({"type": "object"})
    }

    /// JSON Schema of the output, when declared.
    fn output_schema(&self) -> Option<Value> {
        None
    }

    /// Argument names whose values gate on approval.
    fn arg_sensitivities(&self) -> Vec<String> {
        Vec::new()
    }

    /// Run the tool.
    async fn execute(&self, args: Value, ctx: &CallContext) -> FleetResult<Value>;
}

/// Registry of every tool one butler serves.
#[derive(Clone)]
pub struct ToolRegistry {
    butler: String,
    tools: Arc<BTreeMap<String, Arc<dyn ButlerTool>>>,
    approvals: Arc<ApprovalLedger>,
}

impl ToolRegistry {
    /// Build a registry for `butler` from its tool set.
    #[must_use]
    pub fn new(butler: impl Into<String>, tools: Vec<Arc<dyn ButlerTool>>) -> Self {
        let map = tools
            .into_iter()
            .map(|t| (t.name().to_owned(), t))
            .collect();
        Self {
            butler: butler.into(),
            tools: Arc::new(map),
            approvals: Arc::new(ApprovalLedger::new()),
        }
    }

    /// The butler this registry belongs to.
    #[must_use]
    pub fn butler(&self) -> &str {
        &self.butler
    }

    /// The approval ledger gating sensitive tools.
    #[must_use]
    pub fn approvals(&self) -> &Arc<ApprovalLedger> {
        &self.approvals
    }

    /// Self-describing definitions of every tool, sorted by name.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_owned(),
                description: t.description().to_owned(),
                input_schema: t.input_schema(),
                output_schema: t.output_schema(),
                arg_sensitivities: t.arg_sensitivities(),
            })
            .collect()
    }

    /// Dispatch one call: resolve the tool, gate sensitivity, execute
    /// under per-call tracing.
    ///
    /// # Errors
    ///
    /// `not_found` for unknown tools, `approval_required` when gated, and
    /// whatever the tool itself raises.
    pub async fn call(&self, name: &str, args: Value) -> FleetResult<ToolCallResult> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| FleetError::not_found(format!("tool {name}")))?;

        let sensitivities = tool.arg_sensitivities();
        if let GateOutcome::Pending(pending) =
            self.approvals.gate(name, &sensitivities, &args)
        {
            return Err(FleetError::ApprovalRequired {
                handle: pending.handle,
                description: pending.description,
            });
        }

        let trace = TraceContext::extract(&args).unwrap_or_default();
        let request_context = args
            .get("request_context")
            .and_then(|v| serde_json::from_value(v.clone()).ok());
        let ctx = CallContext {
            butler: self.butler.clone(),
            trace: trace.clone(),
            request_context,
        };

        let started = Instant::now();
        let outcome = tool.execute(args, &ctx).await;
        let elapsed_ms = started.elapsed().as_millis();
        match &outcome {
            Ok(_) => {
                info!(
                    butler = %self.butler,
                    tool = name,
                    trace_id = %trace.trace_id,
                    elapsed_ms,
                    "tool call ok"
                );
            },
            Err(e) => {
                warn!(
                    butler = %self.butler,
                    tool = name,
                    trace_id = %trace.trace_id,
                    elapsed_ms,
                    error = %e,
                    code = e.code(),
                    "tool call failed"
                );
            },
        }
        outcome.map(ToolCallResult::structured)
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("butler", &self.butler)
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait::async_trait]
    impl ButlerTool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Returns its arguments"
        }
        async fn execute(&self, args: Value, ctx: &CallContext) -> FleetResult<Value> {
            Ok(serde_json::json!({"butler": ctx.butler, "args": args}))
        }
    }

    struct Sensitive;

    #[async_trait::async_trait]
    impl ButlerTool for Sensitive {
        fn name(&self) -> &str {
            "payments.transfer"
        }
        fn description(&self) -> &str {
            "Moves money"
        }
        fn arg_sensitivities(&self) -> Vec<String> {
            vec!["amount".to_owned()]
        }
        async fn execute(&self, _args: Value, _ctx: &CallContext) -> FleetResult<Value> {
            Ok(serde_json::json!({"transferred": true}))
        }
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::new("health", vec![Arc::new(Echo), Arc::new(Sensitive)])
    }

    #[tokio::test]
    async fn call_dispatches_and_wraps_result() {
        let reg = registry();
        let result = reg
            .call("echo", serde_json::json!({"x": 1}))
            .await
            .unwrap();
        let structured = result.structured.unwrap();
        assert_eq!(structured["butler"], "health");
        assert_eq!(structured["args"]["x"], 1);
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let err = registry()
            .call("missing", serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[tokio::test]
    async fn sensitive_tool_requires_approval_then_runs() {
        let reg = registry();
        let err = reg
            .call("payments.transfer", serde_json::json!({"amount": 50}))
            .await
            .unwrap_err();
        let FleetError::ApprovalRequired { handle, .. } = err else {
            panic!("expected approval_required");
        };

        let token = reg.approvals().grant(&handle).unwrap();
        let result = reg
            .call(
                "payments.transfer",
                serde_json::json!({"amount": 50, "_approval_token": token}),
            )
            .await
            .unwrap();
        assert_eq!(result.structured.unwrap()["transferred"], true);
    }

    #[test]
    fn definitions_carry_sensitivity_metadata() {
        let defs = registry().definitions();
        let transfer = defs
            .iter()
            .find(|d| d.name == "payments.transfer")
            .unwrap();
        assert_eq!(transfer.arg_sensitivities, vec!["amount"]);
    }
}
