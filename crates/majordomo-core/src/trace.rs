//! Trace-context propagation across butlers.
//!
//! Every inbound message mints (or inherits) a [`TraceContext`]. The
//! switchboard embeds it in tool-call arguments under the reserved
//! `_trace_context` key so that a sub-route on another butler logs under
//! the same trace.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Reserved argument key under which the trace context travels.
pub const TRACE_CONTEXT_ARG: &str = "_trace_context";

/// A trace id plus optional parent span, carried across process boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    /// Identifier shared by every operation descending from one trigger.
    pub trace_id: Uuid,
    /// The span this operation descends from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<Uuid>,
}

impl TraceContext {
    /// Start a fresh trace.
    #[must_use]
    pub fn new() -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            parent_span_id: None,
        }
    }

    /// Derive a child context: same trace, new parent span.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            parent_span_id: Some(Uuid::new_v4()),
        }
    }

    /// Embed this context into a JSON argument object.
    ///
    /// Non-object `args` are left untouched — tool arguments are objects by
    /// contract and anything else would not survive schema validation anyway.
    pub fn embed(&self, args: &mut Value) {
        if let Value::Object(map) = args {
            if let Ok(ctx) = serde_json::to_value(self) {
                map.insert(TRACE_CONTEXT_ARG.to_owned(), ctx);
            }
        }
    }

    /// Extract a context from a JSON argument object, if present.
    #[must_use]
    pub fn extract(args: &Value) -> Option<Self> {
        args.get(TRACE_CONTEXT_ARG)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.trace_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_keeps_trace_id() {
        let parent = TraceContext::new();
        let child = parent.child();
        assert_eq!(parent.trace_id, child.trace_id);
        assert!(child.parent_span_id.is_some());
    }

    #[test]
    fn embed_extract_roundtrip() {
        let ctx = TraceContext::new().child();
        let mut args = serde_json::json!({"key": "value"});
        ctx.embed(&mut args);
        let back = TraceContext::extract(&args).unwrap();
        assert_eq!(ctx, back);
        // Original argument untouched.
        assert_eq!(args["key"], "value");
    }

    #[test]
    fn embed_into_non_object_is_noop() {
        let ctx = TraceContext::new();
        let mut args = serde_json::json!("scalar");
        ctx.embed(&mut args);
        assert_eq!(args, serde_json::json!("scalar"));
    }

    #[test]
    fn extract_missing_returns_none() {
        assert!(TraceContext::extract(&serde_json::json!({})).is_none());
    }
}
