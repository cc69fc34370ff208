//! Request context handed to sessions and tools.

use serde::{Deserialize, Serialize};

use crate::envelope::IngestEnvelope;
use crate::trace::TraceContext;
use crate::types::RequestId;

/// The originating-request block a session (and its tool calls) carries.
///
/// Lets a butler reply on the channel the message came in on, and keeps
/// everything the session does under the original trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// The accepted inbox row this work descends from.
    pub request_id: RequestId,
    /// Channel the message arrived on (`telegram`, `email`, …).
    pub source_channel: String,
    /// Sender identity on that channel.
    pub source_sender_identity: String,
    /// Trace the work runs under.
    pub trace_context: TraceContext,
}

impl RequestContext {
    /// Build a context for an accepted envelope.
    #[must_use]
    pub fn for_envelope(request_id: RequestId, env: &IngestEnvelope) -> Self {
        Self {
            request_id,
            source_channel: env.source.channel.as_str().to_owned(),
            source_sender_identity: env.sender.identity.clone(),
            trace_context: env.control.trace_context.child(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Channel, Provider};

    #[test]
    fn context_inherits_trace() {
        let env = IngestEnvelope::builder(Channel::Api, Provider::Internal, "api:test")
            .external_event_id("e1")
            .sender("ops")
            .raw(serde_json::json!({"k": 1}))
            .normalized_text("ping")
            .build();
        let id = RequestId::new();
        let ctx = RequestContext::for_envelope(id, &env);
        assert_eq!(ctx.request_id, id);
        assert_eq!(ctx.source_channel, "api");
        assert_eq!(ctx.trace_context.trace_id, env.control.trace_context.trace_id);
        assert!(ctx.trace_context.parent_span_id.is_some());
    }
}
