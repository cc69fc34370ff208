//! Fleet-wide error taxonomy.
//!
//! Every RPC surface in the fleet (ingress, tool server, routing) maps its
//! failures onto [`FleetError`]. Each variant carries a stable string code
//! so errors survive serialization across process boundaries.

use serde_json::Value;
use thiserror::Error;

/// Errors shared across the butler fleet.
#[derive(Debug, Error)]
pub enum FleetError {
    /// The ingest envelope violated the `ingest.v1` schema. Terminal at the
    /// ingress; the connector must not retry.
    #[error("invalid envelope: {reason}")]
    InvalidEnvelope {
        /// What the envelope violated.
        reason: String,
    },

    /// A butler, tool, or entity lookup failed.
    #[error("not found: {what}")]
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// Self-routing, an unauthorized tool, or a forbidden argument.
    #[error("not permitted: {reason}")]
    NotPermitted {
        /// Why the operation was refused.
        reason: String,
    },

    /// The target butler endpoint refused or timed out.
    #[error("unreachable: {endpoint}: {reason}")]
    Unreachable {
        /// Endpoint that could not be reached.
        endpoint: String,
        /// Transport-level detail.
        reason: String,
    },

    /// Session spawner back-pressure. Retryable.
    #[error("session queue full")]
    QueueFull,

    /// A session or RPC exceeded its deadline.
    #[error("deadline exceeded after {timeout_ms}ms")]
    DeadlineExceeded {
        /// The deadline that expired, in milliseconds.
        timeout_ms: u64,
    },

    /// A gated tool needs human approval before it runs.
    #[error("approval required: {description}")]
    ApprovalRequired {
        /// Opaque handle the approver redeems.
        handle: String,
        /// Human-readable description of what is being asked.
        description: String,
    },

    /// A domain tool failed; the payload is tool-specific.
    #[error("tool error: {message}")]
    Tool {
        /// Tool-reported message.
        message: String,
        /// Tool-specific payload, if any.
        payload: Option<Value>,
    },

    /// A storage operation failed. Retryable.
    #[error("storage error: {0}")]
    Storage(String),

    /// Unexpected failure; logged with its trace id, surfaced sanitized.
    #[error("internal error: {0}")]
    Internal(String),
}

impl FleetError {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidEnvelope { .. } => "invalid_envelope",
            Self::NotFound { .. } => "not_found",
            Self::NotPermitted { .. } => "not_permitted",
            Self::Unreachable { .. } => "unreachable",
            Self::QueueFull => "queue_full",
            Self::DeadlineExceeded { .. } => "deadline_exceeded",
            Self::ApprovalRequired { .. } => "approval_required",
            Self::Tool { .. } => "tool_error",
            Self::Storage(_) => "storage",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether a caller may reasonably retry the same operation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::QueueFull | Self::Storage(_) | Self::Unreachable { .. }
        )
    }

    /// Shorthand for an [`InvalidEnvelope`](Self::InvalidEnvelope).
    #[must_use]
    pub fn invalid_envelope(reason: impl Into<String>) -> Self {
        Self::InvalidEnvelope {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`NotFound`](Self::NotFound).
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Shorthand for a [`NotPermitted`](Self::NotPermitted).
    #[must_use]
    pub fn not_permitted(reason: impl Into<String>) -> Self {
        Self::NotPermitted {
            reason: reason.into(),
        }
    }
}

/// Result type for fleet operations.
pub type FleetResult<T> = Result<T, FleetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            FleetError::invalid_envelope("x").code(),
            "invalid_envelope"
        );
        assert_eq!(FleetError::QueueFull.code(), "queue_full");
        assert_eq!(
            FleetError::DeadlineExceeded { timeout_ms: 10 }.code(),
            "deadline_exceeded"
        );
        assert_eq!(
            FleetError::ApprovalRequired {
                handle: "h".into(),
                description: "d".into()
            }
            .code(),
            "approval_required"
        );
    }

    #[test]
    fn retryability() {
        assert!(FleetError::QueueFull.is_retryable());
        assert!(FleetError::Storage("db down".into()).is_retryable());
        assert!(
            FleetError::Unreachable {
                endpoint: "ws://x".into(),
                reason: "refused".into()
            }
            .is_retryable()
        );
        assert!(!FleetError::invalid_envelope("bad").is_retryable());
        assert!(!FleetError::not_permitted("self route").is_retryable());
    }

    #[test]
    fn display_is_lowercase_prefixed() {
        let e = FleetError::not_found("butler health");
        assert_eq!(e.to_string(), "not found: butler health");
    }
}
