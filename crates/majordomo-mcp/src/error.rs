//! MCP error types and the JSON-RPC error mapping.

use jsonrpsee::types::ErrorObjectOwned;
use majordomo_core::FleetError;
use thiserror::Error;

/// JSON-RPC error codes for the fleet taxonomy.
pub mod error_codes {
    /// Unknown butler, tool, or entity.
    pub const NOT_FOUND: i32 = -32004;
    /// Self-route or unauthorized argument.
    pub const NOT_PERMITTED: i32 = -32003;
    /// Envelope schema violation.
    pub const INVALID_ENVELOPE: i32 = -32602;
    /// Target endpoint refused or timed out.
    pub const UNREACHABLE: i32 = -32010;
    /// Session spawner back-pressure.
    pub const QUEUE_FULL: i32 = -32011;
    /// Deadline expired.
    pub const DEADLINE_EXCEEDED: i32 = -32012;
    /// Sensitive tool awaiting approval.
    pub const APPROVAL_REQUIRED: i32 = -32013;
    /// Domain tool failure.
    pub const TOOL_ERROR: i32 = -32014;
    /// Storage failure.
    pub const STORAGE: i32 = -32015;
    /// Anything unexpected.
    pub const INTERNAL: i32 = -32603;
}

/// Errors raised by the MCP layer itself.
#[derive(Debug, Error)]
pub enum McpError {
    /// The endpoint could not be dialed.
    #[error("connect failed: {endpoint}: {reason}")]
    ConnectFailed {
        /// Endpoint that failed.
        endpoint: String,
        /// Transport detail.
        reason: String,
    },

    /// The server rejected or failed the call.
    #[error(transparent)]
    Fleet(#[from] FleetError),

    /// The server could not be bound.
    #[error("bind failed: {0}")]
    BindFailed(String),

    /// A payload did not match the expected shape.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Result type for MCP operations.
pub type McpResult<T> = Result<T, McpError>;

/// Map a [`FleetError`] to the JSON-RPC error object sent on the wire.
///
/// The taxonomy code rides in `data.code`; approval handles and tool
/// payloads ride alongside it so clients can reconstruct the error.
#[must_use]
pub fn to_rpc_error(err: &FleetError) -> ErrorObjectOwned {
    let numeric = match err {
        FleetError::InvalidEnvelope { .. } => error_codes::INVALID_ENVELOPE,
        FleetError::NotFound { .. } => error_codes::NOT_FOUND,
        FleetError::NotPermitted { .. } => error_codes::NOT_PERMITTED,
        FleetError::Unreachable { .. } => error_codes::UNREACHABLE,
        FleetError::QueueFull => error_codes::QUEUE_FULL,
        FleetError::DeadlineExceeded { .. } => error_codes::DEADLINE_EXCEEDED,
        FleetError::ApprovalRequired { .. } => error_codes::APPROVAL_REQUIRED,
        FleetError::Tool { .. } => error_codes::TOOL_ERROR,
        FleetError::Storage(_) => error_codes::STORAGE,
        FleetError::Internal(_) => error_codes::INTERNAL,
    };
    let mut data = serde_json::json!({ "code": err.code() });
    match err {
        FleetError::ApprovalRequired { handle, .. } => {
            data["handle"] = serde_json::Value::String(handle.clone());
        },
        FleetError::Tool {
            payload: Some(payload),
            ..
        } => {
            data["payload"] = payload.clone();
        },
        FleetError::DeadlineExceeded { timeout_ms } => {
            data["timeout_ms"] = serde_json::json!(timeout_ms);
        },
        _ => {},
    }
    ErrorObjectOwned::owned(numeric, err.to_string(), Some(data))
}

/// Reconstruct a [`FleetError`] from a JSON-RPC error object.
#[must_use]
pub fn from_rpc_error(err: &ErrorObjectOwned) -> FleetError {
    let data: serde_json::Value = err
        .data()
        .and_then(|raw| serde_json::from_str(raw.get()).ok())
        .unwrap_or_default();
    let code = data.get("code").and_then(|c| c.as_str()).unwrap_or("");
    let message = err.message().to_owned();
    match code {
        "invalid_envelope" => FleetError::invalid_envelope(message),
        "not_found" => FleetError::not_found(message),
        "not_permitted" => FleetError::not_permitted(message),
        "unreachable" => FleetError::Unreachable {
            endpoint: String::new(),
            reason: message,
        },
        "queue_full" => FleetError::QueueFull,
        "deadline_exceeded" => FleetError::DeadlineExceeded {
            timeout_ms: data
                .get("timeout_ms")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(0),
        },
        "approval_required" => FleetError::ApprovalRequired {
            handle: data
                .get("handle")
                .and_then(|h| h.as_str())
                .unwrap_or_default()
                .to_owned(),
            description: message,
        },
        "tool_error" => FleetError::Tool {
            message,
            payload: data.get("payload").cloned(),
        },
        "storage" => FleetError::Storage(message),
        _ => FleetError::Internal(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_through_rpc_error() {
        let original = FleetError::ApprovalRequired {
            handle: "appr-1".into(),
            description: "transfer funds".into(),
        };
        let wire = to_rpc_error(&original);
        assert_eq!(wire.code(), error_codes::APPROVAL_REQUIRED);
        let back = from_rpc_error(&wire);
        match back {
            FleetError::ApprovalRequired { handle, .. } => assert_eq!(handle, "appr-1"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn tool_payload_survives() {
        let original = FleetError::Tool {
            message: "lookup failed".into(),
            payload: Some(serde_json::json!({"status": 502})),
        };
        let back = from_rpc_error(&to_rpc_error(&original));
        match back {
            FleetError::Tool { payload, .. } => {
                assert_eq!(payload.unwrap()["status"], 502);
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_code_maps_to_internal() {
        let wire = ErrorObjectOwned::owned(-1, "mystery", None::<()>);
        assert!(matches!(from_rpc_error(&wire), FleetError::Internal(_)));
    }
}
