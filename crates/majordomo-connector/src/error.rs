//! Connector error types.

use std::time::Duration;

use thiserror::Error;

/// Errors raised inside a connector process.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// The checkpoint file could not be read or written.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// The switchboard rejected the envelope permanently.
    #[error("envelope rejected: {0}")]
    Rejected(String),

    /// The switchboard could not be reached; retryable.
    #[error("ingress unreachable: {0}")]
    IngressUnreachable(String),

    /// The source failed transiently; retry after backoff.
    #[error("source error (transient): {reason}")]
    SourceTransient {
        /// What went wrong.
        reason: String,
        /// Source-provided retry hint, honored over computed backoff.
        retry_after: Option<Duration>,
    },

    /// The source failed persistently; the connector degrades.
    #[error("source error (persistent): {0}")]
    SourcePersistent(String),

    /// The runtime is shutting down.
    #[error("shutting down")]
    ShuttingDown,
}

impl ConnectorError {
    /// Whether the operation may be retried locally.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::IngressUnreachable(_) | Self::SourceTransient { .. }
        )
    }
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;
