//! Scheduler error types.

use thiserror::Error;

/// Errors raised while parsing or evaluating schedules.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// The spec is neither a five-field cron expression nor an RFC 3339
    /// instant.
    #[error("invalid schedule spec {spec:?}: {reason}")]
    InvalidSpec {
        /// The offending spec.
        spec: String,
        /// Parser detail.
        reason: String,
    },

    /// The timezone name is not a known IANA zone.
    #[error("unknown timezone {0:?}")]
    UnknownTimezone(String),

    /// The task store failed.
    #[error(transparent)]
    Storage(#[from] majordomo_storage::StorageError),
}

/// Result type for scheduler operations.
pub type ScheduleResult<T> = Result<T, ScheduleError>;
