//! Error taxonomy for the monitoring core
//!
//! Only [`MonitorError::InvalidInput`] and [`MonitorError::SubmissionFailure`]
//! are ever surfaced to callers as hard failures. Per-device problems are
//! recorded as a [`ProbeError`] inside the batch result, and per-connection
//! problems are handled by pruning the connection.

use serde::Serialize;

/// Result type alias for monitoring operations
pub type MonitorResult<T> = Result<T, MonitorError>;

/// Errors returned by the monitoring core
///
/// The enum is `Clone` so a single failed recomputation can be handed to
/// every caller waiting on it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MonitorError {
    /// Malformed request parameters (device ids, concurrency, ttl)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A unit of work could not be handed to any execution context
    #[error("failed to dispatch async work: {0}")]
    DispatchFailure(String),

    /// A connection could not receive a message
    #[error("failed to deliver message to connection {connection}: {reason}")]
    DeliveryFailure { connection: String, reason: String },

    /// The task queue rejected or failed a job submission
    #[error("failed to submit job '{job}': {reason}")]
    SubmissionFailure { job: String, reason: String },

    /// The device inventory could not be read
    #[error("device registry error: {0}")]
    Registry(String),

    /// Requested entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Anything else (join errors, poisoned state)
    #[error("internal error: {0}")]
    Internal(String),
}

impl MonitorError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        MonitorError::InvalidInput(msg.into())
    }

    pub fn submission(job: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        MonitorError::SubmissionFailure {
            job: job.into(),
            reason: reason.to_string(),
        }
    }
}

/// Why a single device check ended up offline
///
/// Timeouts and transport failures both degrade the device to offline but
/// keep their own kind, so dashboards can tell a hung BMC from a refused
/// connection.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProbeError {
    /// The check exceeded its deadline
    #[error("check timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// The check ran and failed (refused, unreachable, task panic)
    #[error("check failed: {0}")]
    Failure(String),

    /// The identifier is not in the device inventory
    #[error("device not found")]
    NotFound,

    /// The device has no address for the requested probe target
    #[error("device has no {0} address")]
    MissingAddress(String),
}
