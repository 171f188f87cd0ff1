use thiserror::Error;

use crate::types::JobId;

/// Rejected scan submission. The message is shown to the caller verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("\"{0}\" is required")]
    Missing(&'static str),
    #[error("\"target\" must be a valid IPv4 address")]
    InvalidTarget,
    #[error("\"scanType\" must be one of [quick, full]")]
    InvalidMode,
}

#[derive(Debug, Error)]
pub enum QueueError {
    /// Storage layer outage. Callers may retry.
    #[error("job queue unavailable: {0}")]
    Unavailable(String),
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("job {id} cannot be resolved from state {from}")]
    InvalidTransition { id: JobId, from: &'static str },
    #[error("job {id} has a corrupt record: {reason}")]
    Corrupt { id: JobId, reason: String },
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Why a scan did not produce a usable report.
///
/// `Display` is the exact text recorded on the failed job; diagnostics live in
/// the variant fields and are only logged.
#[derive(Debug, Error)]
pub enum ScannerError {
    #[error("scanner process failed")]
    Spawn(#[source] std::io::Error),
    #[error("scanner process failed")]
    ProcessFailed { code: Option<i32>, stderr: String },
    #[error("failed to process scan results")]
    Malformed(#[source] serde_json::Error),
    #[error("{0}")]
    Reported(String),
    #[error("scanner timed out")]
    TimedOut,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("webhook returned status {0}")]
    Status(reqwest::StatusCode),
}
