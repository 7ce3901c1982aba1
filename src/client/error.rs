use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Retry hint attached to a single timed-out attempt.
pub const TIMEOUT_RETRY_AFTER: Duration = Duration::from_secs(5);
/// Retry hint attached once the whole backoff schedule is spent.
pub const EXHAUSTED_RETRY_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("request to {target} timed out after {timeout_ms}ms")]
    Timeout {
        target: String,
        timeout_ms: u64,
        retry_after: Duration,
    },
    #[error("network error calling {target}: {message}")]
    Network { target: String, message: String },
    #[error("{target} responded with status {status}")]
    Status { target: String, status: u16 },
    #[error("{target} rejected the request with status {status}")]
    Rejected {
        target: String,
        status: u16,
        body: Value,
    },
    #[error("invalid response from {target}: {message}")]
    Decode { target: String, message: String },
    #[error("request to {target} was cancelled")]
    Cancelled { target: String },
    #[error("{target} unavailable after {attempts} attempts: {cause}")]
    Exhausted {
        target: String,
        attempts: u32,
        cause: Box<ClientError>,
        retry_after: Duration,
    },
}

impl ClientError {
    pub fn timeout(target: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            target: target.into(),
            timeout_ms,
            retry_after: TIMEOUT_RETRY_AFTER,
        }
    }

    pub fn cancelled(target: impl Into<String>) -> Self {
        Self::Cancelled {
            target: target.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Network { .. } | Self::Status { .. } | Self::Decode { .. }
        )
    }

    /// True for a timeout, including one that ended a spent retry schedule.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Exhausted { cause, .. } => cause.is_timeout(),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Timeout { retry_after, .. } | Self::Exhausted { retry_after, .. } => {
                Some(*retry_after)
            }
            _ => None,
        }
    }
}
