use std::time::Duration;
use thiserror::Error;

/// Result type for venue operations.
pub type MexcResult<T> = Result<T, MexcError>;

/// Errors surfaced by the connectivity core.
///
/// Each variant carries the operation that failed plus enough context
/// (symbol, order id, venue code) to diagnose without re-running at a
/// higher verbosity.
#[derive(Debug, Error)]
pub enum MexcError {
    /// Caller input rejected before any network activity. Never retried.
    #[error("{operation}: invalid input: {reason}")]
    Validation {
        operation: &'static str,
        reason: String,
    },

    /// A request could not be signed (missing secret, reserved parameter).
    /// Structural defect, never retried.
    #[error("request cannot be signed: {0}")]
    InvalidRequest(String),

    /// The local rate budget would require waiting longer than the
    /// configured ceiling. The caller is expected to back off further.
    #[error("rate budget exhausted: next slot in {would_wait:?} exceeds ceiling {ceiling:?}")]
    RateLimitExceeded {
        would_wait: Duration,
        ceiling: Duration,
    },

    /// Transient venue or network fault (timeout, 5xx, venue-side 429).
    /// Retried internally; only visible when produced inside a retry loop.
    #[error("{operation}: transient venue failure: {reason}")]
    Recoverable {
        operation: &'static str,
        reason: String,
    },

    /// A transient fault persisted through the whole retry budget.
    #[error("{operation}: giving up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        last_error: String,
    },

    /// Permanent venue rejection (auth failure, bad request). Never retried.
    #[error("{operation}: venue rejected request (code {code:?}): {message}")]
    Terminal {
        operation: &'static str,
        code: Option<i64>,
        message: String,
    },

    /// Missing or malformed startup configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl MexcError {
    pub fn validation(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            operation,
            reason: reason.into(),
        }
    }

    pub fn recoverable(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Recoverable {
            operation,
            reason: reason.into(),
        }
    }

    pub fn terminal(operation: &'static str, code: Option<i64>, message: impl Into<String>) -> Self {
        Self::Terminal {
            operation,
            code,
            message: message.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    /// Whether the retry helper may re-attempt the failed operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Recoverable { .. })
    }
}
