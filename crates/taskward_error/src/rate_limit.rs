//! Error types for rate limiting.

use serde::{Deserialize, Serialize};

/// Error kinds for rate limiting.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitErrorKind {
    /// Window counter passed the effective threshold.
    #[display(
        "Rate limit exceeded for {key}: {count} requests against a threshold of {threshold}, retry after {retry_after_secs}s"
    )]
    ThresholdExceeded {
        /// Window key that breached
        key: String,
        /// Requests counted in the current window
        count: u32,
        /// Effective threshold at the time of the breach
        threshold: u32,
        /// Seconds until the window resets
        retry_after_secs: u64,
    },
}

impl RateLimitErrorKind {
    /// Stable identifier used in audit fields.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ThresholdExceeded { .. } => "threshold_exceeded",
        }
    }
}

/// Rate limiting error with location tracking.
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Rate Limit Error: {} at line {} in {}", kind, line, file)]
pub struct RateLimitError {
    kind: RateLimitErrorKind,
    line: u32,
    file: &'static str,
}

impl RateLimitError {
    /// Create a new rate limiting error with automatic location tracking.
    #[track_caller]
    pub fn new(kind: RateLimitErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }

    /// Get the error kind.
    pub fn kind(&self) -> &RateLimitErrorKind {
        &self.kind
    }
}

impl<T> From<T> for RateLimitError
where
    T: Into<RateLimitErrorKind>,
{
    #[track_caller]
    fn from(err: T) -> Self {
        Self::new(err.into())
    }
}
