//! Crate-level error wrapping every failure family.

use crate::{AuditError, AuthenticationError, AuthorizationError, ConfigError, RateLimitError};

/// Crate-level error variants.
#[derive(Debug, derive_more::From, derive_more::Display)]
pub enum TaskwardErrorKind {
    /// Credential rejected
    #[display("{}", _0)]
    Authentication(AuthenticationError),
    /// Operation refused
    #[display("{}", _0)]
    Authorization(AuthorizationError),
    /// Window threshold breached
    #[display("{}", _0)]
    RateLimit(RateLimitError),
    /// Startup configuration invalid
    #[display("{}", _0)]
    Config(ConfigError),
    /// Audit delivery failed
    #[display("{}", _0)]
    Audit(AuditError),
}

/// Taskward error with kind discrimination.
#[derive(Debug)]
pub struct TaskwardError(Box<TaskwardErrorKind>);

impl TaskwardError {
    /// Create a new error from a kind.
    pub fn new(kind: TaskwardErrorKind) -> Self {
        Self(Box::new(kind))
    }

    /// Get the error kind.
    pub fn kind(&self) -> &TaskwardErrorKind {
        &self.0
    }
}

impl std::fmt::Display for TaskwardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Taskward Error: {}", self.0)
    }
}

impl std::error::Error for TaskwardError {}

impl<T> From<T> for TaskwardError
where
    T: Into<TaskwardErrorKind>,
{
    fn from(err: T) -> Self {
        Self::new(err.into())
    }
}

/// Result type for taskward operations.
pub type TaskwardResult<T> = std::result::Result<T, TaskwardError>;
