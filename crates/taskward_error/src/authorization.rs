//! Authorization error types.

use serde::{Deserialize, Serialize};

/// Reasons an authenticated identity can be refused an operation.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationErrorKind {
    /// Resource belongs to another organization
    #[display("Resource belongs to a different organization")]
    OrgMismatch,
    /// Role lacks the capability for the operation
    #[display("Role is not permitted to perform this operation")]
    RoleDenied,
    /// Identity is neither owner, assignee nor admin
    #[display("Identity does not own this resource")]
    OwnershipDenied,
    /// Identity tried to grant a role it may not grant
    #[display("Attempted to grant a role above the caller's own")]
    EscalationAttempt,
}

impl AuthorizationErrorKind {
    /// Stable identifier used in audit fields.
    pub fn code(&self) -> &'static str {
        match self {
            Self::OrgMismatch => "org_mismatch",
            Self::RoleDenied => "role_denied",
            Self::OwnershipDenied => "ownership_denied",
            Self::EscalationAttempt => "escalation_attempt",
        }
    }
}

/// Authorization error with location tracking.
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Authorization Error: {} at line {} in {}", kind, line, file)]
pub struct AuthorizationError {
    /// The kind of error that occurred
    pub kind: AuthorizationErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl AuthorizationError {
    /// Create a new authorization error with automatic location tracking.
    #[track_caller]
    pub fn new(kind: AuthorizationErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }

    /// Get the error kind.
    pub fn kind(&self) -> AuthorizationErrorKind {
        self.kind
    }
}
