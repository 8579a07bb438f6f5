//! Authentication error types.

use serde::{Deserialize, Serialize};

/// Reasons a credential can be rejected.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationErrorKind {
    /// Token lifetime has elapsed
    #[display("Token expired")]
    Expired,
    /// Token could not be decoded or its signature did not verify
    #[display("Malformed token: {}", _0)]
    Malformed(String),
    /// Token is bound to a different source address
    #[display("Token presented from an address other than the issuing address")]
    IpMismatch,
    /// Token belongs to a revoked rotation family
    #[display("Token revoked")]
    Revoked,
    /// No token was presented
    #[display("No token presented")]
    Missing,
    /// A rotated-out token was presented for refresh
    #[display("Refresh token reused after rotation")]
    Reused,
    /// Token could not be signed
    #[display("Token issuance failed: {}", _0)]
    Issuance(String),
}

impl AuthenticationErrorKind {
    /// Stable identifier used in audit fields.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::Malformed(_) => "malformed",
            Self::IpMismatch => "ip_mismatch",
            Self::Revoked => "revoked",
            Self::Missing => "missing",
            Self::Reused => "reused",
            Self::Issuance(_) => "issuance",
        }
    }
}

/// Authentication error with location tracking.
///
/// # Examples
///
/// ```
/// use taskward_error::{AuthenticationError, AuthenticationErrorKind};
///
/// let err = AuthenticationError::new(AuthenticationErrorKind::Expired);
/// assert_eq!(err.kind().code(), "expired");
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Authentication Error: {} at line {} in {}", kind, line, file)]
pub struct AuthenticationError {
    /// The kind of error that occurred
    pub kind: AuthenticationErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl AuthenticationError {
    /// Create a new authentication error with automatic location tracking.
    #[track_caller]
    pub fn new(kind: AuthenticationErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }

    /// Get the error kind.
    pub fn kind(&self) -> &AuthenticationErrorKind {
        &self.kind
    }
}

impl From<AuthenticationErrorKind> for AuthenticationError {
    #[track_caller]
    fn from(kind: AuthenticationErrorKind) -> Self {
        Self::new(kind)
    }
}
