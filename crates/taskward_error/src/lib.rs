//! Error types for the taskward security policy engine.
//!
//! Every failure family carries a discriminating kind plus the source location
//! where the error was raised. Per-request families (authentication,
//! authorization, rate limiting) are recovered by the policy registry and turned
//! into denials; configuration errors abort startup.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod audit;
mod authentication;
mod authorization;
mod config;
mod error;
mod rate_limit;

pub use audit::{AuditError, AuditErrorKind};
pub use authentication::{AuthenticationError, AuthenticationErrorKind};
pub use authorization::{AuthorizationError, AuthorizationErrorKind};
pub use config::{ConfigError, ConfigErrorKind};
pub use error::{TaskwardError, TaskwardErrorKind, TaskwardResult};
pub use rate_limit::{RateLimitError, RateLimitErrorKind};
