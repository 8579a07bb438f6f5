//! Configuration error types.

/// Kinds of startup configuration failures. None of these are recoverable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum ConfigErrorKind {
    /// Mode is unset or outside the closed set of security modes
    #[display("Unknown security mode '{}'", _0)]
    UnknownMode(String),
    /// A policy bundle is missing a parameter its mode requires
    #[display("Incomplete policy bundle: {}", _0)]
    IncompleteBundle(String),
    /// Configuration sources could not be read or parsed
    #[display("Failed to load configuration: {}", _0)]
    Load(String),
}

/// Configuration error with location tracking.
///
/// # Examples
///
/// ```
/// use taskward_error::{ConfigError, ConfigErrorKind};
///
/// let err = ConfigError::new(ConfigErrorKind::UnknownMode("paranoid".to_string()));
/// assert!(format!("{}", err).contains("paranoid"));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Configuration Error: {} at line {} in {}", kind, line, file)]
pub struct ConfigError {
    /// The kind of error that occurred
    pub kind: ConfigErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl ConfigError {
    /// Create a new configuration error with automatic location tracking.
    #[track_caller]
    pub fn new(kind: ConfigErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }

    /// Get the error kind.
    pub fn kind(&self) -> &ConfigErrorKind {
        &self.kind
    }
}
