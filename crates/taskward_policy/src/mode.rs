//! Security postures.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use taskward_error::{ConfigError, ConfigErrorKind};

/// The closed set of security postures a process can run under.
///
/// Selected once at startup and never changed for the lifetime of a registry.
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
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SecurityMode {
    /// Velocity first: token presence only, no limits, no audit
    Mvp,
    /// Tenant isolation, hourly tokens, fixed rate limits, security event logging
    Production,
    /// Deny-by-default layered authorization, bound short-lived tokens, full audit
    #[strum(to_string = "high_assurance", serialize = "high-assurance")]
    HighAssurance,
}

impl SecurityMode {
    /// Parse a configured mode name, failing on anything outside the closed set.
    ///
    /// # Errors
    ///
    /// Returns `UnknownMode` for unrecognized names. There is no default.
    ///
    /// # Examples
    ///
    /// ```
    /// use taskward_policy::SecurityMode;
    ///
    /// assert_eq!(SecurityMode::parse("HIGH_ASSURANCE").unwrap(), SecurityMode::HighAssurance);
    /// assert!(SecurityMode::parse("paranoid").is_err());
    /// ```
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        Self::from_str(name.trim())
            .map_err(|_| ConfigError::new(ConfigErrorKind::UnknownMode(name.to_string())))
    }
}
