//! Startup configuration.
//!
//! Sources are layered with the `config` crate: an optional TOML file, then
//! `TASKWARD_*` environment variables (nested keys separated by `__`, e.g.
//! `TASKWARD_TUNING__ADAPTIVE__COOLDOWN_SECS`). Every failure here is fatal.

use crate::audit::{AuditBackend, JsonLinesBackend, MemoryBackend, TracingBackend};
use crate::observability::ObservabilityConfig;
use crate::{AdaptiveTuning, AlertTuning, PolicyBundle, SecurityMode};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use taskward_error::{ConfigError, ConfigErrorKind};
use tracing::{debug, info, instrument};

/// Minimum signing secret length outside MVP, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "taskward.toml";

/// Where audit records are delivered.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditBackendKind {
    /// Structured `tracing` events
    #[default]
    Tracing,
    /// Append-only JSON lines file
    JsonLines,
    /// In-process buffer
    Memory,
}

/// `[audit]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, derive_getters::Getters)]
pub struct AuditConfig {
    /// Backend to deliver to
    #[serde(default)]
    backend: AuditBackendKind,
    /// File path for the JSON lines backend
    #[serde(default)]
    path: Option<PathBuf>,
}

/// `[tuning]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, derive_getters::Getters)]
pub struct TuningConfig {
    /// Adaptive throttling tunables
    #[serde(default)]
    adaptive: AdaptiveTuning,
    /// Alert heuristic tunables
    #[serde(default)]
    alerts: AlertTuning,
}

/// Engine configuration as read from file and environment.
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    derive_getters::Getters,
    derive_setters::Setters,
)]
#[setters(prefix = "with_", strip_option, into)]
pub struct EngineConfig {
    /// Security mode name
    #[serde(default)]
    mode: Option<String>,
    /// Token signing secret
    #[serde(default, skip_serializing)]
    signing_secret: Option<String>,
    /// Tunables
    #[serde(default)]
    tuning: TuningConfig,
    /// Audit delivery
    #[serde(default)]
    audit: AuditConfig,
    /// Metrics export
    #[serde(default)]
    observability: ObservabilityConfig,
}

impl EngineConfig {
    /// Load configuration from `path` (or `taskward.toml` if present) and the environment.
    ///
    /// # Errors
    ///
    /// `Load` if an explicit file is missing or any source fails to parse.
    #[instrument]
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let config = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("TASKWARD")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| ConfigError::new(ConfigErrorKind::Load(e.to_string())))?;
        let loaded: Self = config
            .try_deserialize()
            .map_err(|e| ConfigError::new(ConfigErrorKind::Load(e.to_string())))?;
        debug!(mode = ?loaded.mode, backend = %loaded.audit.backend, "Configuration loaded");
        Ok(loaded)
    }

    /// Resolve the configured mode.
    ///
    /// # Errors
    ///
    /// `UnknownMode` when unset or unrecognized; there is no default mode.
    pub fn security_mode(&self) -> Result<SecurityMode, ConfigError> {
        let name = self.mode.as_deref().ok_or_else(|| {
            ConfigError::new(ConfigErrorKind::UnknownMode("<unset>".to_string()))
        })?;
        SecurityMode::parse(name)
    }

    /// Build and validate the bundle for the configured mode and tunables.
    ///
    /// # Errors
    ///
    /// `UnknownMode`, or `IncompleteBundle` when the bundle or secret is inadequate.
    #[instrument(skip(self))]
    pub fn bundle(&self) -> Result<PolicyBundle, ConfigError> {
        let mode = self.security_mode()?;
        let bundle = PolicyBundle::with_tuning(mode, self.tuning.adaptive, self.tuning.alerts);
        bundle.validate()?;
        check_secret(mode, self.secret()?)?;
        info!(mode = %mode, "Policy bundle resolved");
        Ok(bundle)
    }

    /// Signing secret bytes.
    ///
    /// # Errors
    ///
    /// `IncompleteBundle` when no secret is configured.
    pub fn secret(&self) -> Result<&[u8], ConfigError> {
        self.signing_secret
            .as_deref()
            .map(str::as_bytes)
            .ok_or_else(|| {
                ConfigError::new(ConfigErrorKind::IncompleteBundle(
                    "signing_secret is not set".to_string(),
                ))
            })
    }

    /// Construct the configured audit backend.
    ///
    /// # Errors
    ///
    /// `IncompleteBundle` when the JSON lines backend has no path.
    pub fn audit_backend(&self) -> Result<Arc<dyn AuditBackend>, ConfigError> {
        let backend: Arc<dyn AuditBackend> = match self.audit.backend {
            AuditBackendKind::Tracing => Arc::new(TracingBackend),
            AuditBackendKind::Memory => Arc::new(MemoryBackend::new()),
            AuditBackendKind::JsonLines => {
                let path = self.audit.path.clone().ok_or_else(|| {
                    ConfigError::new(ConfigErrorKind::IncompleteBundle(
                        "audit.path is required for the json_lines backend".to_string(),
                    ))
                })?;
                Arc::new(JsonLinesBackend::new(path))
            }
        };
        Ok(backend)
    }
}

/// Reject secrets too weak for the mode.
///
/// # Errors
///
/// `IncompleteBundle` for an empty secret, or one shorter than
/// [`MIN_SECRET_LEN`] outside MVP.
pub fn check_secret(mode: SecurityMode, secret: &[u8]) -> Result<(), ConfigError> {
    if secret.is_empty() {
        return Err(ConfigError::new(ConfigErrorKind::IncompleteBundle(
            "signing_secret is empty".to_string(),
        )));
    }
    if mode != SecurityMode::Mvp && secret.len() < MIN_SECRET_LEN {
        return Err(ConfigError::new(ConfigErrorKind::IncompleteBundle(format!(
            "signing_secret must be at least {} bytes in {} mode",
            MIN_SECRET_LEN, mode
        ))));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::MetricsExporter;
    use std::io::Write;

    const SECRET: &str = "config-test-signing-secret-32-bytes!";

    #[test]
    fn test_unset_mode_is_fatal() {
        let err = EngineConfig::default()
            .with_signing_secret(SECRET)
            .bundle()
            .unwrap_err();
        assert!(matches!(err.kind(), ConfigErrorKind::UnknownMode(_)));
    }

    #[test]
    fn test_unknown_mode_is_fatal() {
        let err = EngineConfig::default()
            .with_mode("paranoid")
            .with_signing_secret(SECRET)
            .bundle()
            .unwrap_err();
        assert_eq!(
            err.kind(),
            &ConfigErrorKind::UnknownMode("paranoid".to_string())
        );
    }

    #[test]
    fn test_short_secret_rejected_outside_mvp() {
        let config = EngineConfig::default()
            .with_mode("production")
            .with_signing_secret("short");
        assert!(matches!(
            config.bundle().unwrap_err().kind(),
            ConfigErrorKind::IncompleteBundle(_)
        ));
        assert!(config.with_mode("mvp").bundle().is_ok());
    }

    #[test]
    fn test_json_lines_requires_path() {
        let mut config = EngineConfig::default();
        config.audit.backend = AuditBackendKind::JsonLines;
        assert!(config.audit_backend().is_err());
        config.audit.path = Some(PathBuf::from("audit.jsonl"));
        assert!(config.audit_backend().is_ok());
    }

    #[test]
    fn test_load_reads_toml_tables() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
mode = "high_assurance"
signing_secret = "{SECRET}"

[tuning.adaptive]
breach_trigger = 2
cooldown_secs = 120

[tuning.alerts]
denial_threshold = 4

[audit]
backend = "memory"
"#
        )
        .unwrap();

        let config = EngineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.audit().backend(), &AuditBackendKind::Memory);

        let bundle = config.bundle().unwrap();
        assert_eq!(bundle.mode(), &SecurityMode::HighAssurance);
        let adaptive = bundle.rate_limit().adaptive_tuning().unwrap();
        assert_eq!(*adaptive.breach_trigger(), 2);
        assert_eq!(*adaptive.observation_windows(), 5);
        assert_eq!(*adaptive.cooldown_secs(), 120);
        assert_eq!(*bundle.alerts().denial_threshold(), 4);
        assert_eq!(*bundle.alerts().denial_window_secs(), 60);
    }

    #[test]
    fn test_oversized_cooldown_fails_at_startup() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
mode = "high_assurance"
signing_secret = "{SECRET}"

[tuning.adaptive]
cooldown_secs = 9223372036854775807
"#
        )
        .unwrap();

        let config = EngineConfig::load(Some(file.path())).unwrap();
        assert!(matches!(
            config.bundle().unwrap_err().kind(),
            ConfigErrorKind::IncompleteBundle(_)
        ));
    }

    #[test]
    fn test_observability_table_selects_exporter() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
mode = "production"

[observability]
exporter = "otlp"
endpoint = "http://collector:4318"
export_interval_secs = 15
"#
        )
        .unwrap();

        let config = EngineConfig::load(Some(file.path())).unwrap();
        let observability = config.observability();
        assert_eq!(*observability.exporter(), MetricsExporter::Otlp);
        assert_eq!(observability.otlp_endpoint(), "http://collector:4318");
        assert_eq!(*observability.export_interval_secs(), 15);
    }

    #[test]
    fn test_observability_defaults_to_disabled() {
        let observability = EngineConfig::default().observability().clone();
        assert_eq!(*observability.exporter(), MetricsExporter::Disabled);
        assert_eq!(*observability.export_interval_secs(), 60);
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let err = EngineConfig::load(Some(Path::new("/nonexistent/taskward.toml"))).unwrap_err();
        assert!(matches!(err.kind(), ConfigErrorKind::Load(_)));
    }
}
