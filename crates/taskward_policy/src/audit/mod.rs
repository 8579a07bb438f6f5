//! Audit records, alerting and delivery.
//!
//! The registry decides *what* to record from the bundle's [`AuditVerbosity`];
//! the [`AuditSink`] decides *how* records reach a backend without blocking the
//! request path.

mod backend;
mod sink;
mod tracker;

pub use backend::{AuditBackend, JsonLinesBackend, MemoryBackend, TracingBackend};
pub use sink::AuditSink;
pub use tracker::DenialTracker;

use crate::{AuditVerbosity, SecurityMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Structured fields attached to a record.
pub type AuditFields = BTreeMap<String, String>;

/// Record severity.
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
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    /// Routine
    Info,
    /// Security-relevant failure
    Warning,
    /// Requires operator attention
    Critical,
}

/// Security-relevant events.
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
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditEventKind {
    /// Token missing or rejected
    AuthenticationFailed,
    /// Operation refused
    AuthorizationDenied,
    /// Window threshold breached
    RateLimitExceeded,
    /// Operation permitted
    AccessGranted,
    /// Role-mutating request the caller may not make
    PrivilegeEscalationAttempt,
    /// Token issued
    TokenIssued,
    /// Token rotated
    TokenRefreshed,
}

/// Conditions raised to operators.
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
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertKind {
    /// Repeated denials from one identity in a short span
    AuthorizationProbing,
    /// Rotated-out or revoked token presented
    TokenReuse,
    /// A key entered adaptive throttling
    SustainedThrottling,
}

/// What a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// An audited event
    Event(AuditEventKind),
    /// An alert
    Alert(AlertKind),
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Event(kind) => write!(f, "{}", kind),
            Self::Alert(kind) => write!(f, "alert:{}", kind),
        }
    }
}

/// One delivered audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_getters::Getters)]
pub struct AuditRecord {
    /// Unique record id
    id: Uuid,
    /// When the record was produced
    recorded_at: DateTime<Utc>,
    /// Mode that produced it
    mode: SecurityMode,
    /// Event or alert kind
    kind: RecordKind,
    /// Severity
    severity: Severity,
    /// Structured fields
    fields: AuditFields,
}

impl AuditRecord {
    /// Create a record stamped with a fresh id.
    pub fn new(
        mode: SecurityMode,
        kind: RecordKind,
        severity: Severity,
        fields: AuditFields,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            recorded_at,
            mode,
            kind,
            severity,
            fields,
        }
    }

    /// Field value by name.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

impl AuditVerbosity {
    /// Whether events of `kind` are recorded at this verbosity.
    pub fn records(self, kind: AuditEventKind) -> bool {
        match self {
            Self::None => false,
            Self::SecurityEvents => matches!(
                kind,
                AuditEventKind::AuthenticationFailed
                    | AuditEventKind::AuthorizationDenied
                    | AuditEventKind::RateLimitExceeded
            ),
            Self::Full => true,
        }
    }

    /// Whether alerts are raised at this verbosity.
    pub fn raises_alerts(self) -> bool {
        self == Self::Full
    }
}
