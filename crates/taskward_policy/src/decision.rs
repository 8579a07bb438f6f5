//! Per-request decisions and the side effects that accompany them.

use crate::audit::{AlertKind, AuditEventKind, AuditFields, AuditRecord, RecordKind, Severity};
use crate::{AuditVerbosity, ErrorDetail, SecurityMode};
use chrono::{DateTime, Utc};
use serde::Serialize;
use taskward_error::{AuthenticationErrorKind, AuthorizationErrorKind, RateLimitErrorKind};

/// Why a request was denied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "category", content = "kind")]
pub enum DenyCause {
    /// Token missing or rejected
    Unauthenticated(AuthenticationErrorKind),
    /// Window threshold breached
    RateLimited(RateLimitErrorKind),
    /// Operation refused
    Forbidden(AuthorizationErrorKind),
}

impl DenyCause {
    /// Caller-facing reason.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "unauthenticated",
            Self::RateLimited(_) => "rate_limited",
            Self::Forbidden(_) => "forbidden",
        }
    }

    /// Transport status a caller should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unauthenticated(_) => 401,
            Self::RateLimited(_) => 429,
            Self::Forbidden(_) => 403,
        }
    }

    /// Stable identifier of the underlying error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated(kind) => kind.code(),
            Self::RateLimited(kind) => kind.code(),
            Self::Forbidden(kind) => kind.code(),
        }
    }

    fn detail(&self) -> String {
        match self {
            Self::Unauthenticated(kind) => kind.to_string(),
            Self::RateLimited(kind) => kind.to_string(),
            Self::Forbidden(kind) => kind.to_string(),
        }
    }
}

/// A denial with its caller-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, derive_getters::Getters)]
pub struct Denial {
    /// Structured cause
    cause: DenyCause,
    /// Message safe to return to the caller under the active mode
    message: String,
}

impl Denial {
    pub(crate) fn new(cause: DenyCause, detail: ErrorDetail) -> Self {
        let message = match detail {
            ErrorDetail::Verbose => format!("{}: {}", cause.reason(), cause.detail()),
            ErrorDetail::Generic => cause.reason().to_string(),
        };
        Self { cause, message }
    }

    /// Caller-facing reason.
    pub fn reason(&self) -> &'static str {
        self.cause.reason()
    }

    /// Transport status a caller should answer with.
    pub fn status_code(&self) -> u16 {
        self.cause.status_code()
    }
}

/// Allow or deny.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Proceed with the operation
    Allow,
    /// Abort with the denial
    Deny(Denial),
}

/// Side effect accompanying a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Directive {
    /// Record an audit event
    Log {
        /// Event kind
        event: AuditEventKind,
        /// Severity
        severity: Severity,
        /// Structured fields
        fields: AuditFields,
    },
    /// Raise an alert
    Alert {
        /// Alert kind
        kind: AlertKind,
        /// Severity
        severity: Severity,
        /// Structured fields
        fields: AuditFields,
    },
}

impl Directive {
    /// Audit record for this directive.
    pub fn to_record(&self, mode: SecurityMode, at: DateTime<Utc>) -> AuditRecord {
        match self {
            Self::Log {
                event,
                severity,
                fields,
            } => AuditRecord::new(mode, RecordKind::Event(*event), *severity, fields.clone(), at),
            Self::Alert {
                kind,
                severity,
                fields,
            } => AuditRecord::new(mode, RecordKind::Alert(*kind), *severity, fields.clone(), at),
        }
    }
}

/// Directives gated by audit verbosity.
#[derive(Debug)]
pub(crate) struct Directives {
    verbosity: AuditVerbosity,
    items: Vec<Directive>,
}

impl Directives {
    pub(crate) fn new(verbosity: AuditVerbosity) -> Self {
        Self {
            verbosity,
            items: Vec::new(),
        }
    }

    pub(crate) fn log(&mut self, event: AuditEventKind, severity: Severity, fields: AuditFields) {
        if self.verbosity.records(event) {
            self.items.push(Directive::Log {
                event,
                severity,
                fields,
            });
        }
    }

    pub(crate) fn alert(&mut self, kind: AlertKind, fields: AuditFields) {
        if self.verbosity.raises_alerts() {
            self.items.push(Directive::Alert {
                kind,
                severity: Severity::Critical,
                fields,
            });
        }
    }

    pub(crate) fn into_vec(self) -> Vec<Directive> {
        self.items
    }
}

/// Outcome of evaluating one request. Never cached or reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, derive_getters::Getters)]
pub struct Decision {
    /// Mode that produced the decision
    mode: SecurityMode,
    /// Allow or deny
    verdict: Verdict,
    /// Side effects, already dispatched to the audit sink
    directives: Vec<Directive>,
}

impl Decision {
    pub(crate) fn new(mode: SecurityMode, verdict: Verdict, directives: Vec<Directive>) -> Self {
        Self {
            mode,
            verdict,
            directives,
        }
    }

    /// Whether the operation may proceed.
    pub fn is_allowed(&self) -> bool {
        self.verdict == Verdict::Allow
    }

    /// The denial, if denied.
    pub fn denial(&self) -> Option<&Denial> {
        match &self.verdict {
            Verdict::Allow => None,
            Verdict::Deny(denial) => Some(denial),
        }
    }

    /// Number of directives of a given event kind.
    pub fn count_events(&self, kind: AuditEventKind) -> usize {
        self.directives
            .iter()
            .filter(|d| matches!(d, Directive::Log { event, .. } if *event == kind))
            .count()
    }

    /// Number of alerts of a given kind.
    pub fn count_alerts(&self, kind: AlertKind) -> usize {
        self.directives
            .iter()
            .filter(|d| matches!(d, Directive::Alert { kind: k, .. } if *k == kind))
            .count()
    }
}
