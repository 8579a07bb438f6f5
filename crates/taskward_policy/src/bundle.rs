//! Policy bundles: one coherent set of security parameters per mode.
//!
//! Every mode-dependent behavior in the engine reads one of these fields.
//! The enforcement path and the introspection surface share the same bundle,
//! and the list of active controls is computed from its parameters rather than
//! declared alongside them.

use crate::SecurityMode;
use serde::{Deserialize, Serialize};
use taskward_error::{ConfigError, ConfigErrorKind};
use tracing::{debug, instrument};

/// Fixed rate-limit window length.
pub const RATE_WINDOW_SECS: u64 = 60;

/// How tokens are tied to facts beyond signature and expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenBinding {
    /// Token valid from any address
    None,
    /// Token valid only from the issuing address
    IpBound,
}

/// Token lifetime and binding rules.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_getters::Getters, derive_new::new,
)]
pub struct TokenPolicy {
    /// Lifetime in seconds; `None` means no expiry is enforced
    ttl_secs: Option<u64>,
    /// Binding requirement
    binding: TokenBinding,
    /// Whether rotated-out refresh tokens are tracked and reuse revokes the family
    reuse_detection: bool,
}

/// How strictly object-level access is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStrictness {
    /// Token presence only
    None,
    /// Organization match plus owner/admin for mutations
    ObjectOwnerCheck,
    /// Organization, role capability and visibility layers, deny-by-default
    MultiLayer,
}

/// Adaptive throttling tunables.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    derive_getters::Getters,
    derive_setters::Setters,
)]
#[setters(prefix = "with_")]
pub struct AdaptiveTuning {
    /// Breaches tolerated within the observation span before throttling
    #[serde(default = "default_breach_trigger")]
    breach_trigger: u32,
    /// Number of rate windows making up the observation span
    #[serde(default = "default_observation_windows")]
    observation_windows: u32,
    /// How long a throttled key stays at half threshold
    #[serde(default = "default_cooldown_secs")]
    cooldown_secs: u64,
}

impl Default for AdaptiveTuning {
    fn default() -> Self {
        Self {
            breach_trigger: default_breach_trigger(),
            observation_windows: default_observation_windows(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

fn default_breach_trigger() -> u32 {
    3
}

fn default_observation_windows() -> u32 {
    5
}

fn default_cooldown_secs() -> u64 {
    300
}

/// Rate limiting parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_getters::Getters)]
pub struct RateLimitPolicy {
    /// Requests per window; `None` skips the limiter entirely
    threshold: Option<u32>,
    /// Window length in seconds
    window_secs: u64,
    /// Whether adaptive throttling applies
    adaptive: bool,
    /// Adaptive throttling tunables
    tuning: AdaptiveTuning,
}

impl RateLimitPolicy {
    /// Tuning to hand the limiter, present only when adaptivity is on.
    pub fn adaptive_tuning(&self) -> Option<&AdaptiveTuning> {
        self.adaptive.then_some(&self.tuning)
    }
}

/// What the audit sink records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditVerbosity {
    /// Nothing
    None,
    /// Authentication failures, authorization denials, rate-limit breaches
    SecurityEvents,
    /// Everything above, every allow, and alerts
    Full,
}

/// Alerting heuristics tunables.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    derive_getters::Getters,
    derive_setters::Setters,
)]
#[setters(prefix = "with_")]
pub struct AlertTuning {
    /// Denials from one identity that trigger a probing alert
    #[serde(default = "default_denial_threshold")]
    denial_threshold: u32,
    /// Span the denials must fall within
    #[serde(default = "default_denial_window_secs")]
    denial_window_secs: u64,
}

impl Default for AlertTuning {
    fn default() -> Self {
        Self {
            denial_threshold: default_denial_threshold(),
            denial_window_secs: default_denial_window_secs(),
        }
    }
}

fn default_denial_threshold() -> u32 {
    5
}

fn default_denial_window_secs() -> u64 {
    60
}

/// How much internal detail a denial exposes to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorDetail {
    /// Full internal reason
    Verbose,
    /// Generic reason only
    Generic,
}

/// Enumerated controls, derived from bundle parameters.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Control {
    /// Requests must carry a validly signed token
    TokenSignature,
    /// Tokens expire
    TokenExpiry,
    /// Tokens are bound to the issuing address
    IpBinding,
    /// Refresh token reuse revokes the rotation family
    RefreshReuseDetection,
    /// Per-identity request windows
    RateLimiting,
    /// Repeat offenders get halved thresholds for a cooldown
    AdaptiveThrottling,
    /// Resources are only reachable within their organization
    OrganizationIsolation,
    /// Mutations require ownership or admin role
    OwnershipCheck,
    /// Operations are checked against a role capability table
    RoleCapabilities,
    /// Private resources are hidden from non-parties
    VisibilityEnforcement,
    /// Absence of an explicit permit is a denial
    DenyByDefault,
    /// Security-relevant failures are logged
    SecurityEventLogging,
    /// Every allowed request is logged
    FullAuditTrail,
    /// Probing, token reuse and sustained throttling raise alerts
    SecurityAlerting,
    /// Denials hide internal detail from callers
    GenericErrors,
}

/// Longest cooldown or alert window a bundle accepts.
const MAX_TUNABLE_SECS: u64 = 24 * 60 * 60;

/// Most rate windows an observation span may cover.
const MAX_OBSERVATION_WINDOWS: u32 = (MAX_TUNABLE_SECS / RATE_WINDOW_SECS) as u32;

/// Complete parameter set for one security mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_getters::Getters)]
pub struct PolicyBundle {
    /// Mode this bundle belongs to
    mode: SecurityMode,
    /// Token lifetime and binding
    token: TokenPolicy,
    /// Authorization strictness
    authorization: AuthorizationStrictness,
    /// Rate limiting
    rate_limit: RateLimitPolicy,
    /// Audit verbosity
    audit: AuditVerbosity,
    /// Alert heuristics
    alerts: AlertTuning,
    /// Denial detail exposed to callers
    error_detail: ErrorDetail,
    /// Risks knowingly accepted by this mode
    known_risks: Vec<String>,
    /// Qualitative performance and operational cost notes
    operational_notes: Vec<String>,
}

impl PolicyBundle {
    /// Build the preset for a mode with default tunables.
    pub fn for_mode(mode: SecurityMode) -> Self {
        Self::with_tuning(mode, AdaptiveTuning::default(), AlertTuning::default())
    }

    /// Build the preset for a mode with explicit tunables.
    pub fn with_tuning(mode: SecurityMode, adaptive: AdaptiveTuning, alerts: AlertTuning) -> Self {
        match mode {
            SecurityMode::Mvp => Self {
                mode,
                token: TokenPolicy::new(None, TokenBinding::None, false),
                authorization: AuthorizationStrictness::None,
                rate_limit: RateLimitPolicy {
                    threshold: None,
                    window_secs: RATE_WINDOW_SECS,
                    adaptive: false,
                    tuning: adaptive,
                },
                audit: AuditVerbosity::None,
                alerts,
                error_detail: ErrorDetail::Verbose,
                known_risks: vec![
                    "Cross-organization object access (BOLA/IDOR): any valid token reaches any resource by id".to_string(),
                    "Tokens never expire; a stolen token is valid indefinitely".to_string(),
                    "No rate limiting; enumeration and brute force are unthrottled".to_string(),
                    "No audit trail; abuse leaves no security record".to_string(),
                    "Denials expose internal error detail to callers".to_string(),
                ],
                operational_notes: vec![
                    "Cheapest mode: one signature check per request, no shared state touched".to_string(),
                    "Suitable for local development and demonstrations only".to_string(),
                ],
            },
            SecurityMode::Production => Self {
                mode,
                token: TokenPolicy::new(Some(60 * 60), TokenBinding::None, false),
                authorization: AuthorizationStrictness::ObjectOwnerCheck,
                rate_limit: RateLimitPolicy {
                    threshold: Some(100),
                    window_secs: RATE_WINDOW_SECS,
                    adaptive: false,
                    tuning: adaptive,
                },
                audit: AuditVerbosity::SecurityEvents,
                alerts,
                error_detail: ErrorDetail::Generic,
                known_risks: Vec::new(),
                operational_notes: vec![
                    "One per-identity counter update per request under a per-key lock".to_string(),
                    "Audit volume proportional to failures only".to_string(),
                    "Hourly re-authentication".to_string(),
                ],
            },
            SecurityMode::HighAssurance => Self {
                mode,
                token: TokenPolicy::new(Some(15 * 60), TokenBinding::IpBound, true),
                authorization: AuthorizationStrictness::MultiLayer,
                rate_limit: RateLimitPolicy {
                    threshold: Some(30),
                    window_secs: RATE_WINDOW_SECS,
                    adaptive: true,
                    tuning: adaptive,
                },
                audit: AuditVerbosity::Full,
                alerts,
                error_detail: ErrorDetail::Generic,
                known_risks: Vec::new(),
                operational_notes: vec![
                    "Revocation lookup on every token validation".to_string(),
                    "Three authorization layers evaluated per request".to_string(),
                    "Audit record for every request; sink throughput bounds sustained load".to_string(),
                    "Clients behind changing addresses must re-authenticate every 15 minutes or on address change".to_string(),
                ],
            },
        }
    }

    /// Resolve a configured mode name into its validated bundle.
    ///
    /// # Errors
    ///
    /// `UnknownMode` for names outside the closed set, `IncompleteBundle` if the
    /// preset fails validation.
    #[instrument]
    pub fn load(mode: &str) -> Result<Self, ConfigError> {
        let bundle = Self::for_mode(SecurityMode::parse(mode)?);
        bundle.validate()?;
        debug!(mode = %bundle.mode, "Policy bundle loaded");
        Ok(bundle)
    }

    /// Check the bundle carries everything its mode requires.
    ///
    /// # Errors
    ///
    /// Returns `IncompleteBundle` naming the first missing or inconsistent parameter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let incomplete =
            |what: &str| Err(ConfigError::new(ConfigErrorKind::IncompleteBundle(what.to_string())));

        let hardened = self.mode != SecurityMode::Mvp;
        if hardened && self.token.ttl_secs.is_none() {
            return incomplete("token TTL is required outside MVP");
        }
        if self.token.ttl_secs == Some(0) {
            return incomplete("token TTL must be positive");
        }
        if hardened && self.rate_limit.threshold.is_none() {
            return incomplete("rate-limit threshold is required outside MVP");
        }
        if self.rate_limit.threshold == Some(0) {
            return incomplete("rate-limit threshold must be positive");
        }
        if self.rate_limit.window_secs == 0 {
            return incomplete("rate-limit window must be positive");
        }
        if self.rate_limit.adaptive {
            let tuning = &self.rate_limit.tuning;
            if tuning.breach_trigger == 0
                || tuning.observation_windows == 0
                || tuning.cooldown_secs == 0
            {
                return incomplete("adaptive throttling tunables must be positive");
            }
        }
        if self.rate_limit.tuning.cooldown_secs > MAX_TUNABLE_SECS
            || self.alerts.denial_window_secs > MAX_TUNABLE_SECS
        {
            return incomplete("cooldown and alert windows may not exceed one day");
        }
        if self.rate_limit.tuning.observation_windows > MAX_OBSERVATION_WINDOWS {
            return incomplete("observation span may not exceed one day of windows");
        }
        if hardened && self.audit == AuditVerbosity::None {
            return incomplete("audit logging is required outside MVP");
        }
        if self.audit == AuditVerbosity::Full
            && (self.alerts.denial_threshold == 0 || self.alerts.denial_window_secs == 0)
        {
            return incomplete("alert tunables must be positive");
        }
        if hardened && !self.known_risks.is_empty() {
            return incomplete("accepted risks are only permitted in MVP");
        }
        if self.mode == SecurityMode::HighAssurance {
            if self.token.binding != TokenBinding::IpBound {
                return incomplete("high assurance requires IP-bound tokens");
            }
            if !self.token.reuse_detection {
                return incomplete("high assurance requires refresh reuse detection");
            }
            if self.authorization != AuthorizationStrictness::MultiLayer {
                return incomplete("high assurance requires multi-layer authorization");
            }
        }
        Ok(())
    }

    /// Controls this bundle enforces, in a stable order.
    pub fn active_controls(&self) -> Vec<Control> {
        let mut controls = vec![Control::TokenSignature];
        if self.token.ttl_secs.is_some() {
            controls.push(Control::TokenExpiry);
        }
        if self.token.binding == TokenBinding::IpBound {
            controls.push(Control::IpBinding);
        }
        if self.token.reuse_detection {
            controls.push(Control::RefreshReuseDetection);
        }
        if self.rate_limit.threshold.is_some() {
            controls.push(Control::RateLimiting);
            if self.rate_limit.adaptive {
                controls.push(Control::AdaptiveThrottling);
            }
        }
        match self.authorization {
            AuthorizationStrictness::None => {}
            AuthorizationStrictness::ObjectOwnerCheck => {
                controls.push(Control::OrganizationIsolation);
                controls.push(Control::OwnershipCheck);
            }
            AuthorizationStrictness::MultiLayer => {
                controls.push(Control::OrganizationIsolation);
                controls.push(Control::OwnershipCheck);
                controls.push(Control::RoleCapabilities);
                controls.push(Control::VisibilityEnforcement);
                controls.push(Control::DenyByDefault);
            }
        }
        if self.audit >= AuditVerbosity::SecurityEvents {
            controls.push(Control::SecurityEventLogging);
        }
        if self.audit == AuditVerbosity::Full {
            controls.push(Control::FullAuditTrail);
            controls.push(Control::SecurityAlerting);
        }
        if self.error_detail == ErrorDetail::Generic {
            controls.push(Control::GenericErrors);
        }
        controls
    }

    /// Whether a control is active.
    pub fn enforces(&self, control: Control) -> bool {
        self.active_controls().contains(&control)
    }

    /// Operator-facing report of this bundle.
    pub fn report(&self) -> PolicyReport {
        PolicyReport {
            mode: self.mode,
            controls: self.active_controls(),
            known_risks: self.known_risks.clone(),
            operational_notes: self.operational_notes.clone(),
            bundle: self.clone(),
        }
    }
}

/// Serializable introspection view of the active bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, derive_getters::Getters)]
pub struct PolicyReport {
    /// Active mode
    mode: SecurityMode,
    /// Enumerated active controls
    controls: Vec<Control>,
    /// Known accepted risks (non-empty only in MVP)
    known_risks: Vec<String>,
    /// Performance and operational cost notes
    operational_notes: Vec<String>,
    /// Raw parameters backing the report
    bundle: PolicyBundle,
}
