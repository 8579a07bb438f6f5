//! The policy registry: one active bundle and the pipeline that enforces it.
//!
//! [`PolicyRegistry::evaluate_request`] runs authentication, rate limiting and
//! authorization in that order, short-circuiting on the first denial, then hands
//! every side effect to the audit sink before returning. Side effects are
//! dispatched synchronously into the sink's channel, so they are applied even if
//! the caller abandons the request right after the decision.

use crate::audit::{AlertKind, AuditEventKind, AuditFields, AuditSink, DenialTracker, Severity};
use crate::decision::{Decision, Denial, DenyCause, Directive, Directives, Verdict};
use crate::rate_limit::{RateCheck, RateKey, RateLimiter, ThrottleTransition};
use crate::{
    AccessRequest, AuthorizationEvaluator, CapabilityTable, Clock, EngineConfig, Identity,
    IdentityClaims, Operation, PolicyBundle, PolicyReport, ResourceRef, Role, SystemClock,
    TokenService, check_secret,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use taskward_error::{
    AuthenticationError, AuthenticationErrorKind, AuthorizationErrorKind, ConfigError,
    RateLimitErrorKind,
};
use tracing::{debug, info, instrument, warn};

/// One request as presented by the business layer.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    derive_getters::Getters,
    derive_builder::Builder,
)]
#[builder(setter(into))]
pub struct PolicyRequest {
    /// Bearer token, if any
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    token: Option<String>,
    /// Source address of the request
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    source_ip: Option<IpAddr>,
    /// Requested operation
    operation: Operation,
    /// Target resource
    resource: ResourceRef,
    /// Role being granted, for role-mutating operations
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    granted_role: Option<Role>,
}

/// Entries removed by one [`PolicyRegistry::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, derive_getters::Getters)]
pub struct SweepStats {
    /// Idle rate windows evicted
    rate_windows: usize,
    /// Expired revocation entries dropped
    revocations: usize,
    /// Stale denial histories dropped
    denial_histories: usize,
}

/// Holds the active bundle and every component configured from it.
pub struct PolicyRegistry {
    bundle: PolicyBundle,
    tokens: TokenService,
    limiter: RateLimiter,
    authorization: AuthorizationEvaluator,
    denials: DenialTracker,
    audit: AuditSink,
    clock: Arc<dyn Clock>,
    #[cfg(feature = "metrics")]
    metrics: crate::PolicyMetrics,
}

impl std::fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyRegistry")
            .field("mode", self.bundle.mode())
            .field("tokens", &self.tokens)
            .field("limiter", &self.limiter)
            .field("authorization", &self.authorization.strictness())
            .finish_non_exhaustive()
    }
}

impl PolicyRegistry {
    /// Build a registry enforcing `bundle`.
    ///
    /// # Errors
    ///
    /// `IncompleteBundle` when the bundle fails validation or the secret is
    /// too weak for its mode.
    #[instrument(skip(bundle, secret, audit, clock), fields(mode = %bundle.mode()))]
    pub fn new(
        bundle: PolicyBundle,
        secret: &[u8],
        audit: AuditSink,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        bundle.validate()?;
        check_secret(*bundle.mode(), secret)?;

        let tokens = TokenService::new(bundle.token().clone(), secret, Arc::clone(&clock));
        let limiter = RateLimiter::new(*bundle.rate_limit().window_secs(), Arc::clone(&clock));
        let authorization = AuthorizationEvaluator::new(*bundle.authorization());

        info!(controls = ?bundle.active_controls(), "Policy registry ready");
        Ok(Self {
            bundle,
            tokens,
            limiter,
            authorization,
            denials: DenialTracker::new(),
            audit,
            clock,
            #[cfg(feature = "metrics")]
            metrics: crate::PolicyMetrics::new(),
        })
    }

    /// Build a registry from loaded configuration on the system clock.
    ///
    /// # Errors
    ///
    /// Any startup [`ConfigError`].
    pub fn from_config(config: &EngineConfig, audit: AuditSink) -> Result<Self, ConfigError> {
        Self::new(config.bundle()?, config.secret()?, audit, Arc::new(SystemClock))
    }

    /// Replace the capability table consulted by multi-layer authorization.
    pub fn with_capabilities(mut self, capabilities: CapabilityTable) -> Self {
        self.authorization =
            AuthorizationEvaluator::with_capabilities(*self.bundle.authorization(), capabilities);
        self
    }

    /// The bundle the enforcement path uses. Read-only and side-effect free.
    pub fn describe_active_policy(&self) -> &PolicyBundle {
        &self.bundle
    }

    /// Introspection report derived from the active bundle.
    pub fn report(&self) -> PolicyReport {
        self.bundle.report()
    }

    /// Audit sink this registry dispatches to.
    pub fn audit(&self) -> &AuditSink {
        &self.audit
    }

    /// Token service configured from the active bundle.
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Rate limiter shared by every request.
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Decide whether `request` may proceed.
    ///
    /// Never fails: every per-request error becomes a denial.
    #[instrument(
        skip(self, request),
        fields(
            mode = %self.bundle.mode(),
            operation = %request.operation,
            resource_id = %request.resource.resource_id()
        )
    )]
    pub fn evaluate_request(&self, request: &PolicyRequest) -> Decision {
        let now = self.clock.now();
        let mut directives = Directives::new(*self.bundle.audit());
        let verdict = self.decide(request, now, &mut directives);
        let directives = directives.into_vec();
        self.dispatch(&directives, now);

        match &verdict {
            Verdict::Allow => debug!("Request allowed"),
            Verdict::Deny(denial) => {
                debug!(reason = denial.reason(), code = denial.cause().code(), "Request denied")
            }
        }
        #[cfg(feature = "metrics")]
        self.metrics.record_decision(
            self.bundle.mode().as_ref(),
            match &verdict {
                Verdict::Allow => None,
                Verdict::Deny(denial) => Some(denial.reason()),
            },
        );

        Decision::new(*self.bundle.mode(), verdict, directives)
    }

    fn decide(
        &self,
        request: &PolicyRequest,
        now: DateTime<Utc>,
        directives: &mut Directives,
    ) -> Verdict {
        let identity = match self.authenticate(request, directives) {
            Ok(identity) => identity,
            Err(kind) => return self.deny(DenyCause::Unauthenticated(kind)),
        };
        if let Err(kind) = self.throttle(&identity, request, directives) {
            return self.deny(DenyCause::RateLimited(kind));
        }
        match self.authorize(&identity, request, now, directives) {
            Ok(()) => Verdict::Allow,
            Err(kind) => self.deny(DenyCause::Forbidden(kind)),
        }
    }

    fn deny(&self, cause: DenyCause) -> Verdict {
        Verdict::Deny(Denial::new(cause, *self.bundle.error_detail()))
    }

    fn authenticate(
        &self,
        request: &PolicyRequest,
        directives: &mut Directives,
    ) -> Result<Identity, AuthenticationErrorKind> {
        let result = match request.token.as_deref() {
            Some(token) => self.tokens.validate(token, request.source_ip),
            None => Err(AuthenticationError::new(AuthenticationErrorKind::Missing)),
        };
        result.map_err(|e| {
            let kind = e.kind;
            debug!(code = kind.code(), "Authentication failed");

            // Unauthenticated traffic is still counted, against its source address.
            if let Some(threshold) = self.bundle.rate_limit().threshold() {
                let key = RateKey::address(*self.bundle.mode(), request.source_ip);
                let check = self.count(&key, *threshold, directives);
                if let Err(breach) = check.into_result() {
                    self.log_breach(breach.kind(), directives);
                }
            }

            let mut fields = request_fields(request);
            fields.insert("reason".to_string(), kind.code().to_string());
            directives.log(
                AuditEventKind::AuthenticationFailed,
                Severity::Warning,
                fields.clone(),
            );
            if kind == AuthenticationErrorKind::Revoked {
                self.raise(directives, AlertKind::TokenReuse, fields);
            }
            kind
        })
    }

    fn throttle(
        &self,
        identity: &Identity,
        request: &PolicyRequest,
        directives: &mut Directives,
    ) -> Result<(), RateLimitErrorKind> {
        let Some(threshold) = self.bundle.rate_limit().threshold() else {
            return Ok(());
        };
        let key = RateKey::identity(
            *self.bundle.mode(),
            identity.organization_id(),
            identity.user_id(),
        );
        self.count(&key, *threshold, directives)
            .into_result()
            .map(|_| ())
            .map_err(|breach| {
                let kind = breach.kind().clone();
                let mut fields = identity_fields(identity, request);
                fields.insert("reason".to_string(), kind.code().to_string());
                fields.extend(breach_fields(&kind));
                directives.log(AuditEventKind::RateLimitExceeded, Severity::Warning, fields);
                kind
            })
    }

    fn count(&self, key: &RateKey, threshold: u32, directives: &mut Directives) -> RateCheck {
        let check = self.limiter.check_and_increment(
            key,
            threshold,
            self.bundle.rate_limit().adaptive_tuning(),
        );
        if let Some(ThrottleTransition::Engaged { until }) = check.transition() {
            let fields = AuditFields::from([
                ("key".to_string(), key.to_string()),
                ("until".to_string(), until.to_rfc3339()),
                (
                    "effective_threshold".to_string(),
                    check.effective_threshold().to_string(),
                ),
            ]);
            self.raise(directives, AlertKind::SustainedThrottling, fields);
        }
        check
    }

    fn log_breach(&self, kind: &RateLimitErrorKind, directives: &mut Directives) {
        let mut fields = breach_fields(kind);
        fields.insert("reason".to_string(), kind.code().to_string());
        directives.log(AuditEventKind::RateLimitExceeded, Severity::Warning, fields);
    }

    fn authorize(
        &self,
        identity: &Identity,
        request: &PolicyRequest,
        now: DateTime<Utc>,
        directives: &mut Directives,
    ) -> Result<(), AuthorizationErrorKind> {
        let access = AccessRequest {
            identity,
            operation: request.operation,
            resource: &request.resource,
            granted_role: request.granted_role,
        };
        let verdict = self.authorization.check(&access);
        let mut fields = identity_fields(identity, request);

        if verdict.escalation_attempt {
            if let Some(role) = request.granted_role {
                fields.insert("granted_role".to_string(), role.to_string());
            }
            warn!(user_id = %identity.user_id(), "Privilege escalation attempt");
            directives.log(
                AuditEventKind::PrivilegeEscalationAttempt,
                Severity::Critical,
                fields.clone(),
            );
        }

        match verdict.result {
            Ok(()) => {
                directives.log(AuditEventKind::AccessGranted, Severity::Info, fields);
                Ok(())
            }
            Err(e) => {
                let kind = e.kind();
                fields.insert("reason".to_string(), kind.code().to_string());
                directives.log(
                    AuditEventKind::AuthorizationDenied,
                    Severity::Warning,
                    fields.clone(),
                );
                if self.bundle.audit().raises_alerts() {
                    if let Some(count) = self.denials.record_denial(
                        identity.organization_id(),
                        identity.user_id(),
                        now,
                        self.bundle.alerts(),
                    ) {
                        fields.insert("denials".to_string(), count.to_string());
                        warn!(user_id = %identity.user_id(), count, "Authorization probing suspected");
                        self.raise(directives, AlertKind::AuthorizationProbing, fields);
                    }
                }
                Err(kind)
            }
        }
    }

    fn raise(&self, directives: &mut Directives, kind: AlertKind, fields: AuditFields) {
        if self.bundle.audit().raises_alerts() {
            warn!(alert = %kind, "Security alert raised");
            #[cfg(feature = "metrics")]
            self.metrics
                .record_alert(self.bundle.mode().as_ref(), &kind.to_string());
        }
        directives.alert(kind, fields);
    }

    fn dispatch(&self, directives: &[Directive], now: DateTime<Utc>) {
        for directive in directives {
            self.audit
                .record(directive.to_record(*self.bundle.mode(), now));
        }
    }

    /// Issue a token for `claims`, audited at the active verbosity.
    ///
    /// # Errors
    ///
    /// `Issuance` when the token cannot be bound or signed.
    #[instrument(skip(self, claims), fields(user_id = %claims.user_id()))]
    pub fn issue_token(
        &self,
        claims: &IdentityClaims,
        issuing_ip: Option<IpAddr>,
    ) -> Result<String, AuthenticationError> {
        let token = self.tokens.issue(claims, issuing_ip).inspect_err(|e| {
            warn!(error = %e, "Token issuance failed");
        })?;
        let mut directives = Directives::new(*self.bundle.audit());
        let mut fields = AuditFields::from([
            ("user_id".to_string(), claims.user_id().clone()),
            (
                "organization_id".to_string(),
                claims.organization_id().clone(),
            ),
            ("role".to_string(), claims.role().to_string()),
        ]);
        if let Some(ip) = issuing_ip {
            fields.insert("source_ip".to_string(), ip.to_string());
        }
        directives.log(AuditEventKind::TokenIssued, Severity::Info, fields);
        self.dispatch(&directives.into_vec(), self.clock.now());
        Ok(token)
    }

    /// Rotate `token`, audited at the active verbosity.
    ///
    /// Presenting a rotated-out token revokes its family and raises a
    /// `token_reuse` alert.
    ///
    /// # Errors
    ///
    /// Every [`TokenService::refresh`] failure.
    #[instrument(skip(self, token))]
    pub fn refresh_token(
        &self,
        token: &str,
        request_ip: Option<IpAddr>,
    ) -> Result<String, AuthenticationError> {
        let mut directives = Directives::new(*self.bundle.audit());
        let mut fields = AuditFields::new();
        if let Some(ip) = request_ip {
            fields.insert("source_ip".to_string(), ip.to_string());
        }
        let result = self.tokens.refresh(token, request_ip);
        match &result {
            Ok(_) => directives.log(AuditEventKind::TokenRefreshed, Severity::Info, fields),
            Err(e) => {
                fields.insert("reason".to_string(), e.kind().code().to_string());
                directives.log(
                    AuditEventKind::AuthenticationFailed,
                    Severity::Warning,
                    fields.clone(),
                );
                if matches!(
                    e.kind(),
                    AuthenticationErrorKind::Reused | AuthenticationErrorKind::Revoked
                ) {
                    self.raise(&mut directives, AlertKind::TokenReuse, fields);
                }
            }
        }
        self.dispatch(&directives.into_vec(), self.clock.now());
        result
    }

    /// Drop state that can no longer influence a decision.
    #[instrument(skip(self))]
    pub fn sweep(&self) -> SweepStats {
        let now = self.clock.now();
        let stats = SweepStats {
            rate_windows: self.limiter.evict_expired(),
            revocations: self.tokens.revocations().purge_expired(now),
            denial_histories: self.denials.purge(now, self.bundle.alerts()),
        };
        debug!(?stats, "Sweep complete");
        stats
    }

    /// Run [`sweep`](Self::sweep) every `interval` until the registry is dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    debug!("Registry dropped, sweeper exiting");
                    break;
                };
                registry.sweep();
            }
        })
    }
}

fn request_fields(request: &PolicyRequest) -> AuditFields {
    let mut fields = AuditFields::from([
        ("operation".to_string(), request.operation.to_string()),
        (
            "resource_type".to_string(),
            request.resource.resource_type().clone(),
        ),
        (
            "resource_id".to_string(),
            request.resource.resource_id().clone(),
        ),
    ]);
    if let Some(ip) = request.source_ip {
        fields.insert("source_ip".to_string(), ip.to_string());
    }
    fields
}

fn identity_fields(identity: &Identity, request: &PolicyRequest) -> AuditFields {
    let mut fields = request_fields(request);
    fields.insert("user_id".to_string(), identity.user_id().clone());
    fields.insert(
        "organization_id".to_string(),
        identity.organization_id().clone(),
    );
    fields.insert("role".to_string(), identity.role().to_string());
    fields.insert(
        "resource_organization_id".to_string(),
        request.resource.organization_id().clone(),
    );
    fields
}

fn breach_fields(kind: &RateLimitErrorKind) -> AuditFields {
    match kind {
        RateLimitErrorKind::ThresholdExceeded {
            key,
            threshold,
            retry_after_secs,
            ..
        } => AuditFields::from([
            ("key".to_string(), key.clone()),
            ("threshold".to_string(), threshold.to_string()),
            ("retry_after_secs".to_string(), retry_after_secs.to_string()),
        ]),
    }
}
