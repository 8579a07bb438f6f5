//! Security policy engine with switchable postures.
//!
//! One process runs under exactly one [`SecurityMode`]. The mode selects a
//! [`PolicyBundle`], a plain set of parameters consumed by mode-agnostic
//! components:
//!
//! 1. **Token Service** - HS256 identity tokens with TTL, IP binding and refresh reuse detection
//! 2. **Rate Limiter** - Fixed 60 second windows per identity or source address, optionally adaptive
//! 3. **Authorization Evaluator** - Ordered layer chain, deny-by-default when strict
//! 4. **Audit Sink** - Non-blocking delivery to a backend with a fallback buffer
//!
//! The [`PolicyRegistry`] composes them into a single [`Decision`] per request
//! and exposes the active bundle for introspection.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use taskward_policy::audit::{AuditSink, MemoryBackend};
//! use taskward_policy::{
//!     IdentityClaims, Operation, PolicyBundle, PolicyRegistry, PolicyRequestBuilder,
//!     ResourceRef, Role, SecurityMode, SystemClock,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let sink = AuditSink::spawn(Arc::new(MemoryBackend::new()))?;
//! let registry = PolicyRegistry::new(
//!     PolicyBundle::load("production")?,
//!     b"an-example-signing-secret-of-32-bytes",
//!     sink,
//!     Arc::new(SystemClock),
//! )?;
//!
//! let token = registry.issue_token(&IdentityClaims::new("alice", "acme", Role::Member), None)?;
//! let request = PolicyRequestBuilder::default()
//!     .token(token)
//!     .operation(Operation::Read)
//!     .resource(ResourceRef::task("t-1", "acme", "bob"))
//!     .build()?;
//! assert!(registry.evaluate_request(&request).is_allowed());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod audit;
mod authorization;
mod bundle;
mod clock;
mod config;
mod decision;
mod identity;
#[cfg(feature = "metrics")]
mod metrics;
mod mode;
mod observability;
mod rate_limit;
mod registry;
mod token;

pub use authorization::{
    AccessRequest, AuthorizationEvaluator, AuthorizationLayer, AuthorizationVerdict,
    CapabilityLayer, CapabilityTable, OrganizationLayer, TenantOwnershipLayer,
    TokenPresenceLayer, VisibilityLayer,
};
pub use bundle::{
    AdaptiveTuning, AlertTuning, AuditVerbosity, AuthorizationStrictness, Control, ErrorDetail,
    PolicyBundle, PolicyReport, RATE_WINDOW_SECS, RateLimitPolicy, TokenBinding, TokenPolicy,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AuditBackendKind, AuditConfig, DEFAULT_CONFIG_FILE, EngineConfig, MIN_SECRET_LEN,
    TuningConfig, check_secret,
};
pub use decision::{Decision, Denial, DenyCause, Directive, Verdict};
pub use identity::{Identity, IdentityClaims, Operation, ResourceRef, Role, Visibility};
#[cfg(feature = "metrics")]
pub use metrics::PolicyMetrics;
pub use mode::SecurityMode;
pub use observability::{
    DEFAULT_OTLP_ENDPOINT, MetricsExporter, ObservabilityConfig, init_observability,
};
pub use rate_limit::{
    RateCheck, RateKey, RateLimiter, RateWindow, ThrottleState, ThrottleTransition,
};
pub use registry::{
    PolicyRegistry, PolicyRequest, PolicyRequestBuilder, PolicyRequestBuilderError, SweepStats,
};
pub use token::{RevocationSet, TokenService};
