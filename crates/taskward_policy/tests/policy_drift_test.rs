//! The introspected policy must match what enforcement actually does.

use chrono::{DateTime, TimeDelta};
use std::net::IpAddr;
use std::sync::Arc;
use strum::IntoEnumIterator;
use taskward_policy::audit::{AuditEventKind, AuditSink, MemoryBackend};
use taskward_policy::*;

const SECRET: &[u8] = b"integration-test-signing-secret-32b!";

fn setup(mode: SecurityMode) -> (PolicyRegistry, ManualClock) {
    let sink = AuditSink::spawn(Arc::new(MemoryBackend::new())).unwrap();
    let clock = ManualClock::new(DateTime::from_timestamp(1_767_225_600, 0).unwrap());
    let registry = PolicyRegistry::new(
        PolicyBundle::for_mode(mode),
        SECRET,
        sink,
        Arc::new(clock.clone()),
    )
    .unwrap();
    (registry, clock)
}

fn home() -> IpAddr {
    "192.0.2.1".parse().unwrap()
}

fn request(registry: &PolicyRegistry, user: &str, resource: ResourceRef, ip: IpAddr) -> PolicyRequest {
    let token = registry
        .issue_token(&IdentityClaims::new(user, "acme", Role::Member), Some(home()))
        .unwrap();
    PolicyRequestBuilder::default()
        .token(token)
        .source_ip(ip)
        .operation(Operation::Read)
        .resource(resource)
        .build()
        .unwrap()
}

fn own_task(user: &str) -> ResourceRef {
    ResourceRef::task("t-1", "acme", user)
}

#[tokio::test]
async fn test_organization_isolation_matches_enforcement() {
    for mode in SecurityMode::iter() {
        let (registry, _) = setup(mode);
        let declared = registry
            .describe_active_policy()
            .enforces(Control::OrganizationIsolation);
        let foreign = request(&registry, "alice", ResourceRef::task("t-2", "globex", "gary"), home());
        let enforced = !registry.evaluate_request(&foreign).is_allowed();
        assert_eq!(declared, enforced, "organization isolation drift in {mode}");
    }
}

#[tokio::test]
async fn test_token_expiry_matches_enforcement() {
    for mode in SecurityMode::iter() {
        let (registry, clock) = setup(mode);
        let declared = registry.describe_active_policy().enforces(Control::TokenExpiry);
        let stale = request(&registry, "alice", own_task("alice"), home());
        clock.advance(TimeDelta::days(30));
        let enforced = !registry.evaluate_request(&stale).is_allowed();
        assert_eq!(declared, enforced, "token expiry drift in {mode}");
    }
}

#[tokio::test]
async fn test_ip_binding_matches_enforcement() {
    for mode in SecurityMode::iter() {
        let (registry, _) = setup(mode);
        let declared = registry.describe_active_policy().enforces(Control::IpBinding);
        let moved = request(&registry, "alice", own_task("alice"), "192.0.2.200".parse().unwrap());
        let enforced = !registry.evaluate_request(&moved).is_allowed();
        assert_eq!(declared, enforced, "ip binding drift in {mode}");
    }
}

#[tokio::test]
async fn test_rate_limiting_matches_enforcement() {
    for mode in SecurityMode::iter() {
        let (registry, _) = setup(mode);
        let bundle = registry.describe_active_policy();
        let declared = bundle.enforces(Control::RateLimiting);
        let burst = bundle.rate_limit().threshold().unwrap_or(500) + 1;
        let req = request(&registry, "alice", own_task("alice"), home());
        let enforced = (0..burst)
            .map(|_| registry.evaluate_request(&req))
            .any(|decision| !decision.is_allowed());
        assert_eq!(declared, enforced, "rate limiting drift in {mode}");
    }
}

#[tokio::test]
async fn test_audit_controls_match_directives() {
    for mode in SecurityMode::iter() {
        let (registry, _) = setup(mode);
        let bundle = registry.describe_active_policy();

        let allowed = registry.evaluate_request(&request(&registry, "alice", own_task("alice"), home()));
        assert!(allowed.is_allowed());
        assert_eq!(
            bundle.enforces(Control::FullAuditTrail),
            allowed.count_events(AuditEventKind::AccessGranted) == 1,
            "full audit drift in {mode}"
        );

        let anonymous = PolicyRequestBuilder::default()
            .source_ip(home())
            .operation(Operation::Read)
            .resource(own_task("alice"))
            .build()
            .unwrap();
        let denied = registry.evaluate_request(&anonymous);
        assert_eq!(
            bundle.enforces(Control::SecurityEventLogging),
            denied.count_events(AuditEventKind::AuthenticationFailed) == 1,
            "security event logging drift in {mode}"
        );
        assert_eq!(
            bundle.enforces(Control::GenericErrors),
            !denied.denial().unwrap().message().contains(':'),
            "error detail drift in {mode}"
        );
    }
}

#[tokio::test]
async fn test_report_reflects_active_bundle() {
    for mode in SecurityMode::iter() {
        let (registry, _) = setup(mode);
        let report = registry.report();
        assert_eq!(report.mode(), &mode);
        assert_eq!(report.bundle(), registry.describe_active_policy());
        assert_eq!(
            report.controls(),
            &registry.describe_active_policy().active_controls()
        );
        assert_eq!(!report.known_risks().is_empty(), mode == SecurityMode::Mvp);
        assert!(!report.operational_notes().is_empty());
    }
}

#[tokio::test]
async fn test_repeated_requests_yield_identical_decisions() {
    let (registry, _) = setup(SecurityMode::HighAssurance);
    let allowed = request(&registry, "alice", own_task("alice"), home());
    let first = registry.evaluate_request(&allowed);
    for _ in 0..5 {
        assert_eq!(registry.evaluate_request(&allowed), first);
    }

    let (registry, _) = setup(SecurityMode::Production);
    let foreign = request(&registry, "alice", ResourceRef::task("t-2", "globex", "gary"), home());
    let first = registry.evaluate_request(&foreign);
    assert!(!first.is_allowed());
    for _ in 0..5 {
        assert_eq!(registry.evaluate_request(&foreign), first);
    }
}

#[tokio::test]
async fn test_registry_from_config() {
    let config = EngineConfig::default()
        .with_mode("high-assurance")
        .with_signing_secret(String::from_utf8_lossy(SECRET).into_owned());
    let sink = AuditSink::spawn(config.audit_backend().unwrap()).unwrap();
    let registry = PolicyRegistry::from_config(&config, sink).unwrap();
    assert_eq!(
        registry.describe_active_policy().mode(),
        &SecurityMode::HighAssurance
    );
}
