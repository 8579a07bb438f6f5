//! Token lifetime, binding and refresh rotation through the registry.

use chrono::{DateTime, TimeDelta};
use std::net::IpAddr;
use std::sync::Arc;
use taskward_error::AuthenticationErrorKind;
use taskward_policy::audit::{AlertKind, AuditSink, MemoryBackend, RecordKind};
use taskward_policy::*;

const SECRET: &[u8] = b"integration-test-signing-secret-32b!";

fn setup(mode: SecurityMode) -> (PolicyRegistry, ManualClock, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    let sink = AuditSink::spawn(backend.clone()).unwrap();
    let clock = ManualClock::new(DateTime::from_timestamp(1_767_225_600, 0).unwrap());
    let registry = PolicyRegistry::new(
        PolicyBundle::for_mode(mode),
        SECRET,
        sink,
        Arc::new(clock.clone()),
    )
    .unwrap();
    (registry, clock, backend)
}

fn home() -> IpAddr {
    "192.0.2.1".parse().unwrap()
}

fn elsewhere() -> IpAddr {
    "192.0.2.99".parse().unwrap()
}

fn claims() -> IdentityClaims {
    IdentityClaims::new("alice", "acme", Role::Member)
}

fn read(token: &str, ip: IpAddr) -> PolicyRequest {
    PolicyRequestBuilder::default()
        .token(token)
        .source_ip(ip)
        .operation(Operation::Read)
        .resource(ResourceRef::task("t-1", "acme", "alice"))
        .build()
        .unwrap()
}

fn auth_failure(decision: &Decision) -> Option<AuthenticationErrorKind> {
    match decision.denial()?.cause() {
        DenyCause::Unauthenticated(kind) => Some(kind.clone()),
        _ => None,
    }
}

#[tokio::test]
async fn test_high_assurance_token_expires_after_fifteen_minutes() {
    let (registry, clock, _) = setup(SecurityMode::HighAssurance);
    let token = registry.issue_token(&claims(), Some(home())).unwrap();

    clock.advance(TimeDelta::minutes(14));
    assert!(registry.evaluate_request(&read(&token, home())).is_allowed());

    clock.advance(TimeDelta::minutes(2));
    let decision = registry.evaluate_request(&read(&token, home()));
    assert_eq!(auth_failure(&decision), Some(AuthenticationErrorKind::Expired));
    assert_eq!(decision.denial().unwrap().status_code(), 401);
    assert_eq!(decision.denial().unwrap().message(), "unauthenticated");
}

#[tokio::test]
async fn test_high_assurance_rejects_other_addresses() {
    let (registry, _, _) = setup(SecurityMode::HighAssurance);
    let token = registry.issue_token(&claims(), Some(home())).unwrap();

    let decision = registry.evaluate_request(&read(&token, elsewhere()));
    assert_eq!(
        auth_failure(&decision),
        Some(AuthenticationErrorKind::IpMismatch)
    );

    let err = registry.tokens().validate(&token, None).unwrap_err();
    assert_eq!(err.kind(), &AuthenticationErrorKind::IpMismatch);
}

#[tokio::test]
async fn test_production_ignores_source_address() {
    let (registry, clock, _) = setup(SecurityMode::Production);
    let token = registry.issue_token(&claims(), Some(home())).unwrap();

    assert!(registry.evaluate_request(&read(&token, elsewhere())).is_allowed());
    clock.advance(TimeDelta::minutes(61));
    assert_eq!(
        auth_failure(&registry.evaluate_request(&read(&token, home()))),
        Some(AuthenticationErrorKind::Expired)
    );
}

#[tokio::test]
async fn test_tampered_token_is_malformed() {
    let (registry, _, _) = setup(SecurityMode::Production);
    let mut token = registry.issue_token(&claims(), None).unwrap();
    token.push('x');
    assert!(matches!(
        auth_failure(&registry.evaluate_request(&read(&token, home()))),
        Some(AuthenticationErrorKind::Malformed(_))
    ));
}

#[tokio::test]
async fn test_refresh_reuse_revokes_family_and_alerts() {
    let (registry, _, backend) = setup(SecurityMode::HighAssurance);
    let original = registry.issue_token(&claims(), Some(home())).unwrap();
    let rotated = registry.refresh_token(&original, Some(home())).unwrap();
    assert!(registry.evaluate_request(&read(&rotated, home())).is_allowed());

    let err = registry
        .refresh_token(&original, Some(home()))
        .unwrap_err();
    assert_eq!(err.kind(), &AuthenticationErrorKind::Reused);

    let decision = registry.evaluate_request(&read(&rotated, home()));
    assert_eq!(auth_failure(&decision), Some(AuthenticationErrorKind::Revoked));
    assert_eq!(decision.count_alerts(AlertKind::TokenReuse), 1);

    registry.audit().flush().await.unwrap();
    let alerts = backend
        .records()
        .iter()
        .filter(|r| *r.kind() == RecordKind::Alert(AlertKind::TokenReuse))
        .count();
    assert_eq!(alerts, 2);
}

#[tokio::test]
async fn test_presenting_rotated_out_token_revokes_family() {
    let (registry, _, _) = setup(SecurityMode::HighAssurance);
    let original = registry.issue_token(&claims(), Some(home())).unwrap();
    let rotated = registry.refresh_token(&original, Some(home())).unwrap();

    assert_eq!(
        auth_failure(&registry.evaluate_request(&read(&original, home()))),
        Some(AuthenticationErrorKind::Revoked)
    );
    assert_eq!(
        auth_failure(&registry.evaluate_request(&read(&rotated, home()))),
        Some(AuthenticationErrorKind::Revoked)
    );
}

#[tokio::test]
async fn test_production_refresh_has_no_reuse_detection() {
    let (registry, _, _) = setup(SecurityMode::Production);
    let original = registry.issue_token(&claims(), None).unwrap();
    registry.refresh_token(&original, None).unwrap();
    registry.refresh_token(&original, None).unwrap();
    assert!(registry.evaluate_request(&read(&original, home())).is_allowed());
}

#[tokio::test]
async fn test_refreshed_token_keeps_binding() {
    let (registry, _, _) = setup(SecurityMode::HighAssurance);
    let original = registry.issue_token(&claims(), Some(home())).unwrap();
    let rotated = registry.refresh_token(&original, Some(home())).unwrap();
    assert_eq!(
        auth_failure(&registry.evaluate_request(&read(&rotated, elsewhere()))),
        Some(AuthenticationErrorKind::IpMismatch)
    );
}

#[tokio::test]
async fn test_refresh_of_expired_token_fails() {
    let (registry, clock, _) = setup(SecurityMode::HighAssurance);
    let original = registry.issue_token(&claims(), Some(home())).unwrap();
    clock.advance(TimeDelta::minutes(16));
    let err = registry
        .refresh_token(&original, Some(home()))
        .unwrap_err();
    assert_eq!(err.kind(), &AuthenticationErrorKind::Expired);
}
