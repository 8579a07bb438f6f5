//! Shared-state behavior under many threads: window counting and refresh rotation.

use chrono::DateTime;
use std::net::IpAddr;
use std::sync::{Arc, Barrier};
use std::thread;
use taskward_error::AuthenticationErrorKind;
use taskward_policy::audit::{AuditSink, MemoryBackend};
use taskward_policy::*;

const SECRET: &[u8] = b"integration-test-signing-secret-32b!";
const THREADS: usize = 8;

fn clock() -> ManualClock {
    ManualClock::new(DateTime::from_timestamp(1_767_225_600, 0).unwrap())
}

fn home() -> IpAddr {
    "192.0.2.1".parse().unwrap()
}

#[test]
fn test_concurrent_increments_on_one_key_are_all_counted() {
    const PER_THREAD: usize = 500;
    let limiter = RateLimiter::new(RATE_WINDOW_SECS, Arc::new(clock()));
    let key = RateKey::identity(SecurityMode::Production, "acme", "alice");

    let mut counts: Vec<u32> = thread::scope(|scope| {
        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    (0..PER_THREAD)
                        .map(|_| *limiter.check_and_increment(&key, u32::MAX, None).count())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        workers
            .into_iter()
            .flat_map(|worker| worker.join().unwrap())
            .collect()
    });

    let total = (THREADS * PER_THREAD) as u32;
    assert_eq!(*limiter.window_of(&key).unwrap().count(), total);
    // Every request observed a distinct position in the window.
    counts.sort_unstable();
    assert_eq!(counts, (1..=total).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_requests_respect_production_threshold() {
    const PER_THREAD: usize = 20;
    let backend = Arc::new(MemoryBackend::new());
    let sink = AuditSink::spawn(backend).unwrap();
    let registry = PolicyRegistry::new(
        PolicyBundle::for_mode(SecurityMode::Production),
        SECRET,
        sink,
        Arc::new(clock()),
    )
    .unwrap();
    let token = registry
        .issue_token(&IdentityClaims::new("alice", "acme", Role::Member), None)
        .unwrap();
    let request = PolicyRequestBuilder::default()
        .token(token)
        .source_ip(home())
        .operation(Operation::Read)
        .resource(ResourceRef::task("t-1", "acme", "alice"))
        .build()
        .unwrap();

    let start = Barrier::new(THREADS);
    let allowed: usize = thread::scope(|scope| {
        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    start.wait();
                    (0..PER_THREAD)
                        .filter(|_| registry.evaluate_request(&request).is_allowed())
                        .count()
                })
            })
            .collect();
        workers.into_iter().map(|worker| worker.join().unwrap()).sum()
    });

    assert_eq!(allowed, 100);
    let key = RateKey::identity(SecurityMode::Production, "acme", "alice");
    let window = registry.rate_limiter().window_of(&key).unwrap();
    assert_eq!(*window.count(), (THREADS * PER_THREAD) as u32);
}

#[test]
fn test_racing_refreshes_of_one_token_yield_one_successor() {
    const ROUNDS: usize = 50;
    let tokens = TokenService::new(
        PolicyBundle::for_mode(SecurityMode::HighAssurance)
            .token()
            .clone(),
        SECRET,
        Arc::new(clock()),
    );
    let claims = IdentityClaims::new("alice", "acme", Role::Member);

    for _ in 0..ROUNDS {
        let token = tokens.issue(&claims, Some(home())).unwrap();
        let start = Barrier::new(2);
        let outcomes: Vec<_> = thread::scope(|scope| {
            let racers: Vec<_> = (0..2)
                .map(|_| {
                    scope.spawn(|| {
                        start.wait();
                        tokens.refresh(&token, Some(home()))
                    })
                })
                .collect();
            racers
                .into_iter()
                .map(|racer| racer.join().unwrap())
                .collect()
        });

        let successors: Vec<&String> = outcomes.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(successors.len(), 1, "exactly one refresh may win");
        let loser = outcomes.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert_eq!(loser.kind(), &AuthenticationErrorKind::Reused);

        // The losing attempt revokes the family, successor included.
        let err = tokens.validate(successors[0], Some(home())).unwrap_err();
        assert_eq!(err.kind(), &AuthenticationErrorKind::Revoked);
    }
}

#[test]
fn test_refresh_after_concurrent_reuse_stays_revoked() {
    let tokens = TokenService::new(
        PolicyBundle::for_mode(SecurityMode::HighAssurance)
            .token()
            .clone(),
        SECRET,
        Arc::new(clock()),
    );
    let token = tokens
        .issue(&IdentityClaims::new("alice", "acme", Role::Member), Some(home()))
        .unwrap();

    let start = Barrier::new(THREADS);
    let winners = thread::scope(|scope| {
        let racers: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    start.wait();
                    tokens.refresh(&token, Some(home()))
                })
            })
            .collect();
        racers
            .into_iter()
            .filter_map(|racer| racer.join().unwrap().ok())
            .collect::<Vec<_>>()
    });

    assert_eq!(winners.len(), 1);
    for winner in &winners {
        let err = tokens.refresh(winner, Some(home())).unwrap_err();
        assert_eq!(err.kind(), &AuthenticationErrorKind::Revoked);
    }
}
