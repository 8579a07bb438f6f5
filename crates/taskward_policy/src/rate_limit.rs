//! Fixed-window rate limiting with adaptive throttling.
//!
//! Each key owns its own window behind its own lock, so unrelated identities
//! never contend. Windows are evicted passively on access, or in bulk through
//! [`RateLimiter::evict_expired`].

use crate::clock::seconds;
use crate::{AdaptiveTuning, Clock, SecurityMode};
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Arc;
use taskward_error::{RateLimitError, RateLimitErrorKind};
use tracing::{debug, info, instrument, warn};

/// Window key, unique per (identity-or-address, mode).
///
/// Identities are scoped by organization: `{mode}:user:{organization}/{user}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("{}", _0)]
pub struct RateKey(String);

impl RateKey {
    /// Key for an authenticated identity within its organization.
    pub fn identity(mode: SecurityMode, organization_id: &str, user_id: &str) -> Self {
        Self(format!("{mode}:user:{organization_id}/{user_id}"))
    }

    /// Key for an unauthenticated source address.
    pub fn address(mode: SecurityMode, ip: Option<IpAddr>) -> Self {
        match ip {
            Some(ip) => Self(format!("{mode}:ip:{ip}")),
            None => Self(format!("{mode}:ip:unknown")),
        }
    }

    /// Key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Adaptive throttle state of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleState {
    /// Baseline threshold applies
    Normal,
    /// Halved threshold applies until the cooldown ends
    Throttled {
        /// End of the cooldown
        until: DateTime<Utc>,
    },
}

/// State change observed during a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleTransition {
    /// Key moved from normal to throttled
    Engaged {
        /// End of the cooldown
        until: DateTime<Utc>,
    },
    /// Key returned to its baseline threshold
    Restored,
}

/// Per-key counter.
#[derive(Debug, Clone, derive_getters::Getters)]
pub struct RateWindow {
    /// Start of the current window
    window_start: DateTime<Utc>,
    /// Requests counted in the current window
    count: u32,
    /// Configured baseline threshold
    threshold: u32,
    /// Adaptive state
    state: ThrottleState,
    /// Breach instants within the observation span
    #[getter(skip)]
    breaches: VecDeque<DateTime<Utc>>,
    /// Last time the key was touched
    last_seen: DateTime<Utc>,
    /// Set once the window has been evicted from the limiter
    #[getter(skip)]
    retired: bool,
}

impl RateWindow {
    fn new(threshold: u32, now: DateTime<Utc>) -> Self {
        Self {
            window_start: now,
            count: 0,
            threshold,
            state: ThrottleState::Normal,
            breaches: VecDeque::new(),
            last_seen: now,
            retired: false,
        }
    }

    /// Threshold in force given the current adaptive state.
    pub fn effective_threshold(&self) -> u32 {
        match self.state {
            ThrottleState::Normal => self.threshold,
            ThrottleState::Throttled { .. } => (self.threshold / 2).max(1),
        }
    }

    /// Breaches currently inside the observation span.
    pub fn recent_breaches(&self) -> usize {
        self.breaches.len()
    }
}

/// Result of one counted request.
#[derive(Debug, Clone, derive_getters::Getters)]
pub struct RateCheck {
    /// Key that was counted
    key: RateKey,
    /// Requests in the window including this one
    count: u32,
    /// Threshold this request was judged against
    effective_threshold: u32,
    /// Adaptive state after the check
    state: ThrottleState,
    /// State change caused by this check
    transition: Option<ThrottleTransition>,
    /// Seconds until the window resets
    retry_after_secs: u64,
}

impl RateCheck {
    /// Whether this request breached the threshold.
    pub fn exceeded(&self) -> bool {
        self.count > self.effective_threshold
    }

    /// Convert into the allow/deny outcome.
    ///
    /// # Errors
    ///
    /// `ThresholdExceeded` when the request breached.
    pub fn into_result(self) -> Result<Self, RateLimitError> {
        if self.exceeded() {
            Err(RateLimitError::new(RateLimitErrorKind::ThresholdExceeded {
                key: self.key.to_string(),
                count: self.count,
                threshold: self.effective_threshold,
                retry_after_secs: self.retry_after_secs,
            }))
        } else {
            Ok(self)
        }
    }
}

/// Rate limiter tracking many keys.
pub struct RateLimiter {
    windows: DashMap<RateKey, Arc<Mutex<RateWindow>>>,
    window_secs: u64,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("keys", &self.windows.len())
            .field("window_secs", &self.window_secs)
            .finish()
    }
}

impl RateLimiter {
    /// Create a limiter with the given window length.
    pub fn new(window_secs: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            window_secs,
            clock,
        }
    }

    fn window(&self) -> TimeDelta {
        seconds(self.window_secs)
    }

    fn slot(&self, key: &RateKey, threshold: u32, now: DateTime<Utc>) -> Arc<Mutex<RateWindow>> {
        if let Some(existing) = self.windows.get(key) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.windows
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(RateWindow::new(threshold, now))))
                .value(),
        )
    }

    /// Count one request under `key` and judge it.
    ///
    /// The request is counted even when it breaches. With `adaptive` tuning, a
    /// key whose breaches within the observation span exceed the trigger is
    /// throttled to half its threshold until the cooldown ends.
    #[instrument(skip(self, adaptive), fields(key = %key))]
    pub fn check_and_increment(
        &self,
        key: &RateKey,
        threshold: u32,
        adaptive: Option<&AdaptiveTuning>,
    ) -> RateCheck {
        let now = self.clock.now();
        loop {
            let slot = self.slot(key, threshold, now);
            let mut window = slot.lock();
            // Evicted between lookup and lock: count on its replacement instead.
            if window.retired {
                debug!(key = %key, "Window evicted concurrently, retrying");
                continue;
            }
            return self.judge(key, &mut window, threshold, adaptive, now);
        }
    }

    fn judge(
        &self,
        key: &RateKey,
        window: &mut RateWindow,
        threshold: u32,
        adaptive: Option<&AdaptiveTuning>,
        now: DateTime<Utc>,
    ) -> RateCheck {
        let mut transition = None;

        window.threshold = threshold;
        window.last_seen = now;

        if matches!(window.state, ThrottleState::Throttled { until } if now >= until) {
            window.state = ThrottleState::Normal;
            window.breaches.clear();
            transition = Some(ThrottleTransition::Restored);
            info!(key = %key, "Throttle cooldown elapsed, baseline threshold restored");
        }

        if now - window.window_start >= self.window() {
            window.window_start = now;
            window.count = 0;
        }

        window.count = window.count.saturating_add(1);
        let mut effective = window.effective_threshold();

        if window.count > effective {
            debug!(count = window.count, threshold = effective, "Rate limit breached");
            if let Some(tuning) = adaptive {
                let span = seconds(
                    self.window_secs
                        .saturating_mul(u64::from(*tuning.observation_windows())),
                );
                window.breaches.push_back(now);
                while window
                    .breaches
                    .front()
                    .is_some_and(|first| now - *first > span)
                {
                    window.breaches.pop_front();
                }
                if window.state == ThrottleState::Normal
                    && window.breaches.len() > *tuning.breach_trigger() as usize
                {
                    let until = now
                        .checked_add_signed(seconds(*tuning.cooldown_secs()))
                        .unwrap_or(DateTime::<Utc>::MAX_UTC);
                    window.state = ThrottleState::Throttled { until };
                    transition = Some(ThrottleTransition::Engaged { until });
                    warn!(
                        key = %key,
                        breaches = window.breaches.len(),
                        until = %until,
                        "Adaptive throttling engaged"
                    );
                }
            }
        }
        // Engaging mid-window judges this request against the halved threshold too.
        effective = effective.min(window.effective_threshold());

        let reset_at = window
            .window_start
            .checked_add_signed(self.window())
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        RateCheck {
            key: key.clone(),
            count: window.count,
            effective_threshold: effective,
            state: window.state,
            transition,
            retry_after_secs: (reset_at - now).num_seconds().max(0) as u64,
        }
    }

    /// Snapshot of a key's window, if tracked.
    pub fn window_of(&self, key: &RateKey) -> Option<RateWindow> {
        self.windows.get(key).map(|slot| slot.lock().clone())
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Whether no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Drop keys idle past their window that are not serving a cooldown.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let window = self.window();
        let before = self.windows.len();
        self.windows.retain(|_, slot| {
            let mut state = slot.lock();
            let idle = now - state.last_seen >= window;
            let cooling = matches!(state.state, ThrottleState::Throttled { until } if now < until);
            let keep = !idle || cooling;
            // Requests already holding this slot will see the flag and re-resolve it.
            state.retired = !keep;
            keep
        });
        let removed = before - self.windows.len();
        if removed > 0 {
            debug!(removed, "Evicted idle rate windows");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;

    fn limiter() -> (RateLimiter, ManualClock) {
        let clock = ManualClock::new(DateTime::from_timestamp(1_767_225_600, 0).unwrap());
        (RateLimiter::new(60, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_keys_are_isolated() {
        let (limiter, _) = limiter();
        let alice = RateKey::identity(SecurityMode::Production, "acme", "alice");
        let bob = RateKey::identity(SecurityMode::Production, "acme", "bob");
        for _ in 0..3 {
            limiter.check_and_increment(&alice, 3, None);
        }
        assert!(limiter.check_and_increment(&alice, 3, None).exceeded());
        assert!(!limiter.check_and_increment(&bob, 3, None).exceeded());
    }

    #[test]
    fn test_keys_differ_per_mode() {
        assert_ne!(
            RateKey::identity(SecurityMode::Production, "acme", "alice"),
            RateKey::identity(SecurityMode::HighAssurance, "acme", "alice")
        );
        assert_eq!(
            RateKey::address(SecurityMode::Production, Some("10.1.1.1".parse().unwrap())).as_str(),
            "production:ip:10.1.1.1"
        );
    }

    #[test]
    fn test_breach_still_counts() {
        let (limiter, _) = limiter();
        let key = RateKey::identity(SecurityMode::Production, "acme", "alice");
        limiter.check_and_increment(&key, 1, None);
        let check = limiter.check_and_increment(&key, 1, None);
        assert_eq!(*check.count(), 2);
        assert!(check.clone().into_result().is_err());
        assert_eq!(limiter.window_of(&key).unwrap().count(), &2);
    }

    #[test]
    fn test_non_adaptive_never_throttles() {
        let (limiter, _) = limiter();
        let key = RateKey::identity(SecurityMode::Production, "acme", "alice");
        for _ in 0..50 {
            let check = limiter.check_and_increment(&key, 2, None);
            assert_eq!(*check.state(), ThrottleState::Normal);
        }
    }

    #[test]
    fn test_eviction_keeps_cooling_keys() {
        let (limiter, clock) = limiter();
        let tuning = AdaptiveTuning::default();
        let idle = RateKey::identity(SecurityMode::HighAssurance, "acme", "idle");
        let hot = RateKey::identity(SecurityMode::HighAssurance, "acme", "hot");
        limiter.check_and_increment(&idle, 2, Some(&tuning));
        for _ in 0..8 {
            limiter.check_and_increment(&hot, 2, Some(&tuning));
        }
        assert!(matches!(
            limiter.window_of(&hot).unwrap().state(),
            ThrottleState::Throttled { .. }
        ));
        clock.advance(TimeDelta::seconds(61));
        assert_eq!(limiter.evict_expired(), 1);
        assert!(limiter.window_of(&idle).is_none());
        assert!(limiter.window_of(&hot).is_some());
    }

    #[test]
    fn test_same_user_id_in_other_organization_has_own_window() {
        let (limiter, _) = limiter();
        let acme = RateKey::identity(SecurityMode::Production, "acme", "alice");
        let globex = RateKey::identity(SecurityMode::Production, "globex", "alice");
        assert_eq!(acme.as_str(), "production:user:acme/alice");
        assert_ne!(acme, globex);
        for _ in 0..3 {
            limiter.check_and_increment(&acme, 3, None);
        }
        assert!(limiter.check_and_increment(&acme, 3, None).exceeded());
        assert!(!limiter.check_and_increment(&globex, 3, None).exceeded());
    }

    #[test]
    fn test_evicted_key_starts_fresh_window() {
        let (limiter, clock) = limiter();
        let key = RateKey::identity(SecurityMode::Production, "acme", "alice");
        limiter.check_and_increment(&key, 3, None);
        let stale = limiter.slot(&key, 3, clock.now());

        clock.advance(TimeDelta::seconds(61));
        assert_eq!(limiter.evict_expired(), 1);
        assert!(stale.lock().retired);

        let check = limiter.check_and_increment(&key, 3, None);
        assert_eq!(*check.count(), 1);
        assert_eq!(limiter.window_of(&key).unwrap().count(), &1);
    }

    #[test]
    fn test_huge_cooldown_saturates_instead_of_panicking() {
        let (limiter, _) = limiter();
        let tuning = AdaptiveTuning::default()
            .with_breach_trigger(1)
            .with_cooldown_secs(u64::MAX)
            .with_observation_windows(u32::MAX);
        let key = RateKey::identity(SecurityMode::HighAssurance, "acme", "alice");
        let transitions: Vec<_> = (0..5)
            .filter_map(|_| *limiter.check_and_increment(&key, 1, Some(&tuning)).transition())
            .collect();
        assert!(matches!(
            transitions.as_slice(),
            [ThrottleTransition::Engaged { until }] if *until == DateTime::<Utc>::MAX_UTC
        ));
    }
}
