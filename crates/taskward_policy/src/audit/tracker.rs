//! Per-identity denial history for the probing heuristic.

use crate::AlertTuning;
use crate::clock::seconds;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use tracing::debug;

/// Tracks recent authorization denials per identity.
///
/// Histories are keyed by organization and user, so equal user ids in
/// different tenants never share one.
#[derive(Debug, Default)]
pub struct DenialTracker {
    denials: DashMap<String, VecDeque<DateTime<Utc>>>,
}

impl DenialTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Note a denial. Returns the denial count when it reaches the alert
    /// threshold, after which the history starts over.
    pub fn record_denial(
        &self,
        organization_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
        tuning: &AlertTuning,
    ) -> Option<usize> {
        let span = seconds(*tuning.denial_window_secs());
        let mut history = self
            .denials
            .entry(format!("{organization_id}/{user_id}"))
            .or_default();
        history.push_back(now);
        while history.front().is_some_and(|first| now - *first > span) {
            history.pop_front();
        }
        if history.len() >= *tuning.denial_threshold() as usize {
            let count = history.len();
            history.clear();
            debug!(organization_id, user_id, count, "Denial threshold reached");
            return Some(count);
        }
        None
    }

    /// Drop histories with nothing inside the window.
    pub fn purge(&self, now: DateTime<Utc>, tuning: &AlertTuning) -> usize {
        let span = seconds(*tuning.denial_window_secs());
        let before = self.denials.len();
        self.denials
            .retain(|_, history| history.back().is_some_and(|last| now - *last <= span));
        before - self.denials.len()
    }

    /// Number of identities tracked.
    pub fn len(&self) -> usize {
        self.denials.len()
    }

    /// Whether no identities are tracked.
    pub fn is_empty(&self) -> bool {
        self.denials.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_threshold_within_window_alerts_once() {
        let tracker = DenialTracker::new();
        let tuning = AlertTuning::default().with_denial_threshold(3);
        let t0 = DateTime::from_timestamp(1_767_225_600, 0).unwrap();
        assert_eq!(tracker.record_denial("acme", "mallory", t0, &tuning), None);
        assert_eq!(tracker.record_denial("acme", "mallory", t0, &tuning), None);
        assert_eq!(tracker.record_denial("acme", "mallory", t0, &tuning), Some(3));
        assert_eq!(tracker.record_denial("acme", "mallory", t0, &tuning), None);
    }

    #[test]
    fn test_spread_out_denials_do_not_alert() {
        let tracker = DenialTracker::new();
        let tuning = AlertTuning::default().with_denial_threshold(3);
        let mut now = DateTime::from_timestamp(1_767_225_600, 0).unwrap();
        for _ in 0..10 {
            assert_eq!(tracker.record_denial("acme", "slow", now, &tuning), None);
            now += TimeDelta::seconds(40);
        }
        assert_eq!(tracker.purge(now + TimeDelta::seconds(120), &tuning), 1);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_same_user_in_other_tenant_has_own_history() {
        let tracker = DenialTracker::new();
        let tuning = AlertTuning::default().with_denial_threshold(2);
        let t0 = DateTime::from_timestamp(1_767_225_600, 0).unwrap();
        assert_eq!(tracker.record_denial("acme", "alice", t0, &tuning), None);
        assert_eq!(tracker.record_denial("globex", "alice", t0, &tuning), None);
        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.record_denial("acme", "alice", t0, &tuning), Some(2));
    }
}
