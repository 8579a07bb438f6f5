//! Decision metrics for the policy engine.
//!
//! Available with the `metrics` feature.

use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Meter},
};
use tracing::debug;

/// Counters for decisions, denials and alerts.
#[derive(Clone)]
pub struct PolicyMetrics {
    /// Meter handle kept alive for metric instruments
    _meter: Meter,
    /// Decisions by mode and outcome
    pub decisions: Counter<u64>,
    /// Denials by mode and reason
    pub denials: Counter<u64>,
    /// Alerts by mode and kind
    pub alerts: Counter<u64>,
}

impl std::fmt::Debug for PolicyMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyMetrics").finish_non_exhaustive()
    }
}

impl PolicyMetrics {
    /// Create instruments on the global meter.
    pub fn new() -> Self {
        debug!("Getting global meter for taskward_policy");
        let meter = global::meter("taskward_policy");

        let decisions = meter
            .u64_counter("policy.decisions")
            .with_description("Policy decisions by outcome")
            .build();
        let denials = meter
            .u64_counter("policy.denials")
            .with_description("Policy denials by reason")
            .build();
        let alerts = meter
            .u64_counter("policy.alerts")
            .with_description("Security alerts raised")
            .build();

        debug!("PolicyMetrics instruments created");
        Self {
            _meter: meter,
            decisions,
            denials,
            alerts,
        }
    }

    /// Record one decision.
    pub fn record_decision(&self, mode: &str, denial_reason: Option<&str>) {
        let outcome = if denial_reason.is_some() { "deny" } else { "allow" };
        self.decisions.add(
            1,
            &[
                KeyValue::new("mode", mode.to_string()),
                KeyValue::new("outcome", outcome),
            ],
        );
        if let Some(reason) = denial_reason {
            self.denials.add(
                1,
                &[
                    KeyValue::new("mode", mode.to_string()),
                    KeyValue::new("reason", reason.to_string()),
                ],
            );
        }
    }

    /// Record one alert.
    pub fn record_alert(&self, mode: &str, kind: &str) {
        self.alerts.add(
            1,
            &[
                KeyValue::new("mode", mode.to_string()),
                KeyValue::new("kind", kind.to_string()),
            ],
        );
    }
}

impl Default for PolicyMetrics {
    fn default() -> Self {
        Self::new()
    }
}
