//! Describe command handler.

use serde::Serialize;
use std::fmt::Write as _;
use taskward_policy::{EngineConfig, PolicyReport};

use super::OutputFormat;

/// Handles the describe command.
///
/// Validates the configuration exactly as a running engine would, then
/// prints the active policy report.
#[tracing::instrument(skip_all, fields(format = ?format))]
pub fn handle_describe_command(config: &EngineConfig, format: OutputFormat) -> anyhow::Result<()> {
    let report = config.bundle()?.report();
    tracing::debug!(mode = %report.mode(), "Rendering policy report");

    let rendered = match format {
        OutputFormat::Human => render_human(&report),
        OutputFormat::Json => serde_json::to_string_pretty(&report)?,
        OutputFormat::Toml => toml::to_string_pretty(&report)?,
    };
    println!("{}", rendered);
    Ok(())
}

/// Snake-case wire name of a unit enum value.
fn label<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        Ok(other) => other.to_string(),
        Err(_) => "unknown".to_string(),
    }
}

fn render_human(report: &PolicyReport) -> String {
    let bundle = report.bundle();
    let token = bundle.token();
    let rate = bundle.rate_limit();
    let mut out = String::new();

    let _ = writeln!(out, "Security mode: {}", report.mode());
    let _ = writeln!(out);

    let _ = writeln!(out, "Tokens");
    match token.ttl_secs() {
        Some(ttl) => {
            let _ = writeln!(out, "  lifetime:        {}s", ttl);
        }
        None => {
            let _ = writeln!(out, "  lifetime:        unlimited");
        }
    }
    let _ = writeln!(out, "  binding:         {}", label(token.binding()));
    let _ = writeln!(out, "  reuse detection: {}", token.reuse_detection());

    let _ = writeln!(out, "Authorization");
    let _ = writeln!(out, "  strictness:      {}", label(bundle.authorization()));

    let _ = writeln!(out, "Rate limiting");
    match rate.threshold() {
        Some(threshold) => {
            let _ = writeln!(
                out,
                "  threshold:       {} per {}s",
                threshold,
                rate.window_secs()
            );
        }
        None => {
            let _ = writeln!(out, "  threshold:       disabled");
        }
    }
    if let Some(tuning) = rate.adaptive_tuning() {
        let _ = writeln!(
            out,
            "  adaptive:        halve after {} breaches in {} windows, {}s cooldown",
            tuning.breach_trigger(),
            tuning.observation_windows(),
            tuning.cooldown_secs()
        );
    }

    let _ = writeln!(out, "Audit");
    let _ = writeln!(out, "  verbosity:       {}", label(bundle.audit()));
    let _ = writeln!(out, "  error detail:    {}", label(bundle.error_detail()));

    let _ = writeln!(out);
    let _ = writeln!(out, "Active controls:");
    for control in report.controls() {
        let _ = writeln!(out, "  - {}", control);
    }

    if !report.known_risks().is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Known risks:");
        for risk in report.known_risks() {
            let _ = writeln!(out, "  ! {}", risk);
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "Operational notes:");
    for note in report.operational_notes() {
        let _ = writeln!(out, "  * {}", note);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskward_policy::{PolicyBundle, SecurityMode};

    #[test]
    fn test_mvp_report_lists_known_risks() {
        let rendered = render_human(&PolicyBundle::for_mode(SecurityMode::Mvp).report());
        assert!(rendered.starts_with("Security mode: mvp"));
        assert!(rendered.contains("Known risks:"));
        assert!(rendered.contains("lifetime:        unlimited"));
        assert!(rendered.contains("threshold:       disabled"));
    }

    #[test]
    fn test_high_assurance_report_shows_hardening() {
        let rendered =
            render_human(&PolicyBundle::for_mode(SecurityMode::HighAssurance).report());
        assert!(rendered.starts_with("Security mode: high_assurance"));
        assert!(rendered.contains("lifetime:        900s"));
        assert!(rendered.contains("binding:         ip_bound"));
        assert!(rendered.contains("threshold:       30 per 60s"));
        assert!(rendered.contains("halve after 3 breaches in 5 windows, 300s cooldown"));
        assert!(rendered.contains("  - ip_binding"));
        assert!(!rendered.contains("Known risks:"));
    }

    #[test]
    fn test_report_serializes_to_toml() {
        let report = PolicyBundle::for_mode(SecurityMode::Production).report();
        let rendered = toml::to_string_pretty(&report).unwrap();
        assert!(rendered.contains("mode = \"production\""));
    }
}
