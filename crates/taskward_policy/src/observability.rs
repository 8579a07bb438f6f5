//! OpenTelemetry meter provider setup for [`PolicyMetrics`](crate::PolicyMetrics).
//!
//! The exporter is chosen by the `[observability]` table of
//! [`EngineConfig`](crate::EngineConfig). Without the `metrics` feature,
//! initialisation is a logged no-op.

#[cfg(feature = "metrics")]
use opentelemetry::{KeyValue, global};
#[cfg(feature = "metrics")]
use opentelemetry_otlp::{MetricExporter as OtlpExporter, WithExportConfig};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::{
    Resource,
    metrics::{PeriodicReader, SdkMeterProvider},
};
#[cfg(feature = "metrics")]
use opentelemetry_stdout::MetricExporter as StdoutExporter;
use serde::{Deserialize, Serialize};
#[cfg(feature = "metrics")]
use std::time::Duration;
use tracing::{info, instrument};

/// Collector endpoint used when `[observability] endpoint` is unset.
pub const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4318";

/// Where policy metrics are exported.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MetricsExporter {
    /// No meter provider is registered
    #[default]
    Disabled,
    /// Periodic dumps to stdout
    Stdout,
    /// OTLP over HTTP
    Otlp,
}

/// `[observability]` table.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    derive_getters::Getters,
    derive_setters::Setters,
)]
#[setters(prefix = "with_", strip_option, into)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Exporter to register
    exporter: MetricsExporter,
    /// OTLP collector endpoint
    endpoint: Option<String>,
    /// Seconds between exports
    export_interval_secs: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            exporter: MetricsExporter::Disabled,
            endpoint: None,
            export_interval_secs: 60,
        }
    }
}

impl ObservabilityConfig {
    /// Endpoint the OTLP exporter sends to.
    pub fn otlp_endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(DEFAULT_OTLP_ENDPOINT)
    }
}

/// Register a global meter provider as described by `config`.
///
/// # Errors
///
/// A description of the failure when the export interval is zero or the
/// OTLP exporter cannot be built.
#[instrument(skip_all, fields(service_name, exporter = %config.exporter))]
pub fn init_observability(
    service_name: &'static str,
    config: &ObservabilityConfig,
) -> Result<(), String> {
    if config.exporter == MetricsExporter::Disabled {
        info!(service_name, "Metrics export disabled");
        return Ok(());
    }
    if config.export_interval_secs == 0 {
        return Err("export_interval_secs must be positive".to_string());
    }

    #[cfg(not(feature = "metrics"))]
    {
        info!(service_name, "Metrics feature disabled, skipping meter provider");
        Ok(())
    }

    #[cfg(feature = "metrics")]
    {
        let resource = Resource::builder_empty()
            .with_attributes([KeyValue::new("service.name", service_name)])
            .build();
        let interval = Duration::from_secs(config.export_interval_secs);

        let provider = match config.exporter {
            MetricsExporter::Otlp => {
                let endpoint = config.otlp_endpoint();
                info!(endpoint, "Using OTLP metrics exporter");
                let exporter = OtlpExporter::builder()
                    .with_http()
                    .with_endpoint(endpoint)
                    .with_timeout(Duration::from_secs(10))
                    .build()
                    .map_err(|e| format!("Failed to create OTLP exporter: {}", e))?;
                SdkMeterProvider::builder()
                    .with_resource(resource)
                    .with_reader(PeriodicReader::builder(exporter).with_interval(interval).build())
                    .build()
            }
            MetricsExporter::Stdout | MetricsExporter::Disabled => {
                info!("Using stdout metrics exporter");
                SdkMeterProvider::builder()
                    .with_resource(resource)
                    .with_reader(
                        PeriodicReader::builder(StdoutExporter::default())
                            .with_interval(interval)
                            .build(),
                    )
                    .build()
            }
        };

        global::set_meter_provider(provider);
        info!(
            service_name,
            export_interval_secs = config.export_interval_secs,
            "Meter provider registered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_exporter_registers_nothing() {
        assert!(init_observability("taskward-test", &ObservabilityConfig::default()).is_ok());
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let config = ObservabilityConfig::default()
            .with_exporter(MetricsExporter::Stdout)
            .with_export_interval_secs(0u64);
        assert!(init_observability("taskward-test", &config).is_err());
    }

    #[test]
    fn test_endpoint_defaults_to_local_collector() {
        let config = ObservabilityConfig::default().with_exporter(MetricsExporter::Otlp);
        assert_eq!(config.otlp_endpoint(), DEFAULT_OTLP_ENDPOINT);
        let config = config.with_endpoint("http://collector:4318");
        assert_eq!(config.otlp_endpoint(), "http://collector:4318");
    }
}
