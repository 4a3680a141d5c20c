//! Tracing subscriber setup
//!
//! Structured logging for the operator:
//! - JSON lines by default, plain text when `LOG_FORMAT=text`
//! - `RUST_LOG` filtering with a default tuned for the controller
//!
//! Metrics from [`crate::metrics`] are pushed over OTLP when
//! `OTEL_EXPORTER_OTLP_ENDPOINT` is set, and dropped otherwise.

use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, Resource};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str =
    "info,reloader_controller=debug,reloader_operator=debug,kube=info,aws_config=warn,hyper=warn";

/// Errors that can occur during telemetry initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to initialize OTLP metrics exporter
    #[error("failed to initialize metrics exporter: {0}")]
    MetricsInit(String),

    /// Failed to initialize tracing subscriber
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human-readable lines
    Text,
}

impl LogFormat {
    /// Parse a `LOG_FORMAT` value; anything other than `text` means JSON
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("text") {
            Self::Text
        } else {
            Self::Json
        }
    }
}

/// Configuration for telemetry initialization
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name recorded on startup (e.g., "reloader-operator")
    pub service_name: String,
    /// Output format
    pub format: LogFormat,
    /// OTLP endpoint for metric export (e.g., "http://otel-collector:4317")
    /// If None, metrics are not exported
    pub otlp_endpoint: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "reloader".to_string(),
            format: std::env::var("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or_default(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        }
    }
}

/// Install the global tracing subscriber and, if configured, the metrics exporter
///
/// Must run inside a Tokio runtime when `otlp_endpoint` is set.
pub fn init_telemetry(config: TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).try_init(),
    };
    result.map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;

    if let Some(endpoint) = &config.otlp_endpoint {
        init_otlp_metrics(endpoint, &config.service_name)?;
    }

    tracing::info!(
        service = %config.service_name,
        format = ?config.format,
        otlp_endpoint = config.otlp_endpoint.as_deref().unwrap_or("none"),
        "telemetry initialized"
    );
    Ok(())
}

/// Initialize OTLP metrics exporter with periodic push
fn init_otlp_metrics(endpoint: &str, service_name: &str) -> Result<(), TelemetryError> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let reader =
        opentelemetry_sdk::metrics::PeriodicReader::builder(exporter, runtime::Tokio).build();

    let meter_provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(Resource::new([KeyValue::new(
            "service.name",
            service_name.to_string(),
        )]))
        .build();

    global::set_meter_provider(meter_provider);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_parsing() {
        assert_eq!(LogFormat::parse("text"), LogFormat::Text);
        assert_eq!(LogFormat::parse("TEXT"), LogFormat::Text);
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("garbage"), LogFormat::Json);
    }

    #[test]
    fn explicit_config_without_exporter() {
        let config = TelemetryConfig {
            service_name: "reloader-operator".to_string(),
            format: LogFormat::Text,
            otlp_endpoint: None,
        };
        assert_eq!(config.service_name, "reloader-operator");
        assert!(config.otlp_endpoint.is_none());
    }

    #[test]
    fn default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }
}
