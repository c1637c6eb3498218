use serde::Deserialize;

/// Telemetry export configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Service name reported on exported resources
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// OTLP exporter; stdout-only logging when absent
    #[serde(default)]
    pub exporter: Option<ExporterConfig>,
    /// Trace sampling rate in [0, 1]
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: f64,
}

/// OTLP exporter settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExporterConfig {
    /// Collector endpoint
    pub endpoint: String,
    /// Export protocol
    #[serde(default)]
    pub protocol: ExportProtocol,
    /// Metrics export interval in seconds
    #[serde(default = "default_export_interval")]
    pub interval_seconds: u64,
}

/// Supported OTLP transports
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportProtocol {
    #[default]
    Grpc,
    HttpProto,
}

fn default_service_name() -> String {
    "quorum".to_owned()
}

const fn default_sampling_rate() -> f64 {
    1.0
}

const fn default_export_interval() -> u64 {
    30
}
