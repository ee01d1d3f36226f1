//! Configuration schema definitions.
//!
//! This module defines the instrumentation block read from the service's
//! extra configuration, the per-route aggregation settings, and the small
//! service/endpoint/backend model the gateway hands to the instrumentation.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Namespace key of the instrumentation block inside any `extra_config` map.
pub const NAMESPACE: &str = "gateway_telemetry";

/// Free-form extension block attached to services, endpoints and backends.
pub type ExtraConfig = serde_json::Map<String, serde_json::Value>;

/// Root instrumentation configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Percentage of traces sampled (clamped to 0..=100 when applied).
    pub sample_rate: i64,

    /// Stats reporting period in seconds (0 keeps the recorder default).
    pub reporting_period: u64,

    /// Pipeline stages that get instrumented. Absent means all of them.
    pub enabled_layers: Option<EnabledLayers>,

    /// Exporter name to exporter-specific options. A missing key disables that exporter.
    pub exporters: BTreeMap<String, serde_json::Value>,
}

impl TelemetryConfig {
    /// Reporting period as a duration.
    pub fn reporting_period(&self) -> Duration {
        Duration::from_secs(self.reporting_period)
    }

    /// Resolved layer switches, defaulting every stage to enabled.
    pub fn layers(&self) -> EnabledLayers {
        self.enabled_layers.unwrap_or_default()
    }

    /// Raw options block of a single exporter, if configured.
    pub fn exporter(&self, name: &str) -> Option<&serde_json::Value> {
        self.exporters.get(name)
    }
}

/// Independent switches for the three instrumented pipeline stages.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct EnabledLayers {
    /// Inbound (router-side) requests.
    #[serde(default)]
    pub router: bool,

    /// Internal proxy pipe.
    #[serde(default)]
    pub pipe: bool,

    /// Outbound backend requests.
    #[serde(default)]
    pub backend: bool,
}

impl Default for EnabledLayers {
    fn default() -> Self {
        Self {
            router: true,
            pipe: true,
            backend: true,
        }
    }
}

/// How a concrete request path is reduced to a metric label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum PathAggregation {
    /// Replace every placeholder of the route template.
    #[default]
    Pattern,
    /// Mask only the final segment, when it is a placeholder.
    LastParam,
    /// Report the live path untouched.
    Off,
}

impl From<String> for PathAggregation {
    fn from(value: String) -> Self {
        match value.as_str() {
            "lastparam" | "last-param" => PathAggregation::LastParam,
            "off" => PathAggregation::Off,
            _ => PathAggregation::Pattern,
        }
    }
}

impl From<PathAggregation> for String {
    fn from(value: PathAggregation) -> Self {
        match value {
            PathAggregation::Pattern => "pattern".to_string(),
            PathAggregation::LastParam => "lastparam".to_string(),
            PathAggregation::Off => "off".to_string(),
        }
    }
}

/// Per-route instrumentation settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct RouteExtraConfig {
    pub path_aggregation: PathAggregation,
}

/// Service definition as handed over by the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service name, used for logging.
    pub name: String,

    /// Bind address of the gateway listener (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Inbound endpoints.
    pub endpoints: Vec<EndpointConfig>,

    /// Service-level extension block holding the instrumentation namespace.
    pub extra_config: ExtraConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "gateway".to_string(),
            bind_address: "0.0.0.0:8080".to_string(),
            timeout_secs: 30,
            endpoints: Vec::new(),
            extra_config: ExtraConfig::new(),
        }
    }
}

/// Inbound endpoint, identified by its route template (`/users/:id`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    pub endpoint: String,

    /// Backend the endpoint forwards to.
    pub backend: BackendConfig,

    /// Public endpoints never continue a trace started by the caller.
    #[serde(default)]
    pub public: bool,

    #[serde(default)]
    pub extra_config: ExtraConfig,
}

impl EndpointConfig {
    /// Values captured by the `:name` placeholders of the template from a live path.
    pub fn path_params(&self, path: &str) -> Vec<(String, String)> {
        self.endpoint
            .split('/')
            .zip(path.split('/'))
            .filter_map(|(template, live)| {
                template
                    .strip_prefix(':')
                    .map(|name| (name.to_string(), live.to_string()))
            })
            .collect()
    }
}

/// Outbound backend, identified by its URL template (`/v1/users/{{.Id}}`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Scheme and authority of the backend (e.g., "http://127.0.0.1:3000").
    pub host: String,

    pub url_pattern: String,

    #[serde(default)]
    pub extra_config: ExtraConfig,
}

impl BackendConfig {
    /// Render the URL template, filling `{{.Name}}` markers case-insensitively.
    pub fn render_path(&self, params: &[(String, String)]) -> String {
        let mut rendered = String::with_capacity(self.url_pattern.len());
        let mut rest = self.url_pattern.as_str();
        while let Some(start) = rest.find("{{.") {
            rendered.push_str(&rest[..start]);
            let marker = &rest[start + 3..];
            let Some(end) = marker.find("}}") else {
                rendered.push_str(&rest[start..]);
                return rendered;
            };
            let name = &marker[..end];
            let value = params
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.as_str())
                .unwrap_or_default();
            rendered.push_str(value);
            rest = &marker[end + 2..];
        }
        rendered.push_str(rest);
        rendered
    }
}
