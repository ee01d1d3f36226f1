//! Configuration loading: namespace extraction and file parsing.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::schema::{
    BackendConfig, EndpointConfig, ExtraConfig, RouteExtraConfig, ServiceConfig, TelemetryConfig,
    NAMESPACE,
};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The extension block carries no instrumentation namespace.
    #[error("no extra config defined for the {ns} module", ns = NAMESPACE)]
    NoConfig,

    /// The namespace block exists but does not decode.
    #[error("malformed {ns} config: {0}", ns = NAMESPACE)]
    Malformed(#[source] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Parse error: {0}")]
    Json(#[source] serde_json::Error),
}

/// Decode the service-level instrumentation block.
///
/// A missing namespace key yields [`ConfigError::NoConfig`], which callers
/// treat as "instrumentation disabled" rather than a failure.
pub fn parse_telemetry_config(extra: &ExtraConfig) -> Result<TelemetryConfig, ConfigError> {
    namespaced(Some(extra))
}

/// Decode the route-level block of an inbound endpoint.
pub fn parse_endpoint_config(cfg: Option<&EndpointConfig>) -> Result<RouteExtraConfig, ConfigError> {
    namespaced(cfg.map(|cfg| &cfg.extra_config))
}

/// Decode the route-level block of an outbound backend.
pub fn parse_backend_config(cfg: Option<&BackendConfig>) -> Result<RouteExtraConfig, ConfigError> {
    namespaced(cfg.map(|cfg| &cfg.extra_config))
}

fn namespaced<T: DeserializeOwned>(extra: Option<&ExtraConfig>) -> Result<T, ConfigError> {
    let value = extra
        .and_then(|extra| extra.get(NAMESPACE))
        .ok_or(ConfigError::NoConfig)?;
    T::deserialize(value).map_err(ConfigError::Malformed)
}

/// Load a service configuration from a `.json` or `.toml` file.
pub fn load_service_config(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let config = if is_json {
        serde_json::from_str(&content).map_err(ConfigError::Json)?
    } else {
        toml::from_str(&content)?
    };

    Ok(config)
}
