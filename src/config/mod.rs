//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! service config file (JSON/TOML)
//!     → loader.rs (parse & deserialize)
//!     → ServiceConfig.extra_config[NAMESPACE]
//!     → TelemetryConfig (immutable once registration completes)
//!
//! Per route:
//!     EndpointConfig / BackendConfig .extra_config[NAMESPACE]
//!     → RouteExtraConfig (path aggregation strategy)
//! ```
//!
//! # Design Decisions
//! - A missing namespace key is a distinct, non-fatal outcome (`NoConfig`)
//! - Exporter options stay opaque JSON until the owning exporter decodes them
//! - Reload is not supported; config is read once at startup

pub mod loader;
pub mod schema;

pub use loader::{load_service_config, parse_backend_config, parse_endpoint_config, parse_telemetry_config, ConfigError};
pub use schema::{
    BackendConfig, EnabledLayers, EndpointConfig, ExtraConfig, PathAggregation, RouteExtraConfig,
    ServiceConfig, TelemetryConfig, NAMESPACE,
};
