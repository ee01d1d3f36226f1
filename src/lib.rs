//! Request telemetry for an API gateway.
//!
//! Traces and aggregated stats for the three stages a request crosses:
//! the inbound router, the internal proxy pipe and the outbound backend
//! call. Exporters are plugged in by name and enabled from the service's
//! extra configuration.

// Configuration and core model
pub mod config;
pub mod stats;
pub mod trace;

// Instrumentation layers
pub mod proxy;
pub mod router;
pub mod transport;

// Export
pub mod exporter;

// Process
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use config::{ServiceConfig, TelemetryConfig};
pub use exporter::{register_builtin_exporters, Registry, RegistryError};
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
pub use proxy::PipeLayer;
pub use router::RouterLayer;
pub use transport::TransportLayer;
