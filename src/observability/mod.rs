//! Observability of the gateway process itself.
//!
//! Request telemetry lives in `trace`, `stats` and `exporter`; this module
//! only sets up the log subscriber those subsystems write to.

pub mod logging;

pub use logging::{init_logging, DEFAULT_DIRECTIVES};
