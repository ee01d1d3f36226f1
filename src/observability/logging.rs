//! Structured logging.
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - `RUST_LOG` wins over the command line level

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when neither `RUST_LOG` nor a level is given.
pub const DEFAULT_DIRECTIVES: &str = "gateway_telemetry=info,tower_http=info";

/// Filter directives for an optional level override.
pub fn directives(level: Option<&str>) -> String {
    match level {
        Some(level) => format!("gateway_telemetry={},tower_http={}", level, level),
        None => DEFAULT_DIRECTIVES.to_string(),
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_logging(level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| directives(level).into());

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
