//! gateway-telemetry
//!
//! Runs a small forwarding gateway with router, pipe and backend
//! instrumentation enabled from the service configuration.
//!
//! ```text
//!     Client ──▶ RouterLayer ──▶ PipeLayer ──▶ forward ──▶ PipeLayer ──▶ Trace ──▶ Stats ──▶ Backend
//!                    │               │                        │            │         │
//!                    └───────────────┴──── spans ─────────────┴────────────┘         │
//!                                          │                                         │
//!                                          ▼                                         ▼
//!                                   span exporters                           stats recorder
//!                                 (logger, zipkin)                  ──▶ view exporters (logger, prometheus)
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use gateway_telemetry::config::load_service_config;
use gateway_telemetry::exporter::{register_builtin_exporters, Registry};
use gateway_telemetry::http::GatewayServer;
use gateway_telemetry::lifecycle::{wait_for_signal, Shutdown};
use gateway_telemetry::observability::init_logging;
use gateway_telemetry::ServiceConfig;

/// How long background tasks get to finish their last flush.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "gateway-telemetry")]
#[command(about = "Instrumented API gateway", long_about = None)]
struct Cli {
    /// Service configuration file (.json or .toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level of this crate (overridden by RUST_LOG).
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    tracing::info!("gateway-telemetry v{} starting", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(path) => load_service_config(path)?,
        None => ServiceConfig::default(),
    };
    tracing::info!(
        service = %config.name,
        bind_address = %config.bind_address,
        endpoints = config.endpoints.len(),
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();
    let registry = Registry::global();
    register_builtin_exporters(registry);

    match registry.setup(&shutdown, &config, Vec::new()) {
        Ok(()) => {}
        Err(e) if e.is_no_config() => {
            tracing::info!("No telemetry config found, instrumentation disabled");
        }
        Err(e) => {
            tracing::warn!(error = %e, "Telemetry setup failed, instrumentation disabled");
        }
    }

    let listener = TcpListener::bind(&config.bind_address).await?;
    let server = GatewayServer::new(config, registry);
    tokio::spawn(wait_for_signal(shutdown.clone()));

    server.run(listener, shutdown.subscribe()).await?;

    // Stop the reporter and exporter loops once the listener has drained,
    // then flush whatever spans are still queued.
    shutdown.trigger();
    shutdown.wait(DRAIN_TIMEOUT).await;
    registry.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
