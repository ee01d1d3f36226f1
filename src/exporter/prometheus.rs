//! Prometheus exporter: aggregated views served on a dedicated scrape listener.
//!
//! View data is bridged into a local `metrics` recorder owned by the
//! exporter. Counts become counters, sums become gauges, and distributions
//! are rendered as `_count`/`_sum`/`_bucket{le}` series with cumulative
//! bucket counts.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use metrics::Label;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::time;
use tokio_util::sync::CancellationToken;

use super::{exporter_options, ExportedBackend, ExporterError};
use crate::config::TelemetryConfig;
use crate::lifecycle::Shutdown;
use crate::stats::{Aggregation, AggregationData, ViewData, ViewExporter};

pub const NAME: &str = "prometheus";

/// Path served by the scrape listener.
pub const METRICS_PATH: &str = "/metrics";

/// Grace period for in-flight scrapes once shutdown starts.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Options of the `prometheus` exporter block.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrometheusOptions {
    /// Prefix of every metric name.
    pub namespace: String,

    /// Port of the scrape listener, bound on all interfaces.
    pub port: u16,

    pub tag_host: bool,
    pub tag_path: bool,
    pub tag_method: bool,
    pub tag_statuscode: bool,
}

impl Default for PrometheusOptions {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            port: 9091,
            tag_host: false,
            tag_path: false,
            tag_method: false,
            tag_statuscode: false,
        }
    }
}

/// Prometheus exposition of the registered views.
pub struct PrometheusExporter {
    namespace: String,
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl PrometheusExporter {
    pub fn new(namespace: impl Into<String>) -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        Self {
            namespace: namespace.into(),
            recorder,
            handle,
        }
    }

    pub fn handle(&self) -> PrometheusHandle {
        self.handle.clone()
    }

    /// Current exposition text.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    fn metric_name(&self, view: &str) -> String {
        let view = sanitize(view);
        if self.namespace.is_empty() {
            view
        } else {
            format!("{}_{}", sanitize(&self.namespace), view)
        }
    }
}

impl std::fmt::Debug for PrometheusExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusExporter")
            .field("namespace", &self.namespace)
            .finish()
    }
}

/// Replace every character Prometheus does not accept in names with `_`.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

impl ViewExporter for PrometheusExporter {
    fn export_view(&self, data: &ViewData) {
        let name = self.metric_name(&data.view.name);

        metrics::with_local_recorder(&self.recorder, || {
            for row in &data.rows {
                let labels: Vec<Label> = row
                    .tags
                    .iter()
                    .map(|(key, value)| Label::new(sanitize(key.name()), value.clone()))
                    .collect();

                match (&row.data, &data.view.aggregation) {
                    (AggregationData::Count(count), _) => {
                        metrics::counter!(name.clone(), labels).absolute(*count);
                    }
                    (AggregationData::Sum(sum), _) => {
                        metrics::gauge!(name.clone(), labels).set(*sum);
                    }
                    (
                        AggregationData::Distribution {
                            count,
                            sum,
                            bucket_counts,
                            ..
                        },
                        Aggregation::Distribution(bounds),
                    ) => {
                        metrics::counter!(format!("{}_count", name), labels.clone())
                            .absolute(*count);
                        metrics::gauge!(format!("{}_sum", name), labels.clone()).set(*sum);

                        let mut cumulative = 0;
                        for (i, bucket) in bucket_counts.iter().enumerate() {
                            cumulative += bucket;
                            let le = bounds
                                .get(i)
                                .map(|bound| bound.to_string())
                                .unwrap_or_else(|| "+Inf".to_string());
                            let mut bucket_labels = labels.clone();
                            bucket_labels.push(Label::new("le", le));
                            metrics::counter!(format!("{}_bucket", name), bucket_labels)
                                .absolute(cumulative);
                        }
                    }
                    (AggregationData::Distribution { .. }, _) => {}
                }
            }
        });
    }
}

async fn render_metrics(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

/// Bind the scrape listener and serve it until shutdown is triggered.
///
/// Must be called from within a tokio runtime. The server task is tracked
/// by `shutdown`. Returns the bound address.
pub fn serve_metrics(
    addr: &str,
    handle: PrometheusHandle,
    shutdown: &Shutdown,
) -> Result<SocketAddr, ExporterError> {
    let runtime = tokio::runtime::Handle::try_current()
        .map_err(|e| ExporterError::Build(format!("prometheus exporter needs a runtime: {}", e)))?;

    let bind_error = |source: std::io::Error| ExporterError::Bind {
        addr: addr.to_string(),
        source,
    };
    let std_listener = std::net::TcpListener::bind(addr).map_err(bind_error)?;
    std_listener.set_nonblocking(true).map_err(bind_error)?;
    let local_addr = std_listener.local_addr().map_err(bind_error)?;

    let listener = {
        let _guard = runtime.enter();
        TcpListener::from_std(std_listener).map_err(bind_error)?
    };

    let app = Router::new()
        .route(METRICS_PATH, get(render_metrics))
        .with_state(handle);

    tracing::info!(address = %local_addr, path = METRICS_PATH, "Prometheus scrape listener starting");
    shutdown
        .spawn(run_server(listener, app, shutdown.subscribe(), SHUTDOWN_TIMEOUT))
        .map_err(|e| ExporterError::Build(format!("prometheus exporter needs a runtime: {}", e)))?;
    Ok(local_addr)
}

/// How the scrape listener ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerExit {
    Stopped,
    Aborted,
    Failed,
}

async fn run_server(
    listener: TcpListener,
    app: Router,
    cancel: CancellationToken,
    grace: Duration,
) -> ServerExit {
    let shutdown = cancel.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .into_future();
    let mut server = tokio::spawn(server);

    tokio::select! {
        result = &mut server => {
            return match result {
                Ok(Ok(())) => ServerExit::Stopped,
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Prometheus scrape listener failed");
                    ServerExit::Failed
                }
                Err(e) => {
                    tracing::error!(error = %e, "Prometheus scrape listener panicked");
                    ServerExit::Failed
                }
            };
        }
        _ = cancel.cancelled() => {}
    }

    match time::timeout(grace, &mut server).await {
        Ok(_) => {
            tracing::info!("Prometheus scrape listener stopped");
            ServerExit::Stopped
        }
        Err(_) => {
            tracing::warn!("Prometheus scrape listener did not stop in time, aborting");
            server.abort();
            ServerExit::Aborted
        }
    }
}

/// Enabled by a `prometheus` block; starts the scrape listener.
pub fn factory(
    shutdown: &Shutdown,
    cfg: &TelemetryConfig,
) -> Result<ExportedBackend, ExporterError> {
    let options: PrometheusOptions = exporter_options(cfg, NAME)?;
    let exporter = Arc::new(PrometheusExporter::new(options.namespace.clone()));

    let addr = format!("0.0.0.0:{}", options.port);
    serve_metrics(&addr, exporter.handle(), shutdown)?;

    Ok(ExportedBackend::views(exporter))
}
