//! Zipkin exporter: sampled spans batched to a v2 JSON collector.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use opentelemetry_sdk::trace::{BatchConfig, BatchConfigBuilder};
use opentelemetry_zipkin::ZipkinExporter;
use serde::Deserialize;
use url::Url;

use super::{exporter_options, ExportedBackend, ExporterError, SpanExport};
use crate::config::TelemetryConfig;
use crate::lifecycle::Shutdown;

pub const NAME: &str = "zipkin";

/// Lower bound of the span queue in front of the exporter.
const MIN_QUEUE_SIZE: usize = 2048;

fn default_flush_interval_ms() -> u64 {
    1000
}

fn default_buffer_max_count() -> usize {
    1000
}

/// Options of the `zipkin` exporter block.
#[derive(Debug, Clone, Deserialize)]
pub struct ZipkinOptions {
    /// Span ingestion endpoint, e.g. `http://zipkin:9411/api/v2/spans`.
    pub collector_url: String,

    pub service_name: String,

    /// Local endpoint address reported with every span.
    #[serde(default)]
    pub ip: String,

    #[serde(default)]
    pub port: u16,

    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Largest batch posted at once.
    #[serde(default = "default_buffer_max_count")]
    pub buffer_max_count: usize,
}

impl ZipkinOptions {
    fn collector(&self) -> Result<Url, ExporterError> {
        let url = Url::parse(&self.collector_url)
            .map_err(|e| ExporterError::Build(format!("invalid zipkin collector url: {}", e)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(ExporterError::Build(format!(
                "invalid zipkin collector url: unsupported scheme {}",
                scheme
            ))),
        }
    }

    fn local_endpoint(&self) -> Option<SocketAddr> {
        if self.ip.is_empty() {
            return None;
        }
        match self.ip.parse::<IpAddr>() {
            Ok(ip) => Some(SocketAddr::new(ip, self.port)),
            Err(_) => {
                tracing::warn!(ip = %self.ip, "Ignoring unparsable zipkin local endpoint address");
                None
            }
        }
    }

    fn batch_config(&self) -> BatchConfig {
        let batch = self.buffer_max_count.max(1);
        BatchConfigBuilder::default()
            .with_scheduled_delay(Duration::from_millis(self.flush_interval_ms.max(1)))
            .with_max_export_batch_size(batch)
            .with_max_queue_size(batch.max(MIN_QUEUE_SIZE))
            .build()
    }
}

/// Build the exporter on a plain thread; its blocking HTTP client must not
/// be created inside the async runtime.
fn build_exporter(
    collector: &Url,
    local_endpoint: Option<SocketAddr>,
) -> Result<ZipkinExporter, ExporterError> {
    let collector = collector.to_string();
    std::thread::scope(|scope| {
        scope
            .spawn(move || {
                let mut builder = ZipkinExporter::builder().with_collector_endpoint(collector);
                if let Some(addr) = local_endpoint {
                    builder = builder.with_service_address(addr);
                }
                builder.build()
            })
            .join()
    })
    .map_err(|_| ExporterError::Build("zipkin exporter build panicked".to_string()))?
    .map_err(|e| ExporterError::Build(e.to_string()))
}

/// Enabled by a `zipkin` block; spans are queued and posted by the batch
/// worker, with a final flush when the tracer provider shuts down.
pub fn factory(
    _shutdown: &Shutdown,
    cfg: &TelemetryConfig,
) -> Result<ExportedBackend, ExporterError> {
    let options: ZipkinOptions = exporter_options(cfg, NAME)?;
    let collector = options.collector()?;

    let exporter = build_exporter(&collector, options.local_endpoint())?;

    tracing::info!(
        collector = %collector,
        interval_ms = options.flush_interval_ms,
        batch = options.buffer_max_count,
        "Zipkin exporter starting"
    );
    let export = SpanExport::batch(exporter, options.batch_config())
        .with_service_name(options.service_name);
    Ok(ExportedBackend::Spans(export))
}
