//! Exporter registry and built-in exporters.
//!
//! # Data Flow
//! ```text
//! register_exporter_factory (append-only, before setup)
//!     → Registry::setup (once per process)
//!         → parse TelemetryConfig from the service extra config
//!         → call every factory; failures are logged and skipped
//!         → ExportedBackend → view exporters / span exporters
//!         → SdkTracerProvider (sampler, resource, span processors) installed
//!         → reporting period, view tag rewriting, view registration
//!         → enabled layers published
//! ```
//!
//! # Design Decisions
//! - Capabilities are declared by the factory result, not inferred
//! - One failing exporter never blocks the others
//! - Background work started by factories is tracked by the setup `Shutdown`

pub mod logging;
pub mod prometheus;
pub mod registry;
pub mod zipkin;

use std::fmt;
use std::sync::Arc;

use opentelemetry_sdk::trace::{
    BatchConfig, BatchSpanProcessor, SpanExporter, TracerProviderBuilder,
};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::TelemetryConfig;
use crate::lifecycle::Shutdown;
use crate::stats::ViewExporter;

pub use registry::{Registry, RegistryError};

type Install = Box<dyn FnOnce(TracerProviderBuilder) -> TracerProviderBuilder + Send>;

/// A span exporter together with the processor that feeds it.
pub struct SpanExport {
    service_name: Option<String>,
    install: Install,
}

impl SpanExport {
    /// Export each span synchronously when it ends.
    pub fn simple<E: SpanExporter + 'static>(exporter: E) -> Self {
        Self {
            service_name: None,
            install: Box::new(move |builder| builder.with_simple_exporter(exporter)),
        }
    }

    /// Queue spans and export them in batches from a background worker.
    pub fn batch<E: SpanExporter + 'static>(exporter: E, config: BatchConfig) -> Self {
        Self {
            service_name: None,
            install: Box::new(move |builder| {
                let processor = BatchSpanProcessor::builder(exporter)
                    .with_batch_config(config)
                    .build();
                builder.with_span_processor(processor)
            }),
        }
    }

    /// Service name this exporter reports spans under.
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    pub(crate) fn install(self, builder: TracerProviderBuilder) -> TracerProviderBuilder {
        (self.install)(builder)
    }
}

impl fmt::Debug for SpanExport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanExport")
            .field("service_name", &self.service_name)
            .finish_non_exhaustive()
    }
}

/// What a factory produced, classified by capability.
pub enum ExportedBackend {
    Views(Arc<dyn ViewExporter>),
    Spans(SpanExport),
    Both {
        views: Arc<dyn ViewExporter>,
        spans: SpanExport,
    },
    Neither,
}

impl ExportedBackend {
    pub fn views<E: ViewExporter + 'static>(exporter: Arc<E>) -> Self {
        ExportedBackend::Views(exporter)
    }

    pub fn has_views(&self) -> bool {
        matches!(self, ExportedBackend::Views(_) | ExportedBackend::Both { .. })
    }

    pub fn has_spans(&self) -> bool {
        matches!(self, ExportedBackend::Spans(_) | ExportedBackend::Both { .. })
    }

    pub fn into_parts(self) -> (Option<Arc<dyn ViewExporter>>, Option<SpanExport>) {
        match self {
            ExportedBackend::Views(views) => (Some(views), None),
            ExportedBackend::Spans(spans) => (None, Some(spans)),
            ExportedBackend::Both { views, spans } => (Some(views), Some(spans)),
            ExportedBackend::Neither => (None, None),
        }
    }
}

impl fmt::Debug for ExportedBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            ExportedBackend::Views(_) => "Views",
            ExportedBackend::Spans(_) => "Spans",
            ExportedBackend::Both { .. } => "Both",
            ExportedBackend::Neither => "Neither",
        };
        f.write_str(kind)
    }
}

#[derive(Debug, Error)]
pub enum ExporterError {
    /// The exporter has no options block; not an error condition.
    #[error("exporter disabled")]
    Disabled,

    #[error("invalid exporter options: {0}")]
    InvalidOptions(#[source] serde_json::Error),

    #[error("failed to bind metrics listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build exporter: {0}")]
    Build(String),
}

/// Builds an exporter from the parsed configuration.
pub type ExporterFactory = Arc<
    dyn Fn(&Shutdown, &TelemetryConfig) -> Result<ExportedBackend, ExporterError>
        + Send
        + Sync,
>;

/// Decode the options block of exporter `name`; absent means disabled.
pub fn exporter_options<T: DeserializeOwned>(
    cfg: &TelemetryConfig,
    name: &str,
) -> Result<T, ExporterError> {
    let raw = cfg.exporter(name).ok_or(ExporterError::Disabled)?;
    T::deserialize(raw).map_err(ExporterError::InvalidOptions)
}

/// Register the logging, prometheus and zipkin factories.
pub fn register_builtin_exporters(registry: &Registry) {
    registry.register_exporter_factory(logging::NAME, Arc::new(logging::factory));
    registry.register_exporter_factory(prometheus::NAME, Arc::new(prometheus::factory));
    registry.register_exporter_factory(zipkin::NAME, Arc::new(zipkin::factory));
}
