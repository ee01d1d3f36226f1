//! Exporter that writes spans and view rows to the log.

use std::future::{self, Future};
use std::sync::Arc;

use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::trace::{SpanData, SpanExporter};

use super::{exporter_options, ExportedBackend, ExporterError, SpanExport};
use crate::config::TelemetryConfig;
use crate::lifecycle::Shutdown;
use crate::stats::{ViewData, ViewExporter};

pub const NAME: &str = "logger";

/// Emits finished spans and aggregated rows as `debug` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogExporter;

impl ViewExporter for LogExporter {
    fn export_view(&self, data: &ViewData) {
        if data.rows.is_empty() {
            return;
        }
        tracing::debug!(view = %data.view.name, rows = data.rows.len(), "View data");
        for row in &data.rows {
            tracing::debug!(view = %data.view.name, tags = ?row.tags, data = ?row.data, "View row");
        }
    }
}

impl SpanExporter for LogExporter {
    fn export(&self, batch: Vec<SpanData>) -> impl Future<Output = OTelSdkResult> + Send {
        for span in &batch {
            let duration = span
                .end_time
                .duration_since(span.start_time)
                .unwrap_or_default();
            tracing::debug!(
                name = %span.name,
                trace_id = %span.span_context.trace_id(),
                span_id = %span.span_context.span_id(),
                kind = ?span.span_kind,
                status = ?span.status,
                duration_ms = duration.as_millis() as u64,
                attributes = ?span.attributes,
                "Span finished"
            );
        }
        future::ready(Ok(()))
    }
}

/// Enabled by an (empty) `logger` block.
pub fn factory(
    _shutdown: &Shutdown,
    cfg: &TelemetryConfig,
) -> Result<ExportedBackend, ExporterError> {
    let _: serde_json::Value = exporter_options(cfg, NAME)?;
    Ok(ExportedBackend::Both {
        views: Arc::new(LogExporter),
        spans: SpanExport::simple(LogExporter),
    })
}
