//! Instrumented transport chain for backend calls.
//!
//! # Data Flow
//! ```text
//! Request (SpanContext of the calling stage in extensions)
//!     → trace.rs   (client span, B3 headers, request attributes)
//!     → stats.rs   (tags, request size, request counter)
//!     → base transport
//!     ← Response body wrapped twice by body.rs
//!         stats finisher: one measurement batch
//!         trace finisher: span end
//! ```
//!
//! # Design Decisions
//! - Each layer owns its finisher; exactly-once follows from ownership
//! - Health check paths skip both layers
//! - A disabled chain still wraps bodies so the response type is uniform

pub mod attributes;
pub mod body;
pub mod path;
pub mod stats;
pub mod trace;

use std::sync::Arc;

use tower::Layer;

pub use attributes::{RequestInfo, TagGenerator};
pub use body::{BodyEnd, BodyOutcome, Finisher, TrackedBody};
pub use path::PathAggregator;
pub use stats::{StatsFuture, StatsLayer, StatsService};
pub use trace::{
    is_cancellation, is_health_endpoint, trace_status, TraceFuture, TraceLayer, TraceService,
};

use crate::config::BackendConfig;
use crate::exporter::Registry;
use crate::stats::StatsRecorder;
use crate::trace::Tracer;

/// Service produced by [`TransportLayer`].
pub type InstrumentedTransport<S> = TraceService<StatsService<S>>;

/// Trace layer over stats layer over the base transport.
#[derive(Clone, Debug)]
pub struct TransportLayer {
    trace: TraceLayer,
    stats: StatsLayer,
}

impl TransportLayer {
    pub fn new(tracer: Arc<Tracer>, recorder: Arc<StatsRecorder>, tags: Vec<TagGenerator>) -> Self {
        Self {
            trace: TraceLayer::new(tracer),
            stats: StatsLayer::new(recorder, tags),
        }
    }

    /// Chain for calls to one backend, tagged with host, aggregated path
    /// and method. Gated by the backend layer switch.
    pub fn for_backend(registry: &Registry, cfg: Option<&BackendConfig>) -> Self {
        let tags = attributes::backend_tag_generators(PathAggregator::for_backend(cfg));
        Self::new(registry.tracer().clone(), registry.recorder().clone(), tags)
            .enabled(registry.is_backend_enabled())
    }

    pub fn enabled(self, enabled: bool) -> Self {
        Self {
            trace: self.trace.enabled(enabled),
            stats: self.stats.enabled(enabled),
        }
    }

    /// Replace the trace layer settings (propagator, span name).
    pub fn map_trace(self, f: impl FnOnce(TraceLayer) -> TraceLayer) -> Self {
        Self {
            trace: f(self.trace),
            stats: self.stats,
        }
    }
}

impl<S> Layer<S> for TransportLayer {
    type Service = InstrumentedTransport<S>;

    fn layer(&self, inner: S) -> Self::Service {
        self.trace.layer(self.stats.layer(inner))
    }
}
