//! Distributed tracing on top of the OpenTelemetry SDK.
//!
//! # Data Flow
//! ```text
//! Incoming request headers
//!     → propagation.rs (B3 extract, remote parent)
//!     → tracer.rs (installed SdkTracerProvider, sampling decision)
//!     → span processors → span exporters (logger, zipkin)
//!
//! Outgoing request:
//!     current SpanContext → propagation.rs (B3 inject)
//! ```
//!
//! # Design Decisions
//! - The span context is the only thing that crosses stage boundaries
//! - The provider is swapped in once by setup; until then spans are never sampled
//! - HTTP statuses map to canonical codes whose names become the span status

pub mod propagation;
pub mod sampler;
pub mod status;
pub mod tracer;

pub use opentelemetry::trace::{Link, SpanContext, SpanKind, Status};
pub use opentelemetry::KeyValue;
pub use propagation::{b3, Propagator};
pub use sampler::sampler_for_rate;
pub use status::CanonicalCode;
pub use tracer::{Span, Tracer};
