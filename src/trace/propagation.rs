//! Span context propagation over HTTP headers.

use std::sync::Arc;

use http::HeaderMap;
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::{SpanContext, TraceContextExt};
use opentelemetry::Context;
use opentelemetry_http::{HeaderExtractor, HeaderInjector};

/// Header format shared by the instrumentation layers.
pub type Propagator = Arc<dyn TextMapPropagator + Send + Sync>;

/// Multi-header B3 (`X-B3-TraceId`, `X-B3-SpanId`, `X-B3-Sampled`).
pub fn b3() -> Propagator {
    Arc::new(opentelemetry_zipkin::Propagator::new())
}

/// The remote span context carried by `headers`, if any.
pub fn extract(propagator: &dyn TextMapPropagator, headers: &HeaderMap) -> Option<SpanContext> {
    let cx = propagator.extract_with_context(&Context::new(), &HeaderExtractor(headers));
    let span = cx.span();
    let context = span.span_context();
    context.is_valid().then(|| context.clone())
}

pub fn inject(propagator: &dyn TextMapPropagator, context: &SpanContext, headers: &mut HeaderMap) {
    let cx = Context::new().with_remote_span_context(context.clone());
    propagator.inject_context(&cx, &mut HeaderInjector(headers));
}
