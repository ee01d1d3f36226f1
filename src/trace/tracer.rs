//! Process-wide span factory over a swappable tracer provider.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use opentelemetry::trace::{
    Link, SpanContext, SpanKind, TraceContextExt, Tracer as _, TracerProvider as _,
};
use opentelemetry::Context;
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::trace::{Sampler, SdkTracer, SdkTracerProvider};

/// Live span handle. Dropping it ends the span.
pub type Span = opentelemetry_sdk::trace::Span;

/// Instrumentation scope of every span started here.
pub const SCOPE: &str = "gateway-telemetry";

struct Installed {
    provider: SdkTracerProvider,
    tracer: SdkTracer,
}

impl Installed {
    fn new(provider: SdkTracerProvider) -> Self {
        let tracer = provider.tracer(SCOPE);
        Self { provider, tracer }
    }
}

/// Handle shared by every instrumentation layer.
///
/// Layers are built before or after setup; they always start spans on the
/// provider installed at the time of the call. The initial provider samples
/// nothing and exports nowhere.
pub struct Tracer {
    current: ArcSwap<Installed>,
}

impl Tracer {
    pub fn new() -> Self {
        let provider = SdkTracerProvider::builder()
            .with_sampler(Sampler::AlwaysOff)
            .build();
        Self::with_provider(provider)
    }

    pub fn with_provider(provider: SdkTracerProvider) -> Self {
        Self {
            current: ArcSwap::from_pointee(Installed::new(provider)),
        }
    }

    /// Replace the provider; spans already started keep the old one.
    pub fn install(&self, provider: SdkTracerProvider) {
        self.current.store(Arc::new(Installed::new(provider)));
    }

    /// Start a span under `parent`, or a new trace when there is none.
    pub fn start(
        &self,
        name: impl Into<Cow<'static, str>>,
        kind: SpanKind,
        parent: Option<&SpanContext>,
        links: Vec<Link>,
    ) -> Span {
        let installed = self.current.load();
        let cx = match parent {
            Some(parent) => Context::new().with_remote_span_context(parent.clone()),
            None => Context::new(),
        };

        let mut builder = installed.tracer.span_builder(name).with_kind(kind);
        if !links.is_empty() {
            builder = builder.with_links(links);
        }
        builder.start_with_context(&installed.tracer, &cx)
    }

    pub fn force_flush(&self) -> OTelSdkResult {
        self.current.load().provider.force_flush()
    }

    /// Flush and stop every span processor. Blocks while exporters drain.
    pub fn shutdown(&self) -> OTelSdkResult {
        self.current.load().provider.shutdown()
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer").field("scope", &SCOPE).finish()
    }
}
