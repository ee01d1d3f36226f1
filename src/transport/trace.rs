//! Trace span layer for outgoing round trips.
//!
//! The span is started before the inner transport is called and ended
//! either right away (transport error, dropped future) or by the body
//! tracker once the response body is exhausted or dropped.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use http::{Request, Response};
use http_body::Body;
use pin_project_lite::pin_project;
use tower::{Layer, Service};

use super::attributes::{request_attributes, response_attributes, span_name_from_request, RequestInfo};
use super::body::{BodyEnd, TrackedBody};
use opentelemetry::trace::Span as _;

use crate::trace::propagation::{self, Propagator};
use crate::trace::{CanonicalCode, Span, SpanContext, SpanKind, Status, Tracer};

/// Health check paths hit by infrastructure; never instrumented.
pub const HEALTH_PATHS: [&str; 2] = ["/healthz", "/_ah/health"];

/// Status message recorded when the caller gives up on a round trip.
pub const CANCELED_MESSAGE: &str = "context canceled";

pub fn is_health_endpoint(path: &str) -> bool {
    HEALTH_PATHS.contains(&path)
}

/// Whether an error is the cancellation of the caller's request.
pub fn is_cancellation(message: &str) -> bool {
    message == CANCELED_MESSAGE
}

/// Span status of a response with this HTTP status code.
pub fn trace_status(http_status: u16) -> Status {
    CanonicalCode::from_http(http_status).to_status()
}

/// Derives the span name from the outgoing request.
pub type SpanNameFormatter = Arc<dyn Fn(&RequestInfo<'_>) -> String + Send + Sync>;

/// Starts a client span around each round trip.
#[derive(Clone)]
pub struct TraceLayer {
    tracer: Arc<Tracer>,
    propagator: Propagator,
    span_name: SpanNameFormatter,
    enabled: bool,
}

impl TraceLayer {
    pub fn new(tracer: Arc<Tracer>) -> Self {
        Self {
            tracer,
            propagator: propagation::b3(),
            span_name: Arc::new(span_name_from_request),
            enabled: true,
        }
    }

    pub fn with_propagator(mut self, propagator: Propagator) -> Self {
        self.propagator = propagator;
        self
    }

    pub fn with_span_name(mut self, span_name: SpanNameFormatter) -> Self {
        self.span_name = span_name;
        self
    }

    /// A disabled layer passes requests through without a span.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl fmt::Debug for TraceLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceLayer")
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl<S> Layer<S> for TraceLayer {
    type Service = TraceService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TraceService {
            inner,
            layer: self.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TraceService<S> {
    inner: S,
    layer: TraceLayer,
}

impl<S, ReqB, ResB> Service<Request<ReqB>> for TraceService<S>
where
    S: Service<Request<ReqB>, Response = Response<ResB>>,
    S::Error: fmt::Display,
    ResB: Body,
{
    type Response = Response<TrackedBody<ResB>>;
    type Error = S::Error;
    type Future = TraceFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqB>) -> Self::Future {
        if !self.layer.enabled || is_health_endpoint(req.uri().path()) {
            return TraceFuture::passthrough(self.inner.call(req));
        }

        let info = RequestInfo::from_request(&req);
        let name = (self.layer.span_name)(&info);
        let attributes = request_attributes(&info);

        let mut span = self.layer.tracer.start(
            name,
            SpanKind::Client,
            req.extensions().get::<SpanContext>(),
            Vec::new(),
        );

        propagation::inject(
            self.layer.propagator.as_ref(),
            span.span_context(),
            req.headers_mut(),
        );
        span.set_attributes(attributes);

        TraceFuture {
            inner: self.inner.call(req),
            span: Some(span),
        }
    }
}

pin_project! {
    /// Response future of [`TraceService`].
    pub struct TraceFuture<F> {
        #[pin]
        inner: F,
        span: Option<Span>,
    }

    impl<F> PinnedDrop for TraceFuture<F> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if let Some(mut span) = this.span.take() {
                span.set_status(Status::error(CANCELED_MESSAGE));
                span.end();
            }
        }
    }
}

impl<F> TraceFuture<F> {
    fn passthrough(inner: F) -> Self {
        Self { inner, span: None }
    }
}

impl<F, ResB, E> Future for TraceFuture<F>
where
    F: Future<Output = Result<Response<ResB>, E>>,
    E: fmt::Display,
    ResB: Body,
{
    type Output = Result<Response<TrackedBody<ResB>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = ready!(this.inner.poll(cx));

        let Some(mut span) = this.span.take() else {
            return Poll::Ready(result.map(|res| res.map(TrackedBody::untracked)));
        };

        match result {
            Err(err) => {
                span.set_status(Status::error(err.to_string()));
                span.end();
                Poll::Ready(Err(err))
            }
            Ok(res) => {
                let status = res.status().as_u16();
                span.set_attributes(response_attributes(status));
                span.set_status(trace_status(status));

                Poll::Ready(Ok(res.map(|body| {
                    TrackedBody::new(
                        body,
                        Box::new(move |outcome| {
                            if let BodyEnd::Error(message) = outcome.end {
                                span.set_status(Status::error(message));
                            }
                            span.end();
                        }),
                    )
                })))
            }
        }
    }
}
