//! Server span and server measures around each inbound request.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Instant;

use http::{Request, Response};
use http_body::Body;
use pin_project_lite::pin_project;
use tower::{Layer, Service};

use crate::config::EndpointConfig;
use crate::exporter::Registry;
use crate::stats::measure::{self, Measure, TagMap};
use crate::stats::StatsRecorder;
use opentelemetry::trace::Span as _;

use crate::trace::propagation::{self, Propagator};
use crate::trace::{Link, Span, SpanKind, Status, Tracer};
use crate::transport::attributes::{
    request_attributes, request_size, response_attributes, server_tags, RequestInfo,
};
use crate::transport::body::{BodyEnd, TrackedBody};
use crate::transport::trace::{is_health_endpoint, trace_status, CANCELED_MESSAGE};
use crate::transport::PathAggregator;

/// Status recorded when the handler never produced a response.
const FAILED_STATUS: u16 = 500;

/// Instruments the handler of one endpoint.
#[derive(Clone)]
pub struct RouterLayer {
    tracer: Arc<Tracer>,
    recorder: Arc<StatsRecorder>,
    propagator: Propagator,
    name: Arc<str>,
    aggregator: PathAggregator,
    public: bool,
    enabled: bool,
}

impl RouterLayer {
    pub fn new(tracer: Arc<Tracer>, recorder: Arc<StatsRecorder>, name: impl Into<String>) -> Self {
        Self {
            tracer,
            recorder,
            propagator: propagation::b3(),
            name: Arc::from(name.into()),
            aggregator: PathAggregator::Identity,
            public: false,
            enabled: true,
        }
    }

    /// Layer for one endpoint, named after its route template and gated by
    /// the router layer switch.
    pub fn for_endpoint(registry: &Registry, cfg: &EndpointConfig) -> Self {
        Self::new(
            registry.tracer().clone(),
            registry.recorder().clone(),
            cfg.endpoint.clone(),
        )
        .with_aggregator(PathAggregator::for_endpoint(Some(cfg)))
        .public(cfg.public)
        .enabled(registry.is_router_enabled())
    }

    pub fn with_propagator(mut self, propagator: Propagator) -> Self {
        self.propagator = propagator;
        self
    }

    pub fn with_aggregator(mut self, aggregator: PathAggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    /// A public endpoint starts a new trace and only links the caller's span.
    pub fn public(mut self, public: bool) -> Self {
        self.public = public;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn start_span<B>(&self, req: &Request<B>) -> Span {
        let name = self.name.to_string();
        match propagation::extract(self.propagator.as_ref(), req.headers()) {
            Some(remote) if !self.public => {
                self.tracer
                    .start(name, SpanKind::Server, Some(&remote), Vec::new())
            }
            remote => {
                let links = remote.map(Link::with_context).into_iter().collect();
                self.tracer.start(name, SpanKind::Server, None, links)
            }
        }
    }
}

impl fmt::Debug for RouterLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterLayer")
            .field("name", &self.name)
            .field("aggregator", &self.aggregator)
            .field("public", &self.public)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl<S> Layer<S> for RouterLayer {
    type Service = RouterService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RouterService {
            inner,
            layer: self.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RouterService<S> {
    inner: S,
    layer: RouterLayer,
}

impl<S, ReqB, ResB> Service<Request<ReqB>> for RouterService<S>
where
    S: Service<Request<ReqB>, Response = Response<ResB>>,
    S::Error: fmt::Display,
    ReqB: Body,
    ResB: Body,
{
    type Response = Response<TrackedBody<ResB>>;
    type Error = S::Error;
    type Future = RouterFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqB>) -> Self::Future {
        if !self.layer.enabled || is_health_endpoint(req.uri().path()) {
            return RouterFuture {
                inner: self.inner.call(req),
                request: None,
            };
        }

        let mut span = self.layer.start_span(&req);
        let info = RequestInfo::from_request(&req);
        span.set_attributes(request_attributes(&info));

        let request = ServerRequest {
            recorder: self.layer.recorder.clone(),
            tags: server_tags(&info, &self.layer.aggregator),
            start: Instant::now(),
            request_size: request_size(&req),
            span,
        };
        request.started();

        req.extensions_mut()
            .insert(request.span.span_context().clone());

        RouterFuture {
            inner: self.inner.call(req),
            request: Some(request),
        }
    }
}

/// Span and measurement state of one inbound request.
struct ServerRequest {
    recorder: Arc<StatsRecorder>,
    tags: TagMap,
    start: Instant,
    request_size: i64,
    span: Span,
}

impl ServerRequest {
    fn started(&self) {
        self.recorder
            .record(&self.tags, &[Measure::ServerRequestCount.m(1.0)]);
    }

    fn finish(mut self, status: u16, bytes_written: u64, failure: Option<String>) {
        let latency_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        let mut measurements = vec![
            Measure::ServerLatency.m(latency_ms),
            Measure::ServerResponseBytes.m(bytes_written as f64),
        ];
        if self.request_size >= 0 {
            measurements.push(Measure::ServerRequestBytes.m(self.request_size as f64));
        }

        let status = if status == 0 { 200 } else { status };
        self.tags.upsert(measure::STATUS_CODE, status.to_string());
        self.recorder.record(&self.tags, &measurements);

        if let Some(message) = failure {
            self.span.set_status(Status::error(message));
        }
        self.span.end();
    }
}

pin_project! {
    /// Response future of [`RouterService`].
    pub struct RouterFuture<F> {
        #[pin]
        inner: F,
        request: Option<ServerRequest>,
    }

    impl<F> PinnedDrop for RouterFuture<F> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if let Some(request) = this.request.take() {
                request.finish(FAILED_STATUS, 0, Some(CANCELED_MESSAGE.to_string()));
            }
        }
    }
}

impl<F, ResB, E> Future for RouterFuture<F>
where
    F: Future<Output = Result<Response<ResB>, E>>,
    E: fmt::Display,
    ResB: Body,
{
    type Output = Result<Response<TrackedBody<ResB>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = ready!(this.inner.poll(cx));

        let Some(mut request) = this.request.take() else {
            return Poll::Ready(result.map(|res| res.map(TrackedBody::untracked)));
        };

        match result {
            Err(err) => {
                request.finish(FAILED_STATUS, 0, Some(err.to_string()));
                Poll::Ready(Err(err))
            }
            Ok(res) => {
                let status = res.status().as_u16();
                request.span.set_attributes(response_attributes(status));
                request.span.set_status(trace_status(status));

                Poll::Ready(Ok(res.map(|body| {
                    TrackedBody::new(
                        body,
                        Box::new(move |outcome| {
                            let failure = match outcome.end {
                                BodyEnd::Error(message) => Some(message),
                                BodyEnd::Eof | BodyEnd::Closed => None,
                            };
                            request.finish(status, outcome.bytes_read, failure);
                        }),
                    )
                })))
            }
        }
    }
}
