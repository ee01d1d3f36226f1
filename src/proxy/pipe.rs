//! Span middleware for the proxy stage between router and backend.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use http::{Request, Response};
use pin_project_lite::pin_project;
use tower::{Layer, Service};

use crate::config::{BackendConfig, EndpointConfig};
use crate::exporter::Registry;
use opentelemetry::trace::Span as _;

use crate::trace::{KeyValue, Span, SpanContext, SpanKind, Tracer};
use crate::transport::trace::is_cancellation;

pub const ERROR_ATTRIBUTE: &str = "error";
pub const CANCELED_ATTRIBUTE: &str = "canceled";
pub const COMPLETE_ATTRIBUTE: &str = "complete";

/// Whether a stage result carries everything the caller asked for.
pub trait Completeness {
    fn is_complete(&self) -> bool;
}

impl<B> Completeness for Response<B> {
    fn is_complete(&self) -> bool {
        self.status().is_success()
    }
}

/// Wraps one proxy stage in a span.
#[derive(Clone)]
pub struct PipeLayer {
    tracer: Arc<Tracer>,
    name: Arc<str>,
    enabled: bool,
}

impl PipeLayer {
    pub fn new(tracer: Arc<Tracer>, name: impl Into<String>) -> Self {
        Self {
            tracer,
            name: Arc::from(name.into()),
            enabled: true,
        }
    }

    /// Span `pipe-<endpoint>`, gated by the pipe layer switch.
    pub fn for_endpoint(registry: &Registry, cfg: &EndpointConfig) -> Self {
        Self::new(registry.tracer().clone(), format!("pipe-{}", cfg.endpoint))
            .enabled(registry.is_pipe_enabled())
    }

    /// Span `backend-<url_pattern>`, gated by the backend layer switch.
    pub fn for_backend(registry: &Registry, cfg: &BackendConfig) -> Self {
        Self::new(registry.tracer().clone(), format!("backend-{}", cfg.url_pattern))
            .enabled(registry.is_backend_enabled())
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for PipeLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeLayer")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl<S> Layer<S> for PipeLayer {
    type Service = PipeService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PipeService {
            inner,
            layer: self.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PipeService<S> {
    inner: S,
    layer: PipeLayer,
}

impl<S, B> Service<Request<B>> for PipeService<S>
where
    S: Service<Request<B>>,
    S::Response: Completeness,
    S::Error: fmt::Display,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = PipeFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        if !self.layer.enabled {
            return PipeFuture {
                inner: self.inner.call(req),
                span: None,
            };
        }

        let span = self.layer.tracer.start(
            self.layer.name.to_string(),
            SpanKind::Internal,
            req.extensions().get::<SpanContext>(),
            Vec::new(),
        );
        req.extensions_mut().insert(span.span_context().clone());

        PipeFuture {
            inner: self.inner.call(req),
            span: Some(span),
        }
    }
}

pin_project! {
    /// Response future of [`PipeService`].
    pub struct PipeFuture<F> {
        #[pin]
        inner: F,
        span: Option<Span>,
    }

    impl<F> PinnedDrop for PipeFuture<F> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if let Some(mut span) = this.span.take() {
                span.set_attributes([
                    KeyValue::new(CANCELED_ATTRIBUTE, true),
                    KeyValue::new(COMPLETE_ATTRIBUTE, false),
                ]);
                span.end();
            }
        }
    }
}

impl<F, T, E> Future for PipeFuture<F>
where
    F: Future<Output = Result<T, E>>,
    T: Completeness,
    E: fmt::Display,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = ready!(this.inner.poll(cx));

        if let Some(mut span) = this.span.take() {
            if let Err(err) = &result {
                let message = err.to_string();
                if is_cancellation(&message) {
                    span.set_attribute(KeyValue::new(CANCELED_ATTRIBUTE, true));
                } else {
                    span.set_attribute(KeyValue::new(ERROR_ATTRIBUTE, message));
                }
            }
            let complete = result.as_ref().map(|res| res.is_complete()).unwrap_or(false);
            span.set_attribute(KeyValue::new(COMPLETE_ATTRIBUTE, complete));
            span.end();
        }

        Poll::Ready(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::Value;
    use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};
    use std::io;
    use std::sync::Mutex;
    use tower::ServiceExt;

    fn tracer() -> (Arc<Tracer>, InMemorySpanExporter) {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        (Arc::new(Tracer::with_provider(provider)), exporter)
    }

    fn attribute<'a>(span: &'a SpanData, key: &str) -> Option<&'a Value> {
        span.attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| &kv.value)
    }

    fn status(code: u16) -> Response<()> {
        Response::builder().status(code).body(()).unwrap()
    }

    fn failing(
        message: &'static str,
    ) -> impl Service<Request<()>, Response = Response<()>, Error = io::Error> {
        tower::service_fn(move |_req: Request<()>| async move {
            Err::<Response<()>, _>(io::Error::new(io::ErrorKind::Other, message))
        })
    }

    #[tokio::test]
    async fn test_complete_response() {
        let (tracer, exporter) = tracer();
        let parent = tracer.start("router", SpanKind::Server, None, Vec::new());

        let inner = tower::service_fn(|_req: Request<()>| async move { Ok::<_, io::Error>(status(200)) });
        let svc = PipeLayer::new(tracer.clone(), "pipe-/users/:id").layer(inner);

        let mut req = Request::new(());
        req.extensions_mut().insert(parent.span_context().clone());
        let res = svc.oneshot(req).await.unwrap();
        assert!(res.is_complete());

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "pipe-/users/:id");
        assert_eq!(spans[0].span_kind, SpanKind::Internal);
        assert_eq!(spans[0].parent_span_id, parent.span_context().span_id());
        assert_eq!(attribute(&spans[0], COMPLETE_ATTRIBUTE), Some(&Value::Bool(true)));
        assert!(attribute(&spans[0], ERROR_ATTRIBUTE).is_none());
    }

    #[tokio::test]
    async fn test_pipe_context_replaces_parent() {
        let (tracer, _exporter) = tracer();
        let parent = tracer.start("router", SpanKind::Server, None, Vec::new());
        let seen = Arc::new(Mutex::new(None));

        let observed = seen.clone();
        let inner = tower::service_fn(move |req: Request<()>| {
            *observed.lock().unwrap() = req.extensions().get::<SpanContext>().cloned();
            async move { Ok::<_, io::Error>(status(204)) }
        });
        let svc = PipeLayer::new(tracer, "pipe-/").layer(inner);

        let mut req = Request::new(());
        req.extensions_mut().insert(parent.span_context().clone());
        svc.oneshot(req).await.unwrap();

        let seen = seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.trace_id(), parent.span_context().trace_id());
        assert_ne!(seen.span_id(), parent.span_context().span_id());
    }

    #[tokio::test]
    async fn test_error_and_cancellation_attributes() {
        let (tracer, exporter) = tracer();

        let svc = PipeLayer::new(tracer.clone(), "backend-/v1/users")
            .layer(failing("backend unreachable"));
        assert!(svc.oneshot(Request::new(())).await.is_err());

        let svc = PipeLayer::new(tracer.clone(), "backend-/v1/users").layer(failing("context canceled"));
        assert!(svc.oneshot(Request::new(())).await.is_err());

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(
            attribute(&spans[0], ERROR_ATTRIBUTE),
            Some(&Value::from("backend unreachable".to_string()))
        );
        assert_eq!(attribute(&spans[0], COMPLETE_ATTRIBUTE), Some(&Value::Bool(false)));
        assert_eq!(attribute(&spans[1], CANCELED_ATTRIBUTE), Some(&Value::Bool(true)));
        assert!(attribute(&spans[1], ERROR_ATTRIBUTE).is_none());
    }

    #[tokio::test]
    async fn test_error_mentioning_cancellation_is_an_error() {
        let (tracer, exporter) = tracer();
        let message = "order could not be cancelled: backend 409";

        let svc = PipeLayer::new(tracer.clone(), "backend-/v1/orders").layer(failing(message));
        assert!(svc.oneshot(Request::new(())).await.is_err());

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(
            attribute(&spans[0], ERROR_ATTRIBUTE),
            Some(&Value::from(message.to_string()))
        );
        assert!(attribute(&spans[0], CANCELED_ATTRIBUTE).is_none());
        assert_eq!(attribute(&spans[0], COMPLETE_ATTRIBUTE), Some(&Value::Bool(false)));
    }

    #[tokio::test]
    async fn test_incomplete_response() {
        let (tracer, exporter) = tracer();
        let inner = tower::service_fn(|_req: Request<()>| async move { Ok::<_, io::Error>(status(502)) });
        let svc = PipeLayer::new(tracer.clone(), "pipe-/").layer(inner);
        svc.oneshot(Request::new(())).await.unwrap();

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(attribute(&spans[0], COMPLETE_ATTRIBUTE), Some(&Value::Bool(false)));
    }

    #[tokio::test]
    async fn test_dropped_stage_is_canceled() {
        let (tracer, exporter) = tracer();
        let inner = tower::service_fn(|_req: Request<()>| async move {
            std::future::pending::<()>().await;
            Ok::<_, io::Error>(status(200))
        });
        let mut svc = PipeLayer::new(tracer, "pipe-/").layer(inner);

        drop(svc.call(Request::new(())));

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(attribute(&spans[0], CANCELED_ATTRIBUTE), Some(&Value::Bool(true)));
        assert_eq!(attribute(&spans[0], COMPLETE_ATTRIBUTE), Some(&Value::Bool(false)));
    }

    #[tokio::test]
    async fn test_disabled_layer_starts_no_span() {
        let (tracer, exporter) = tracer();
        let inner = tower::service_fn(|req: Request<()>| async move {
            assert!(req.extensions().get::<SpanContext>().is_none());
            Ok::<_, io::Error>(status(200))
        });
        let svc = PipeLayer::new(tracer, "pipe-/").enabled(false).layer(inner);
        svc.oneshot(Request::new(())).await.unwrap();

        assert!(exporter.get_finished_spans().unwrap().is_empty());
    }
}
