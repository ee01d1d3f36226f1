//! Stats layer for outgoing round trips.
//!
//! Every round trip that enters the layer produces exactly one batch of
//! client measurements, recorded when the response body finishes, when the
//! transport fails, or when the caller drops the round trip.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Instant;

use http::{Method, Request, Response};
use http_body::Body;
use pin_project_lite::pin_project;
use tower::{Layer, Service};

use super::attributes::{content_length, request_size, RequestInfo, TagGenerator};
use super::body::TrackedBody;
use super::trace::is_health_endpoint;
use crate::stats::measure::{self, Measure, TagMap};
use crate::stats::StatsRecorder;

/// Status recorded when the round trip produced no response.
const FAILED_STATUS: u16 = 500;

/// Records client measurements around each round trip.
#[derive(Clone)]
pub struct StatsLayer {
    recorder: Arc<StatsRecorder>,
    tags: Arc<[TagGenerator]>,
    enabled: bool,
}

impl StatsLayer {
    pub fn new(recorder: Arc<StatsRecorder>, tags: Vec<TagGenerator>) -> Self {
        Self {
            recorder,
            tags: tags.into(),
            enabled: true,
        }
    }

    /// A disabled layer passes requests through without recording.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl fmt::Debug for StatsLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsLayer")
            .field("tags", &self.tags.len())
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl<S> Layer<S> for StatsLayer {
    type Service = StatsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        StatsService {
            inner,
            layer: self.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct StatsService<S> {
    inner: S,
    layer: StatsLayer,
}

impl<S, ReqB, ResB> Service<Request<ReqB>> for StatsService<S>
where
    S: Service<Request<ReqB>, Response = Response<ResB>>,
    ReqB: Body,
    ResB: Body,
{
    type Response = Response<TrackedBody<ResB>>;
    type Error = S::Error;
    type Future = StatsFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqB>) -> Self::Future {
        if !self.layer.enabled || is_health_endpoint(req.uri().path()) {
            return StatsFuture {
                inner: self.inner.call(req),
                round_trip: None,
                is_head: false,
            };
        }

        let info = RequestInfo::from_request(&req);
        let tags: TagMap = self.layer.tags.iter().map(|generate| generate(&info)).collect();
        let is_head = req.method() == Method::HEAD;

        let round_trip = RoundTrip {
            recorder: self.layer.recorder.clone(),
            tags,
            start: Instant::now(),
            request_size: request_size(&req),
        };
        round_trip.started();

        StatsFuture {
            inner: self.inner.call(req),
            round_trip: Some(round_trip),
            is_head,
        }
    }
}

/// Per-request measurement state.
struct RoundTrip {
    recorder: Arc<StatsRecorder>,
    tags: TagMap,
    start: Instant,
    request_size: i64,
}

impl RoundTrip {
    fn started(&self) {
        self.recorder
            .record(&self.tags, &[Measure::ClientRequestCount.m(1.0)]);
    }

    /// Record the final batch. Consumes the round trip.
    fn finish(mut self, status: u16, bytes_read: u64, content_length: Option<u64>) {
        let latency_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        let bytes_read = bytes_read as f64;
        let response_size = match content_length {
            Some(length) if bytes_read == 0.0 && length > 0 => length as f64,
            _ => bytes_read,
        };
        let request_size = self.request_size as f64;

        let mut measurements = vec![
            Measure::ClientSentBytes.m(request_size),
            Measure::ClientReceivedBytes.m(response_size),
            Measure::ClientRoundtripLatency.m(latency_ms),
            Measure::ClientLatency.m(latency_ms),
            Measure::ClientResponseBytes.m(bytes_read),
        ];
        if self.request_size >= 0 {
            measurements.push(Measure::ClientRequestBytes.m(request_size));
        }

        let status = status.to_string();
        self.tags.upsert(measure::STATUS_CODE, status.clone());
        self.tags.upsert(measure::KEY_CLIENT_STATUS, status);
        self.recorder.record(&self.tags, &measurements);
    }
}

pin_project! {
    /// Response future of [`StatsService`].
    pub struct StatsFuture<F> {
        #[pin]
        inner: F,
        round_trip: Option<RoundTrip>,
        is_head: bool,
    }

    impl<F> PinnedDrop for StatsFuture<F> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if let Some(round_trip) = this.round_trip.take() {
                round_trip.finish(FAILED_STATUS, 0, None);
            }
        }
    }
}

impl<F, ResB, E> Future for StatsFuture<F>
where
    F: Future<Output = Result<Response<ResB>, E>>,
    ResB: Body,
{
    type Output = Result<Response<TrackedBody<ResB>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = ready!(this.inner.poll(cx));

        let Some(round_trip) = this.round_trip.take() else {
            return Poll::Ready(result.map(|res| res.map(TrackedBody::untracked)));
        };

        match result {
            Err(err) => {
                round_trip.finish(FAILED_STATUS, 0, None);
                Poll::Ready(Err(err))
            }
            Ok(res) => {
                let status = res.status().as_u16();
                let length = if *this.is_head {
                    None
                } else {
                    content_length(res.headers()).or_else(|| res.body().size_hint().exact())
                };

                Poll::Ready(Ok(res.map(|body| {
                    TrackedBody::new(
                        body,
                        Box::new(move |outcome| {
                            round_trip.finish(status, outcome.bytes_read, length)
                        }),
                    )
                })))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::view::{default_views, AggregationData};
    use crate::transport::attributes::backend_tag_generators;
    use crate::transport::path::PathAggregator;
    use bytes::Bytes;
    use http_body_util::{BodyExt, Empty, Full};
    use std::io;
    use tower::ServiceExt;

    fn recorder() -> Arc<StatsRecorder> {
        let recorder = Arc::new(StatsRecorder::new());
        recorder.register_views(default_views()).unwrap();
        recorder
    }

    fn layer(recorder: &Arc<StatsRecorder>) -> StatsLayer {
        StatsLayer::new(recorder.clone(), backend_tag_generators(PathAggregator::Identity))
    }

    fn completed(recorder: &StatsRecorder) -> Vec<(String, u64)> {
        recorder
            .retrieve_data("opencensus.io/http/client/completed_count")
            .unwrap()
            .rows
            .into_iter()
            .map(|row| {
                let status = row.tags[1].1.clone();
                match row.data {
                    AggregationData::Count(count) => (status, count),
                    other => panic!("unexpected aggregation {:?}", other),
                }
            })
            .collect()
    }

    fn sum_of(recorder: &StatsRecorder, view: &str) -> f64 {
        recorder
            .retrieve_data(view)
            .unwrap()
            .rows
            .iter()
            .map(|row| match &row.data {
                AggregationData::Distribution { sum, .. } => *sum,
                other => panic!("unexpected aggregation {:?}", other),
            })
            .sum()
    }

    #[test]
    fn test_request_size() {
        let empty = Request::new(Empty::<Bytes>::new());
        assert_eq!(request_size(&empty), -1);

        let full = Request::new(Full::new(Bytes::from_static(b"abcd")));
        assert_eq!(request_size(&full), 4);

        let declared = Request::builder()
            .header("content-length", "10")
            .body(Full::new(Bytes::from_static(b"abcd")))
            .unwrap();
        assert_eq!(request_size(&declared), 10);
    }

    #[tokio::test]
    async fn test_records_once_after_body_is_read() {
        let recorder = recorder();
        let inner = tower::service_fn(|_req: Request<Full<Bytes>>| async move {
            Ok::<_, io::Error>(Response::new(Full::new(Bytes::from_static(b"0123456789"))))
        });
        let svc = layer(&recorder).layer(inner);

        let req = Request::new(Full::new(Bytes::from_static(b"ping")));
        let res = svc.oneshot(req).await.unwrap();
        assert!(completed(&recorder).is_empty());

        res.into_body().collect().await.unwrap();
        assert_eq!(completed(&recorder), vec![("200".to_string(), 1)]);
        assert_eq!(sum_of(&recorder, "opencensus.io/http/client/received_bytes"), 10.0);
        assert_eq!(sum_of(&recorder, "opencensus.io/http/client/sent_bytes"), 4.0);
    }

    #[tokio::test]
    async fn test_close_without_reading_uses_content_length() {
        let recorder = recorder();
        let inner = tower::service_fn(|_req: Request<Empty<Bytes>>| async move {
            Ok::<_, io::Error>(Response::new(Full::new(Bytes::from_static(b"0123456789"))))
        });
        let svc = layer(&recorder).layer(inner);

        let res = svc.oneshot(Request::new(Empty::new())).await.unwrap();
        drop(res);

        assert_eq!(completed(&recorder), vec![("200".to_string(), 1)]);
        assert_eq!(sum_of(&recorder, "opencensus.io/http/client/received_bytes"), 10.0);
    }

    #[tokio::test]
    async fn test_head_ignores_content_length() {
        let recorder = recorder();
        let inner = tower::service_fn(|_req: Request<Empty<Bytes>>| async move {
            Ok::<_, io::Error>(
                Response::builder()
                    .header("content-length", "512")
                    .body(Empty::<Bytes>::new())
                    .unwrap(),
            )
        });
        let svc = layer(&recorder).layer(inner);

        let req = Request::builder()
            .method(Method::HEAD)
            .body(Empty::new())
            .unwrap();
        drop(svc.oneshot(req).await.unwrap());

        assert_eq!(sum_of(&recorder, "opencensus.io/http/client/received_bytes"), 0.0);
    }

    #[tokio::test]
    async fn test_transport_error_records_500() {
        let recorder = recorder();
        let inner = tower::service_fn(|_req: Request<Empty<Bytes>>| async move {
            Err::<Response<Empty<Bytes>>, _>(io::Error::new(io::ErrorKind::Other, "refused"))
        });
        let svc = layer(&recorder).layer(inner);

        assert!(svc.oneshot(Request::new(Empty::new())).await.is_err());
        assert_eq!(completed(&recorder), vec![("500".to_string(), 1)]);
    }
}
