//! Backend transport chain against a live mock backend.

use std::sync::Arc;

use axum::body::Body;
use bytes::Bytes;
use gateway_telemetry::stats::{default_views, AggregationData, StatsRecorder};
use gateway_telemetry::trace::{SpanKind, Status, Tracer};
use gateway_telemetry::transport::attributes::backend_tag_generators;
use gateway_telemetry::transport::{PathAggregator, TransportLayer};
use http::Request;
use http_body_util::BodyExt;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tower::{Layer, ServiceExt};

mod common;

struct Harness {
    tracer: Arc<Tracer>,
    recorder: Arc<StatsRecorder>,
    capture: Arc<common::Capture>,
}

impl Harness {
    fn new() -> Self {
        let capture = Arc::new(common::Capture::default());
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(capture.spans.clone())
            .build();
        let tracer = Arc::new(Tracer::with_provider(provider));

        let recorder = Arc::new(StatsRecorder::new());
        recorder.register_views(default_views()).unwrap();

        Self {
            tracer,
            recorder,
            capture,
        }
    }

    fn layer(&self) -> TransportLayer {
        TransportLayer::new(
            self.tracer.clone(),
            self.recorder.clone(),
            backend_tag_generators(PathAggregator::Fixed("/v1/users/{id}".to_string())),
        )
    }

    fn completed(&self) -> u64 {
        self.recorder
            .retrieve_data("opencensus.io/http/client/completed_count")
            .unwrap()
            .rows
            .iter()
            .map(|row| match row.data {
                AggregationData::Count(count) => count,
                _ => 0,
            })
            .sum()
    }
}

fn client() -> Client<HttpConnector, Body> {
    Client::builder(TokioExecutor::new()).build(HttpConnector::new())
}

#[tokio::test]
async fn test_concurrent_round_trips_finish_exactly_once() {
    let backend = common::start_mock_backend("Hello from backend").await;
    let harness = Harness::new();
    let service = harness.layer().layer(client());

    let requests = 30;
    let mut handles = Vec::new();
    for i in 0..requests {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            let req = Request::get(format!("http://{}/v1/users/{}", backend, i))
                .body(Body::empty())
                .unwrap();
            let res = service.oneshot(req).await.unwrap();
            assert_eq!(res.status(), 200);

            match i % 3 {
                // Read to the end.
                0 => {
                    let body = res.into_body().collect().await.unwrap().to_bytes();
                    assert_eq!(body, Bytes::from_static(b"Hello from backend"));
                }
                // Read one frame, then drop.
                1 => {
                    let mut body = res.into_body();
                    let _ = body.frame().await;
                    drop(body);
                }
                // Never read.
                _ => drop(res),
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(harness.completed(), requests);

    let spans = harness.capture.spans();
    assert_eq!(spans.len(), requests as usize);
    assert!(spans.iter().all(|span| span.span_kind == SpanKind::Client));
    assert!(spans.iter().all(|span| span.status == Status::Ok));
}

#[tokio::test]
async fn test_received_bytes_fall_back_to_content_length() {
    let backend = common::start_mock_backend("0123456789").await;
    let harness = Harness::new();
    let service = harness.layer().layer(client());

    let req = Request::get(format!("http://{}/v1/users/1", backend))
        .body(Body::empty())
        .unwrap();
    drop(service.oneshot(req).await.unwrap());

    let received = harness
        .recorder
        .retrieve_data("opencensus.io/http/client/received_bytes")
        .unwrap();
    assert_eq!(received.rows.len(), 1);
    let tags: Vec<&str> = received.rows[0].tags.iter().map(|(_, v)| v.as_str()).collect();
    assert_eq!(tags, vec!["GET", "200"]);
    match &received.rows[0].data {
        AggregationData::Distribution { sum, .. } => assert_eq!(*sum, 10.0),
        other => panic!("unexpected aggregation {:?}", other),
    }
}

#[tokio::test]
async fn test_connection_refused_records_failure() {
    // Bind and release a port so nothing listens on it.
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let harness = Harness::new();
    let service = harness.layer().layer(client());

    let req = Request::get(format!("http://{}/v1/users/1", addr))
        .body(Body::empty())
        .unwrap();
    assert!(service.oneshot(req).await.is_err());

    assert_eq!(harness.completed(), 1);
    let spans = harness.capture.spans();
    assert_eq!(spans.len(), 1);
    assert!(matches!(spans[0].status, Status::Error { .. }), "{:?}", spans[0].status);
}

#[tokio::test]
async fn test_b3_headers_reach_backend() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let backend = common::start_programmable_backend(move |head| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(head);
            (200, "ok".to_string())
        }
    })
    .await;
    let harness = Harness::new();
    let service = harness.layer().layer(client());

    let req = Request::get(format!("http://{}/v1/users/7", backend))
        .body(Body::empty())
        .unwrap();
    service
        .oneshot(req)
        .await
        .unwrap()
        .into_body()
        .collect()
        .await
        .unwrap();

    let head = rx.recv().await.unwrap().to_ascii_lowercase();
    let span = &harness.capture.spans()[0];
    assert!(head.contains(&format!("x-b3-traceid: {}", span.span_context.trace_id())), "{}", head);
    assert!(head.contains(&format!("x-b3-spanid: {}", span.span_context.span_id())), "{}", head);
    assert!(head.contains("x-b3-sampled: 1"), "{}", head);
}
