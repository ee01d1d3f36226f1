//! End-to-end tests of the instrumented gateway.

use std::net::SocketAddr;
use std::sync::Arc;

use gateway_telemetry::exporter::Registry;
use gateway_telemetry::http::GatewayServer;
use gateway_telemetry::lifecycle::Shutdown;
use gateway_telemetry::stats::AggregationData;
use gateway_telemetry::trace::SpanKind;
use gateway_telemetry::ServiceConfig;
use opentelemetry_sdk::trace::SpanData;
use serde_json::json;
use tokio::net::TcpListener;

mod common;

const CALLER_TRACE_ID: &str = "463ac35c9f6413ad48485a3953bb6124";
const CALLER_SPAN_ID: &str = "a2fb4a1d1a96d312";

async fn start_gateway(config: ServiceConfig, registry: &Registry, shutdown: &Shutdown) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = GatewayServer::new(config, registry);
    let token = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, token).await;
    });
    addr
}

fn registry_with_capture() -> (Registry, Arc<common::Capture>) {
    let registry = Registry::new();
    let capture = Arc::new(common::Capture::default());
    registry.register_exporter_factory("capture", common::capture_factory(capture.clone()));
    (registry, capture)
}

fn span<'a>(spans: &'a [SpanData], name: &str) -> &'a SpanData {
    spans
        .iter()
        .find(|s| s.name == name)
        .unwrap_or_else(|| panic!("no span named {} in {:?}", name, spans))
}

#[tokio::test]
async fn test_request_is_traced_across_all_stages() {
    let backend = common::start_mock_backend("{\"id\": 42}").await;
    let (registry, capture) = registry_with_capture();
    let shutdown = Shutdown::new();

    let config = common::service_config(
        backend,
        Some(json!({ "sample_rate": 100, "exporters": { "capture": {} } })),
    );
    registry.setup(&shutdown, &config, Vec::new()).unwrap();
    let gateway = start_gateway(config, &registry, &shutdown).await;

    let res = reqwest::Client::new()
        .get(format!("http://{}/users/42", gateway))
        .header("x-b3-traceid", CALLER_TRACE_ID)
        .header("x-b3-spanid", CALLER_SPAN_ID)
        .header("x-b3-sampled", "1")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "{\"id\": 42}");

    let spans = capture.wait_for_spans(4).await;
    assert_eq!(
        capture.span_names(),
        vec!["/users/:id", "/v1/users/42", "backend-/v1/users/{{.Id}}", "pipe-/users/:id"]
    );

    let server = span(&spans, "/users/:id");
    let pipe = span(&spans, "pipe-/users/:id");
    let backend_stage = span(&spans, "backend-/v1/users/{{.Id}}");
    let client = span(&spans, "/v1/users/42");

    assert_eq!(server.span_kind, SpanKind::Server);
    assert_eq!(server.parent_span_id.to_string(), CALLER_SPAN_ID);
    assert_eq!(pipe.parent_span_id, server.span_context.span_id());
    assert_eq!(backend_stage.parent_span_id, pipe.span_context.span_id());
    assert_eq!(client.parent_span_id, backend_stage.span_context.span_id());
    assert_eq!(client.span_kind, SpanKind::Client);
    for span in &spans {
        assert_eq!(span.span_context.trace_id().to_string(), CALLER_TRACE_ID);
    }

    shutdown.trigger();
}

#[tokio::test]
async fn test_stats_use_aggregated_paths() {
    let backend = common::start_mock_backend("ok").await;
    let (registry, capture) = registry_with_capture();
    let shutdown = Shutdown::new();

    let config = common::service_config(
        backend,
        Some(json!({ "sample_rate": 100, "exporters": { "capture": {} } })),
    );
    registry.setup(&shutdown, &config, Vec::new()).unwrap();
    let gateway = start_gateway(config, &registry, &shutdown).await;

    let client = reqwest::Client::new();
    for id in [1, 2, 3] {
        let res = client
            .get(format!("http://{}/users/{}", gateway, id))
            .send()
            .await
            .unwrap();
        res.text().await.unwrap();
    }
    capture.wait_for_spans(12).await;

    let by_status = registry
        .recorder()
        .retrieve_data("opencensus.io/http/server/response_count_by_status_code")
        .unwrap();
    assert_eq!(by_status.rows.len(), 1);
    assert_eq!(by_status.rows[0].data, AggregationData::Count(3));

    let completed = registry
        .recorder()
        .retrieve_data("opencensus.io/http/client/completed_count")
        .unwrap();
    assert_eq!(completed.rows.len(), 1);
    assert_eq!(completed.rows[0].data, AggregationData::Count(3));

    shutdown.trigger();
}

#[tokio::test]
async fn test_only_enabled_layers_are_instrumented() {
    let backend = common::start_mock_backend("ok").await;
    let (registry, capture) = registry_with_capture();
    let shutdown = Shutdown::new();

    let config = common::service_config(
        backend,
        Some(json!({
            "sample_rate": 100,
            "enabled_layers": { "router": true },
            "exporters": { "capture": {} }
        })),
    );
    registry.setup(&shutdown, &config, Vec::new()).unwrap();
    assert!(registry.is_router_enabled());
    assert!(!registry.is_pipe_enabled());
    assert!(!registry.is_backend_enabled());

    let gateway = start_gateway(config, &registry, &shutdown).await;
    let res = reqwest::get(format!("http://{}/users/9", gateway)).await.unwrap();
    res.text().await.unwrap();

    capture.wait_for_spans(1).await;
    assert_eq!(capture.span_names(), vec!["/users/:id"]);

    shutdown.trigger();
}

#[tokio::test]
async fn test_gateway_forwards_without_telemetry_config() {
    let backend = common::start_mock_backend("plain").await;
    let (registry, capture) = registry_with_capture();
    let shutdown = Shutdown::new();

    let config = common::service_config(backend, None);
    let err = registry.setup(&shutdown, &config, Vec::new()).unwrap_err();
    assert!(err.is_no_config());

    let gateway = start_gateway(config, &registry, &shutdown).await;
    let res = reqwest::get(format!("http://{}/users/1", gateway)).await.unwrap();
    assert_eq!(res.text().await.unwrap(), "plain");
    assert!(capture.spans().is_empty());

    let health = reqwest::get(format!("http://{}/healthz", gateway)).await.unwrap();
    assert_eq!(health.text().await.unwrap(), "ok");

    shutdown.trigger();
}

#[tokio::test]
async fn test_unreachable_backend_is_bad_gateway() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let (registry, capture) = registry_with_capture();
    let shutdown = Shutdown::new();

    let config = common::service_config(
        addr,
        Some(json!({ "sample_rate": 100, "exporters": { "capture": {} } })),
    );
    registry.setup(&shutdown, &config, Vec::new()).unwrap();
    let gateway = start_gateway(config, &registry, &shutdown).await;

    let res = reqwest::get(format!("http://{}/users/1", gateway)).await.unwrap();
    assert_eq!(res.status(), 502);
    res.text().await.unwrap();

    let spans = capture.wait_for_spans(4).await;
    let backend_stage = span(&spans, "backend-/v1/users/{{.Id}}");
    assert!(common::attribute(backend_stage, "error").is_some());

    shutdown.trigger();
}
