//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gateway_telemetry::config::{
    BackendConfig, EndpointConfig, ExtraConfig, ServiceConfig, TelemetryConfig, NAMESPACE,
};
use gateway_telemetry::exporter::{ExportedBackend, ExporterError, ExporterFactory, SpanExport};
use gateway_telemetry::lifecycle::Shutdown;
use gateway_telemetry::stats::{ViewData, ViewExporter};
use opentelemetry::Value;
use opentelemetry_sdk::trace::{InMemorySpanExporter, SpanData};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Read the request head (request line and headers).
async fn read_head(socket: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}

/// Start a simple mock backend that returns a fixed response.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    start_programmable_backend(move |_head| async move { (200, response.to_string()) }).await
}

/// Start a programmable mock backend. The handler receives the request head.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let head = read_head(&mut socket).await;
                        let (status, body) = f(head).await;
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            502 => "502 Bad Gateway",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Keeps every finished span and every reported view batch.
#[derive(Default)]
pub struct Capture {
    pub spans: InMemorySpanExporter,
    pub views: Mutex<Vec<ViewData>>,
}

impl Capture {
    pub fn spans(&self) -> Vec<SpanData> {
        self.spans.get_finished_spans().unwrap()
    }

    pub fn span_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .spans()
            .into_iter()
            .map(|s| s.name.into_owned())
            .collect();
        names.sort();
        names
    }

    /// Poll until `count` spans were exported or the deadline passes.
    pub async fn wait_for_spans(&self, count: usize) -> Vec<SpanData> {
        for _ in 0..100 {
            if self.spans().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.spans()
    }

    pub fn views(&self) -> Vec<ViewData> {
        self.views.lock().unwrap().clone()
    }
}

impl ViewExporter for Capture {
    fn export_view(&self, data: &ViewData) {
        self.views.lock().unwrap().push(data.clone());
    }
}

/// Factory handing out `capture` for both capabilities.
pub fn capture_factory(capture: Arc<Capture>) -> ExporterFactory {
    Arc::new(move |_shutdown: &Shutdown, _cfg: &TelemetryConfig| {
        Ok::<_, ExporterError>(ExportedBackend::Both {
            views: capture.clone(),
            spans: SpanExport::simple(capture.spans.clone()),
        })
    })
}

/// Value of the span attribute `key`.
pub fn attribute<'a>(span: &'a SpanData, key: &str) -> Option<&'a Value> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| &kv.value)
}

pub fn extra(value: serde_json::Value) -> ExtraConfig {
    let mut extra = ExtraConfig::new();
    extra.insert(NAMESPACE.to_string(), value);
    extra
}

/// One endpoint `/users/:id` forwarding to `/v1/users/{{.Id}}` on `backend`.
pub fn service_config(backend: SocketAddr, telemetry: Option<serde_json::Value>) -> ServiceConfig {
    ServiceConfig {
        name: "test-gateway".to_string(),
        bind_address: "127.0.0.1:0".to_string(),
        timeout_secs: 5,
        endpoints: vec![EndpointConfig {
            endpoint: "/users/:id".to_string(),
            backend: BackendConfig {
                host: format!("http://{}", backend),
                url_pattern: "/v1/users/{{.Id}}".to_string(),
                extra_config: ExtraConfig::new(),
            },
            public: false,
            extra_config: ExtraConfig::new(),
        }],
        extra_config: telemetry.map(extra).unwrap_or_default(),
    }
}
