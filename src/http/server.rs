//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with one route per configured endpoint
//! - Wrap every endpoint in the router and pipe instrumentation layers
//! - Forward requests to the endpoint's backend through the instrumented client
//! - Serve health checks outside the instrumentation
//! - Bind server to listener and drain on shutdown

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use super::client::{base_client, BackendClient, BaseClient};
use crate::config::{EndpointConfig, ServiceConfig};
use crate::exporter::Registry;
use crate::proxy::PipeLayer;
use crate::router::RouterLayer;
use crate::trace::SpanContext;
use crate::transport::trace::HEALTH_PATHS;

/// State of one endpoint route.
#[derive(Clone)]
struct EndpointState {
    endpoint: Arc<EndpointConfig>,
    backend: BackendClient,
}

/// The forwarding gateway.
pub struct GatewayServer {
    router: Router,
    config: ServiceConfig,
}

impl GatewayServer {
    pub fn new(config: ServiceConfig, registry: &Registry) -> Self {
        let router = Self::build_router(&config, registry, base_client());
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ServiceConfig, registry: &Registry, client: BaseClient) -> Router {
        let mut router = Router::new();
        for path in HEALTH_PATHS {
            router = router.route(path, get(health));
        }

        for endpoint in &config.endpoints {
            let state = EndpointState {
                endpoint: Arc::new(endpoint.clone()),
                backend: BackendClient::new(registry, &endpoint.backend, client.clone()),
            };
            let instrumentation = ServiceBuilder::new()
                .layer(RouterLayer::for_endpoint(registry, endpoint))
                .layer(PipeLayer::for_endpoint(registry, endpoint));
            let route = any(forward).with_state(state).layer(instrumentation);

            tracing::debug!(
                endpoint = %endpoint.endpoint,
                backend = %endpoint.backend.url_pattern,
                "Endpoint registered"
            );
            router = router.route(&route_path(&endpoint.endpoint), route);
        }

        router
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeout_secs)))
            .layer(TraceLayer::new_for_http())
    }

    /// The assembled router, for serving on a custom listener.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Serve until `shutdown` is cancelled, then drain open connections.
    pub async fn run(self, listener: TcpListener, shutdown: CancellationToken) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            service = %self.config.name,
            endpoints = self.config.endpoints.len(),
            "Gateway server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        tracing::info!("Gateway server stopped");
        Ok(())
    }
}

/// Convert an endpoint template (`/users/:id`, `/files/*rest`) to Axum
/// route syntax (`/users/{id}`, `/files/{*rest}`).
pub fn route_path(template: &str) -> String {
    template
        .split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':') {
                format!("{{{}}}", name)
            } else if let Some(name) = segment.strip_prefix('*') {
                format!("{{*{}}}", name)
            } else {
                segment.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

async fn health() -> &'static str {
    "ok"
}

/// Forward the request to the endpoint's backend.
async fn forward(State(state): State<EndpointState>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();
    let backend = &state.endpoint.backend;

    let params = state.endpoint.path_params(parts.uri.path());
    let mut uri = format!(
        "{}{}",
        backend.host.trim_end_matches('/'),
        backend.render_path(&params)
    );
    if let Some(query) = parts.uri.query() {
        uri.push('?');
        uri.push_str(query);
    }

    let mut builder = Request::builder()
        .method(parts.method.clone())
        .uri(uri.as_str());
    if let Some(headers) = builder.headers_mut() {
        for (name, value) in parts.headers.iter() {
            if name != header::HOST {
                headers.append(name.clone(), value.clone());
            }
        }
    }
    let mut backend_request = match builder.body(body) {
        Ok(req) => req,
        Err(e) => {
            tracing::warn!(uri = %uri, error = %e, "Invalid backend request");
            return (StatusCode::BAD_GATEWAY, "Invalid backend request").into_response();
        }
    };
    if let Some(context) = parts.extensions.get::<SpanContext>() {
        backend_request.extensions_mut().insert(context.clone());
    }

    tracing::debug!(method = %parts.method, uri = %uri, "Forwarding request");

    match state.backend.call(backend_request).await {
        Ok(response) => {
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::error!(uri = %uri, error = %e, "Upstream error");
            (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
    }
}
