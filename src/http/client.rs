//! Instrumented client for one backend.

use axum::body::Body;
use http::{Request, Response};
use hyper::body::Incoming;
use hyper_util::client::legacy::{connect::HttpConnector, Client, Error as ClientError};
use hyper_util::rt::TokioExecutor;
use tower::{ServiceBuilder, ServiceExt};

use crate::config::BackendConfig;
use crate::exporter::Registry;
use crate::proxy::{PipeLayer, PipeService};
use crate::transport::{InstrumentedTransport, TrackedBody, TransportLayer};

/// Plain HTTP client shared by every backend.
pub type BaseClient = Client<HttpConnector, Body>;

/// Response of an instrumented backend call; dropping or draining the body
/// finishes the stats batch and the client span.
pub type BackendResponse = Response<TrackedBody<TrackedBody<Incoming>>>;

type BackendService = PipeService<InstrumentedTransport<BaseClient>>;

pub fn base_client() -> BaseClient {
    Client::builder(TokioExecutor::new()).build(HttpConnector::new())
}

/// `backend-<url_pattern>` span over the trace and stats layers.
#[derive(Clone, Debug)]
pub struct BackendClient {
    service: BackendService,
}

impl BackendClient {
    pub fn new(registry: &Registry, cfg: &BackendConfig, client: BaseClient) -> Self {
        let service = ServiceBuilder::new()
            .layer(PipeLayer::for_backend(registry, cfg))
            .layer(TransportLayer::for_backend(registry, Some(cfg)))
            .service(client);
        Self { service }
    }

    pub async fn call(&self, req: Request<Body>) -> Result<BackendResponse, ClientError> {
        self.service.clone().oneshot(req).await
    }
}
