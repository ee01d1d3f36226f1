//! Process-wide, run-once instrumentation setup.

use std::fmt;
use std::sync::{Arc, Mutex, Once, OnceLock, PoisonError};
use std::time::Duration;

use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use thiserror::Error;

use super::prometheus::{self, PrometheusOptions};
use super::{exporter_options, ExporterError, ExporterFactory, SpanExport};
use crate::config::{parse_telemetry_config, ConfigError, EnabledLayers, ServiceConfig, TelemetryConfig};
use crate::lifecycle::Shutdown;
use crate::stats::measure::{
    HOST, KEY_CLIENT_HOST, KEY_CLIENT_METHOD, KEY_CLIENT_PATH, KEY_CLIENT_STATUS, METHOD, PATH,
    STATUS_CODE,
};
use crate::stats::{default_views, StatsRecorder, View, ViewError};
use crate::trace::{sampler_for_rate, Tracer};

/// Upper bound on the final span flush.
pub const SPAN_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Setup already ran in this process.
    #[error("exporters already registered")]
    AlreadyRegistered,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to register views: {0}")]
    Views(#[from] ViewError),
}

impl RegistryError {
    /// The service carries no instrumentation block; instrumentation stays off.
    pub fn is_no_config(&self) -> bool {
        matches!(self, RegistryError::Config(ConfigError::NoConfig))
    }
}

/// What a successful setup published.
#[derive(Debug, Clone, Copy)]
struct Registration {
    layers: EnabledLayers,
    span_exporters: usize,
}

/// Owner of the tracer, the stats recorder and the exporter factories.
///
/// [`Registry::setup`] runs at most once. Factories must be registered
/// before it; the enabled-layer predicates report `false` until setup
/// succeeds.
pub struct Registry {
    factories: Mutex<Vec<(String, ExporterFactory)>>,
    once: Once,
    registration: OnceLock<Registration>,
    tracer: Arc<Tracer>,
    recorder: Arc<StatsRecorder>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            factories: Mutex::new(Vec::new()),
            once: Once::new(),
            registration: OnceLock::new(),
            tracer: Arc::new(Tracer::new()),
            recorder: Arc::new(StatsRecorder::new()),
        }
    }

    /// The registry shared by the whole process.
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new)
    }

    pub fn register_exporter_factory(&self, name: impl Into<String>, factory: ExporterFactory) {
        let name = name.into();
        tracing::debug!(exporter = %name, "Exporter factory registered");
        self.factories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name, factory));
    }

    pub fn tracer(&self) -> &Arc<Tracer> {
        &self.tracer
    }

    pub fn recorder(&self) -> &Arc<StatsRecorder> {
        &self.recorder
    }

    /// Wire exporters, sampler, reporting period and views from the
    /// service configuration. An empty `views` list means the defaults.
    ///
    /// Background tasks (stats reporter, exporter loops) are tracked by
    /// `shutdown`. A missing or malformed configuration is reported without
    /// using up the single setup; every call after the first real one
    /// returns [`RegistryError::AlreadyRegistered`].
    pub fn setup(
        &self,
        shutdown: &Shutdown,
        service: &ServiceConfig,
        views: Vec<View>,
    ) -> Result<(), RegistryError> {
        let cfg = parse_telemetry_config(&service.extra_config)?;

        let mut outcome = Err(RegistryError::AlreadyRegistered);
        self.once.call_once(|| {
            outcome = self.register(shutdown, service, &cfg, views);
        });
        outcome
    }

    fn register(
        &self,
        shutdown: &Shutdown,
        service: &ServiceConfig,
        cfg: &TelemetryConfig,
        views: Vec<View>,
    ) -> Result<(), RegistryError> {
        let span_exports = self.register_exporters(shutdown, cfg);
        let span_exporters = span_exports.len();
        self.install_tracer_provider(service, cfg, span_exports);

        self.recorder.set_reporting_period(cfg.reporting_period());
        let views = if views.is_empty() { default_views() } else { views };
        self.recorder.register_views(dimension_views(views, cfg))?;
        self.spawn_reporter(shutdown);

        let layers = cfg.layers();
        // The Once guard makes this the only writer.
        let _ = self.registration.set(Registration {
            layers,
            span_exporters,
        });

        tracing::info!(
            sample_rate = cfg.sample_rate,
            span_exporters,
            view_exporters = self.recorder.exporter_count(),
            router = layers.router,
            pipe = layers.pipe,
            backend = layers.backend,
            "Telemetry registered"
        );
        Ok(())
    }

    /// Call every factory; view exporters go to the recorder, span exports
    /// are returned for the tracer provider.
    fn register_exporters(&self, shutdown: &Shutdown, cfg: &TelemetryConfig) -> Vec<SpanExport> {
        let factories = self
            .factories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut span_exports = Vec::new();
        for (name, factory) in factories.iter() {
            match factory(shutdown, cfg) {
                Ok(backend) => {
                    tracing::info!(exporter = %name, capabilities = ?backend, "Exporter enabled");
                    let (views, spans) = backend.into_parts();
                    if let Some(views) = views {
                        self.recorder.register_exporter(views);
                    }
                    span_exports.extend(spans);
                }
                Err(ExporterError::Disabled) => {
                    tracing::debug!(exporter = %name, "Exporter disabled");
                }
                Err(e) => {
                    tracing::warn!(exporter = %name, error = %e, "Exporter failed, skipping");
                }
            }
        }
        span_exports
    }

    fn install_tracer_provider(
        &self,
        service: &ServiceConfig,
        cfg: &TelemetryConfig,
        span_exports: Vec<SpanExport>,
    ) {
        let service_name = span_exports
            .iter()
            .find_map(|export| export.service_name())
            .unwrap_or(service.name.as_str())
            .to_string();

        let mut builder = SdkTracerProvider::builder()
            .with_sampler(sampler_for_rate(cfg.sample_rate))
            .with_resource(Resource::builder().with_service_name(service_name).build());
        for export in span_exports {
            builder = export.install(builder);
        }
        self.tracer.install(builder.build());
    }

    fn spawn_reporter(&self, shutdown: &Shutdown) {
        let reporter = self.recorder.clone().run(shutdown.subscribe());
        if shutdown.spawn(reporter).is_err() {
            tracing::warn!("No async runtime available, stats will not be reported periodically");
        }
    }

    /// Flush and stop the span processors, waiting at most
    /// [`SPAN_FLUSH_TIMEOUT`]. Call after the tracked tasks have drained.
    pub async fn shutdown(&self) {
        let tracer = self.tracer.clone();
        let flush = tokio::task::spawn_blocking(move || tracer.shutdown());

        match tokio::time::timeout(SPAN_FLUSH_TIMEOUT, flush).await {
            Ok(Ok(Ok(()))) => tracing::info!("Span exporters flushed"),
            Ok(Ok(Err(e))) => tracing::warn!(error = %e, "Span exporter shutdown failed"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Span exporter shutdown task failed"),
            Err(_) => tracing::warn!("Span exporters did not flush before the deadline"),
        }
    }

    pub fn is_registered(&self) -> bool {
        self.once.is_completed()
    }

    /// Span exporters wired into the tracer provider by setup.
    pub fn span_exporter_count(&self) -> usize {
        self.registration
            .get()
            .map_or(0, |registration| registration.span_exporters)
    }

    pub fn enabled_layers(&self) -> Option<EnabledLayers> {
        self.registration.get().map(|registration| registration.layers)
    }

    pub fn is_router_enabled(&self) -> bool {
        self.enabled_layers().is_some_and(|layers| layers.router)
    }

    pub fn is_pipe_enabled(&self) -> bool {
        self.enabled_layers().is_some_and(|layers| layers.pipe)
    }

    pub fn is_backend_enabled(&self) -> bool {
        self.enabled_layers().is_some_and(|layers| layers.backend)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let factories = self
            .factories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("Registry")
            .field("factories", &factories)
            .field("registered", &self.is_registered())
            .field("layers", &self.enabled_layers())
            .finish()
    }
}

/// Append the tag keys requested by the prometheus block to the client and
/// server views. Without that block the views are left untouched.
fn dimension_views(mut views: Vec<View>, cfg: &TelemetryConfig) -> Vec<View> {
    let Ok(options) = exporter_options::<PrometheusOptions>(cfg, prometheus::NAME) else {
        return views;
    };

    let flags = [
        options.tag_host,
        options.tag_path,
        options.tag_method,
        options.tag_statuscode,
    ];
    let client_keys = [KEY_CLIENT_HOST, KEY_CLIENT_PATH, KEY_CLIENT_METHOD, KEY_CLIENT_STATUS];
    let server_keys = [HOST, PATH, METHOD, STATUS_CODE];

    for view in views.iter_mut() {
        if view.is_client_view() {
            for (enabled, key) in flags.iter().zip(client_keys) {
                if *enabled {
                    view.append_tag_key(key);
                }
            }
        }
        if view.is_server_view() {
            for (enabled, key) in flags.iter().zip(server_keys) {
                if *enabled {
                    view.append_tag_key(key);
                }
            }
        }
    }
    views
}
