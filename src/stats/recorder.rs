//! Measurement aggregation and the periodic view reporter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use thiserror::Error;
use tokio::time;
use tokio_util::sync::CancellationToken;

use super::measure::{Measurement, TagMap};
use super::view::{AggregationData, Row, View, ViewData};

/// Reporting period used when none is configured.
pub const DEFAULT_REPORTING_PERIOD: Duration = Duration::from_secs(10);

/// A backend that ingests aggregated view batches.
pub trait ViewExporter: Send + Sync {
    fn export_view(&self, data: &ViewData);
}

#[derive(Debug, Error)]
pub enum ViewError {
    #[error("view {0} is already registered with a different definition")]
    Conflict(String),
}

struct ViewState {
    view: Arc<View>,
    start: SystemTime,
    rows: Mutex<HashMap<Vec<String>, AggregationData>>,
}

impl ViewState {
    fn new(view: View) -> Self {
        Self {
            view: Arc::new(view),
            start: SystemTime::now(),
            rows: Mutex::new(HashMap::new()),
        }
    }

    fn record(&self, tags: &TagMap, value: f64) {
        let key: Vec<String> = self
            .view
            .tag_keys
            .iter()
            .map(|key| tags.get(*key).unwrap_or_default().to_string())
            .collect();

        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        rows.entry(key)
            .or_insert_with(|| AggregationData::new(&self.view.aggregation))
            .add(&self.view.aggregation, value);
    }

    fn snapshot(&self) -> ViewData {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        let mut rows: Vec<Row> = rows
            .iter()
            .map(|(values, data)| Row {
                tags: self
                    .view
                    .tag_keys
                    .iter()
                    .copied()
                    .zip(values.iter().cloned())
                    .collect(),
                data: data.clone(),
            })
            .collect();
        rows.sort_by(|a, b| a.tags.cmp(&b.tags));

        ViewData {
            view: self.view.clone(),
            start: self.start,
            end: SystemTime::now(),
            rows,
        }
    }
}

/// Process-wide stats backend.
///
/// Views aggregate cumulatively from the moment they are registered.
/// Every reporting period each registered view is handed to every view
/// exporter, including views that have not seen a measurement yet.
pub struct StatsRecorder {
    views: DashMap<String, Arc<ViewState>>,
    exporters: ArcSwap<Vec<Arc<dyn ViewExporter>>>,
    reporting_period_ms: AtomicU64,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self {
            views: DashMap::new(),
            exporters: ArcSwap::from_pointee(Vec::new()),
            reporting_period_ms: AtomicU64::new(0),
        }
    }

    /// Register views. Re-registering an identical view is a no-op.
    pub fn register_views(&self, views: impl IntoIterator<Item = View>) -> Result<(), ViewError> {
        for view in views {
            if let Some(existing) = self.views.get(&view.name) {
                if *existing.view != view {
                    return Err(ViewError::Conflict(view.name));
                }
                continue;
            }
            tracing::debug!(view = %view.name, tags = view.tag_keys.len(), "Registering view");
            self.views
                .insert(view.name.clone(), Arc::new(ViewState::new(view)));
        }
        Ok(())
    }

    pub fn view(&self, name: &str) -> Option<Arc<View>> {
        self.views.get(name).map(|state| state.view.clone())
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    pub fn register_exporter(&self, exporter: Arc<dyn ViewExporter>) {
        self.exporters.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(exporter.clone());
            next
        });
    }

    pub fn exporter_count(&self) -> usize {
        self.exporters.load().len()
    }

    /// Zero restores the default period.
    pub fn set_reporting_period(&self, period: Duration) {
        let millis = u64::try_from(period.as_millis()).unwrap_or(u64::MAX);
        self.reporting_period_ms.store(millis, Ordering::Relaxed);
    }

    pub fn reporting_period(&self) -> Duration {
        match self.reporting_period_ms.load(Ordering::Relaxed) {
            0 => DEFAULT_REPORTING_PERIOD,
            millis => Duration::from_millis(millis),
        }
    }

    /// Record a batch of measurements sharing one tag set.
    pub fn record(&self, tags: &TagMap, measurements: &[Measurement]) {
        let states: Vec<Arc<ViewState>> =
            self.views.iter().map(|entry| entry.value().clone()).collect();
        for measurement in measurements {
            for state in states.iter().filter(|s| s.view.measure == measurement.measure) {
                state.record(tags, measurement.value);
            }
        }
    }

    /// Current cumulative data of one view.
    pub fn retrieve_data(&self, name: &str) -> Option<ViewData> {
        let state = self.views.get(name).map(|state| state.value().clone())?;
        Some(state.snapshot())
    }

    /// Snapshot every view, ordered by name.
    pub fn snapshot(&self) -> Vec<ViewData> {
        let mut states: Vec<Arc<ViewState>> =
            self.views.iter().map(|entry| entry.value().clone()).collect();
        states.sort_by(|a, b| a.view.name.cmp(&b.view.name));
        states.iter().map(|state| state.snapshot()).collect()
    }

    /// Push every view to every view exporter.
    pub fn report(&self) {
        let exporters = self.exporters.load();
        if exporters.is_empty() {
            return;
        }
        for data in self.snapshot() {
            for exporter in exporters.iter() {
                exporter.export_view(&data);
            }
        }
    }

    /// Report on every period until cancelled, then report once more.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.reporting_period();
        tracing::info!(period_ms = period.as_millis() as u64, "Stats reporter starting");

        let mut ticker = time::interval(period);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.report();
                }
                _ = cancel.cancelled() => {
                    self.report();
                    tracing::info!("Stats reporter received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

impl Default for StatsRecorder {
    fn default() -> Self {
        Self::new()
    }
}
