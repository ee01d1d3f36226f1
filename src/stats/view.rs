//! View definitions and aggregated view data.

use std::sync::Arc;
use std::time::SystemTime;

use super::measure::{
    Measure, TagKey, KEY_CLIENT_METHOD, KEY_CLIENT_STATUS, METHOD, STATUS_CODE,
};

/// Bucket bounds for byte-size distributions.
pub const DEFAULT_SIZE_BOUNDS: [f64; 14] = [
    0.0,
    1024.0,
    2048.0,
    4096.0,
    16384.0,
    65536.0,
    262144.0,
    1048576.0,
    4194304.0,
    16777216.0,
    67108864.0,
    268435456.0,
    1073741824.0,
    4294967296.0,
];

/// Bucket bounds for latency distributions, in milliseconds.
pub const DEFAULT_LATENCY_BOUNDS: [f64; 35] = [
    0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 8.0, 10.0, 13.0, 16.0, 20.0, 25.0, 30.0, 40.0, 50.0, 65.0,
    80.0, 100.0, 130.0, 160.0, 200.0, 250.0, 300.0, 400.0, 500.0, 650.0, 800.0, 1000.0, 2000.0,
    5000.0, 10000.0, 20000.0, 50000.0, 100000.0,
];

/// How a view folds measurements together.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    Count,
    Sum,
    /// Histogram with the given ascending bucket bounds.
    Distribution(Vec<f64>),
}

/// A named aggregation of one measure, sliced by an ordered set of tag keys.
#[derive(Debug, Clone, PartialEq)]
pub struct View {
    pub name: String,
    pub description: String,
    pub measure: Measure,
    pub aggregation: Aggregation,
    pub tag_keys: Vec<TagKey>,
}

impl View {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        measure: Measure,
        aggregation: Aggregation,
        tag_keys: Vec<TagKey>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            measure,
            aggregation,
            tag_keys,
        }
    }

    /// Add a tag key unless the view already carries it.
    pub fn append_tag_key(&mut self, key: TagKey) {
        if !self.tag_keys.contains(&key) {
            self.tag_keys.push(key);
        }
    }

    pub fn is_client_view(&self) -> bool {
        self.name.contains("http/client")
    }

    pub fn is_server_view(&self) -> bool {
        self.name.contains("http/server")
    }
}

fn size_distribution() -> Aggregation {
    Aggregation::Distribution(DEFAULT_SIZE_BOUNDS.to_vec())
}

fn latency_distribution() -> Aggregation {
    Aggregation::Distribution(DEFAULT_LATENCY_BOUNDS.to_vec())
}

/// Built-in client and server views.
pub fn default_views() -> Vec<View> {
    let client_keys = || vec![KEY_CLIENT_METHOD, KEY_CLIENT_STATUS];
    vec![
        View::new(
            "opencensus.io/http/client/sent_bytes",
            "Total bytes sent in request body (not including headers), by HTTP method and response status",
            Measure::ClientSentBytes,
            size_distribution(),
            client_keys(),
        ),
        View::new(
            "opencensus.io/http/client/received_bytes",
            "Total bytes received in response bodies (not including headers but including error responses with bodies), by HTTP method and response status",
            Measure::ClientReceivedBytes,
            size_distribution(),
            client_keys(),
        ),
        View::new(
            "opencensus.io/http/client/roundtrip_latency",
            "End-to-end latency, by HTTP method and response status",
            Measure::ClientRoundtripLatency,
            latency_distribution(),
            client_keys(),
        ),
        View::new(
            "opencensus.io/http/client/completed_count",
            "Count of completed requests, by HTTP method and response status",
            Measure::ClientRoundtripLatency,
            Aggregation::Count,
            client_keys(),
        ),
        View::new(
            "opencensus.io/http/server/request_count",
            "Count of HTTP requests started",
            Measure::ServerRequestCount,
            Aggregation::Count,
            Vec::new(),
        ),
        View::new(
            "opencensus.io/http/server/request_bytes",
            "Size distribution of HTTP request body",
            Measure::ServerRequestBytes,
            size_distribution(),
            Vec::new(),
        ),
        View::new(
            "opencensus.io/http/server/response_bytes",
            "Size distribution of HTTP response body",
            Measure::ServerResponseBytes,
            size_distribution(),
            Vec::new(),
        ),
        View::new(
            "opencensus.io/http/server/latency",
            "Latency distribution of HTTP requests",
            Measure::ServerLatency,
            latency_distribution(),
            Vec::new(),
        ),
        View::new(
            "opencensus.io/http/server/request_count_by_method",
            "Server request count by HTTP method",
            Measure::ServerRequestCount,
            Aggregation::Count,
            vec![METHOD],
        ),
        View::new(
            "opencensus.io/http/server/response_count_by_status_code",
            "Server response count by status code",
            Measure::ServerLatency,
            Aggregation::Count,
            vec![STATUS_CODE],
        ),
    ]
}

/// Aggregated value of one row.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationData {
    Count(u64),
    Sum(f64),
    Distribution {
        count: u64,
        sum: f64,
        min: f64,
        max: f64,
        /// One more bucket than bounds: `[.., b0), [b0, b1), .., [bn, ..)`.
        bucket_counts: Vec<u64>,
    },
}

impl AggregationData {
    pub fn new(aggregation: &Aggregation) -> Self {
        match aggregation {
            Aggregation::Count => AggregationData::Count(0),
            Aggregation::Sum => AggregationData::Sum(0.0),
            Aggregation::Distribution(bounds) => AggregationData::Distribution {
                count: 0,
                sum: 0.0,
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
                bucket_counts: vec![0; bounds.len() + 1],
            },
        }
    }

    pub fn add(&mut self, aggregation: &Aggregation, value: f64) {
        match (self, aggregation) {
            (AggregationData::Count(count), _) => *count += 1,
            (AggregationData::Sum(sum), _) => *sum += value,
            (
                AggregationData::Distribution {
                    count,
                    sum,
                    min,
                    max,
                    bucket_counts,
                },
                Aggregation::Distribution(bounds),
            ) => {
                *count += 1;
                *sum += value;
                *min = min.min(value);
                *max = max.max(value);
                let bucket = bounds
                    .iter()
                    .position(|bound| value < *bound)
                    .unwrap_or(bounds.len());
                if let Some(slot) = bucket_counts.get_mut(bucket) {
                    *slot += 1;
                }
            }
            (AggregationData::Distribution { .. }, _) => {}
        }
    }
}

/// One tag-value combination of a view.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Values in the order of the view's tag keys; missing tags are empty.
    pub tags: Vec<(TagKey, String)>,
    pub data: AggregationData,
}

/// Cumulative state of a view handed to view exporters.
#[derive(Debug, Clone)]
pub struct ViewData {
    pub view: Arc<View>,
    pub start: SystemTime,
    pub end: SystemTime,
    pub rows: Vec<Row>,
}
