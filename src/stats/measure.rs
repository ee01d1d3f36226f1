//! Measures, tag keys, and per-recording tag sets.

use std::collections::BTreeMap;

/// A recorded quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Measure {
    ClientRequestCount,
    ClientSentBytes,
    ClientReceivedBytes,
    ClientRoundtripLatency,
    ClientLatency,
    ClientRequestBytes,
    ClientResponseBytes,
    ServerRequestCount,
    ServerRequestBytes,
    ServerResponseBytes,
    ServerLatency,
}

impl Measure {
    pub fn name(self) -> &'static str {
        match self {
            Measure::ClientRequestCount => "opencensus.io/http/client/request_count",
            Measure::ClientSentBytes => "opencensus.io/http/client/sent_bytes",
            Measure::ClientReceivedBytes => "opencensus.io/http/client/received_bytes",
            Measure::ClientRoundtripLatency => "opencensus.io/http/client/roundtrip_latency",
            Measure::ClientLatency => "opencensus.io/http/client/latency",
            Measure::ClientRequestBytes => "opencensus.io/http/client/request_bytes",
            Measure::ClientResponseBytes => "opencensus.io/http/client/response_bytes",
            Measure::ServerRequestCount => "opencensus.io/http/server/request_count",
            Measure::ServerRequestBytes => "opencensus.io/http/server/request_bytes",
            Measure::ServerResponseBytes => "opencensus.io/http/server/response_bytes",
            Measure::ServerLatency => "opencensus.io/http/server/latency",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Measure::ClientRequestCount | Measure::ServerRequestCount => "1",
            Measure::ClientRoundtripLatency | Measure::ClientLatency | Measure::ServerLatency => {
                "ms"
            }
            _ => "By",
        }
    }

    /// A measurement of this measure.
    pub fn m(self, value: f64) -> Measurement {
        Measurement {
            measure: self,
            value,
        }
    }
}

/// One observed value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub measure: Measure,
    pub value: f64,
}

/// Dimension key attached to measurements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagKey(&'static str);

impl TagKey {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(self) -> &'static str {
        self.0
    }
}

/// Server-side host tag.
pub const HOST: TagKey = TagKey::new("http.host");
/// Server-side path tag.
pub const PATH: TagKey = TagKey::new("http.path");
/// Server-side method tag.
pub const METHOD: TagKey = TagKey::new("http.method");
/// Status code tag shared by client and server recordings.
pub const STATUS_CODE: TagKey = TagKey::new("http.status");

pub const KEY_CLIENT_HOST: TagKey = TagKey::new("http_client_host");
pub const KEY_CLIENT_PATH: TagKey = TagKey::new("http_client_path");
pub const KEY_CLIENT_METHOD: TagKey = TagKey::new("http_client_method");
pub const KEY_CLIENT_STATUS: TagKey = TagKey::new("http_client_status");

/// Tag values of one recording.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagMap(BTreeMap<TagKey, String>);

impl TagMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value.
    pub fn upsert(&mut self, key: TagKey, value: impl Into<String>) {
        self.0.insert(key, value.into());
    }

    pub fn get(&self, key: TagKey) -> Option<&str> {
        self.0.get(&key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(TagKey, String)> for TagMap {
    fn from_iter<I: IntoIterator<Item = (TagKey, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
