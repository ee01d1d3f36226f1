//! Tag and span attribute builders.
//!
//! Everything here is computed fresh per request; nothing is cached across
//! requests since host and path differ per call.

use std::sync::Arc;

use http::header::{CONTENT_LENGTH, HOST, USER_AGENT};
use http::{HeaderMap, Method, Request, Uri};
use http_body::Body;

use super::path::PathAggregator;
use crate::stats::measure::{self, TagKey, TagMap};
use crate::trace::KeyValue;

pub const PATH_ATTRIBUTE: &str = "http.path";
pub const HOST_ATTRIBUTE: &str = "http.host";
pub const METHOD_ATTRIBUTE: &str = "http.method";
pub const URL_ATTRIBUTE: &str = "http.url";
pub const USER_AGENT_ATTRIBUTE: &str = "http.user_agent";
pub const STATUS_CODE_ATTRIBUTE: &str = "http.status_code";

/// Borrowed view of the request line and headers.
#[derive(Debug, Clone, Copy)]
pub struct RequestInfo<'a> {
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub headers: &'a HeaderMap,
}

impl<'a> RequestInfo<'a> {
    pub fn from_request<B>(req: &'a Request<B>) -> Self {
        Self {
            method: req.method(),
            uri: req.uri(),
            headers: req.headers(),
        }
    }

    pub fn path(&self) -> &'a str {
        self.uri.path()
    }

    /// `Host` header, falling back to the URI authority.
    pub fn host(&self) -> &'a str {
        self.headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| self.uri.authority().map(|a| a.as_str()))
            .unwrap_or_default()
    }

    pub fn user_agent(&self) -> &'a str {
        self.headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }

    /// Declared `Content-Length`, if any.
    pub fn content_length(&self) -> Option<u64> {
        content_length(self.headers)
    }
}

pub(crate) fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Size of a request body: -1 when there is none, otherwise the declared
/// or exactly known length, else 0.
pub fn request_size<B: Body>(req: &Request<B>) -> i64 {
    if req.body().is_end_stream() {
        return -1;
    }
    content_length(req.headers())
        .or_else(|| req.body().size_hint().exact())
        .map(|size| i64::try_from(size).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Default span name of an outgoing request: its path.
pub fn span_name_from_request(req: &RequestInfo<'_>) -> String {
    req.path().to_string()
}

pub fn request_attributes(req: &RequestInfo<'_>) -> Vec<KeyValue> {
    let mut attributes = vec![
        KeyValue::new(PATH_ATTRIBUTE, req.path().to_string()),
        KeyValue::new(URL_ATTRIBUTE, req.uri.to_string()),
        KeyValue::new(HOST_ATTRIBUTE, req.host().to_string()),
        KeyValue::new(METHOD_ATTRIBUTE, req.method.as_str().to_string()),
    ];
    let user_agent = req.user_agent();
    if !user_agent.is_empty() {
        attributes.push(KeyValue::new(USER_AGENT_ATTRIBUTE, user_agent.to_string()));
    }
    attributes
}

pub fn response_attributes(status: u16) -> Vec<KeyValue> {
    vec![KeyValue::new(STATUS_CODE_ATTRIBUTE, i64::from(status))]
}

/// Derives one tag from the request entering the stats layer.
pub type TagGenerator = Arc<dyn Fn(&RequestInfo<'_>) -> (TagKey, String) + Send + Sync>;

/// Client-side tags of a backend call: host, aggregated path and method.
pub fn backend_tag_generators(aggregator: PathAggregator) -> Vec<TagGenerator> {
    vec![
        Arc::new(|req: &RequestInfo<'_>| (measure::KEY_CLIENT_HOST, req.host().to_string())),
        Arc::new(move |req: &RequestInfo<'_>| {
            (measure::KEY_CLIENT_PATH, aggregator.aggregate(req.path()))
        }),
        Arc::new(|req: &RequestInfo<'_>| {
            (measure::KEY_CLIENT_METHOD, req.method.as_str().to_string())
        }),
    ]
}

/// Server-side tags of an inbound request, before the status is known.
pub fn server_tags(req: &RequestInfo<'_>, aggregator: &PathAggregator) -> TagMap {
    let mut tags = TagMap::new();
    tags.upsert(measure::HOST, req.host());
    tags.upsert(measure::PATH, aggregator.aggregate(req.path()));
    tags.upsert(measure::METHOD, req.method.as_str());
    tags
}
