//! Inbound request instrumentation.
//!
//! # Data Flow
//! ```text
//! Inbound request (optional B3 headers)
//!     → layer.rs (server span named after the endpoint template,
//!                 request counter, SpanContext into extensions)
//!     → endpoint handler (pipe and backend stages pick the context up)
//!     ← Response body wrapped by the body tracker
//!         on end: latency, request/response bytes, span end
//! ```
//!
//! # Design Decisions
//! - Public endpoints never trust the caller's trace; they link to it instead
//! - Paths are aggregated with the endpoint's strategy before tagging
//! - Measures are recorded once the response body has been written

pub mod layer;

pub use layer::{RouterFuture, RouterLayer, RouterService};
