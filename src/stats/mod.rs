//! Aggregated request statistics.
//!
//! # Data Flow
//! ```text
//! Transport / router layers
//!     → measure.rs (Measurement + TagMap)
//!     → recorder.rs (fold into every view on that measure)
//!     → reporting loop (every period, and once on shutdown)
//!     → ViewExporter set
//! ```
//!
//! # Design Decisions
//! - Aggregation is cumulative from view registration
//! - Rows are keyed by tag values in view tag-key order; absent tags are empty
//! - Views are only ever extended with tag keys, never removed

pub mod measure;
pub mod recorder;
pub mod view;

pub use measure::{Measure, Measurement, TagKey, TagMap};
pub use recorder::{StatsRecorder, ViewError, ViewExporter, DEFAULT_REPORTING_PERIOD};
pub use view::{default_views, Aggregation, AggregationData, Row, View, ViewData};
