//! Pipe stage instrumentation.
//!
//! # Data Flow
//! ```text
//! Request (SpanContext of the router stage in extensions)
//!     → pipe.rs (span `pipe-<endpoint>` or `backend-<url_pattern>`,
//!                own SpanContext into extensions)
//!     → proxy stage / backend call
//!     ← result: error or canceled attribute, complete attribute, span end
//! ```
//!
//! # Design Decisions
//! - The span ends when the stage resolves, not when the body is read
//! - Completeness is asked of the response itself through [`Completeness`]

pub mod pipe;

pub use pipe::{Completeness, PipeFuture, PipeLayer, PipeService};
