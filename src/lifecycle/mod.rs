//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGINT/SIGTERM → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → token cancelled
//!         → gateway listener drains
//!         → stats reporter flushes one last report
//!         → exporter loops flush and exit
//!     wait(deadline) → tracked tasks joined
//!     Registry::shutdown → span processors flushed
//! ```
//!
//! # Design Decisions
//! - One cancellation token for the whole process; tasks hold child tokens
//! - Background loops own their final flush
//! - Tracked tasks are joined before the runtime is dropped

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
