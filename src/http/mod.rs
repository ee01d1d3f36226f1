//! Instrumented forwarding gateway.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum router, one route per endpoint template)
//!     → RouterLayer (server span, server measures)
//!     → PipeLayer `pipe-<endpoint>`
//!     → forward handler (render backend URL from path params)
//!     → client.rs: PipeLayer `backend-<url_pattern>` → TransportLayer → hyper client
//!     → Backend
//! ```

pub mod client;
pub mod server;

pub use client::{BackendClient, BackendResponse};
pub use server::{route_path, GatewayServer};
