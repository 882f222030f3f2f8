//! # Server Components
//!
//! - [`server`]: the [`Server`] lifecycle, bind, listen and accept loop
//! - [`handler`]: the per-connection session loop and the echo/relay behaviors
//! - [`registry`]: the directory of live sessions used for relaying
//! - [`metrics`]: counters describing a running server

pub mod handler;
pub mod metrics;
pub mod registry;
pub mod server;

pub use handler::{EchoResponder, Responder, ServerMode};
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use registry::{ConnectionRegistry, PeerId};
pub use server::{Server, ServerBuilder, ServerState};
