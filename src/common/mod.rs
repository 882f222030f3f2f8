//! # Common Components
//!
//! Shared building blocks used by both client and server components.
//!
//! ## Modules
//!
//! - [`codec`]: envelope encoding plus the length-prefixed wire framing
//! - [`connection`]: one framed TCP session with connect/send/receive/close
//! - [`messages`]: the envelope type and reserved ping/pong/ack envelopes
//! - [`config`]: server and client configuration, TOML loading
//! - [`error`]: typed errors for every layer
//! - [`logging`]: the timestamped logger used by the binaries

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod messages;
