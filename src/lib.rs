//! # jsonwire
//!
//! Length-framed JSON messaging over TCP.
//!
//! - [`common`]: framing, codec, connection, configuration, errors, logging
//! - [`server`]: echo and relay servers with a registry of live sessions
//! - [`client`]: request/response client with ping support
//! - [`setup`]: one-call server and client construction

pub mod client;
pub mod common;
pub mod server;
pub mod setup;

pub use client::Client;
pub use common::codec::{Codec, JsonCodec};
pub use common::config::{ClientConfig, ServerConfig};
pub use common::connection::Connection;
pub use common::error::{
    BindError, ClientError, CodecError, ConnectionError, FrameError, ServerError,
};
pub use common::messages::Envelope;
pub use server::{Responder, Server, ServerMode, ServerState};
pub use setup::{setup_client, setup_server};
