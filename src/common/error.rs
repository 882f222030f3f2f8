//! # Error Taxonomy
//!
//! Typed errors for every layer of the messaging stack:
//!
//! - [`FrameError`]: the length-prefix framing rejected a frame
//! - [`CodecError`]: an envelope could not be encoded or decoded
//! - [`ConnectionError`]: a socket operation failed (fatal to that connection only)
//! - [`BindError`] / [`ServerError`]: server startup failed
//! - [`ClientError`]: a client request failed (the client is left disconnected)

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::server::ServerState;

/// A frame violated the wire format limits.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The payload length exceeds the configured maximum.
    #[error("frame of {len} bytes exceeds the {max}-byte limit")]
    TooLarge { len: usize, max: usize },
}

/// Failure to turn an envelope into bytes or bytes into an envelope.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode envelope: {0}")]
    Encode(String),
    /// The payload is not valid envelope data.
    #[error("malformed envelope: {0}")]
    Decode(String),
}

/// Errors raised by [`Connection`](super::connection::Connection) operations.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection to {addr} refused: {source}")]
    Refused {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection is not open")]
    NotConnected,

    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl ConnectionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConnectionError::Timeout(_))
    }
}

/// The server could not take its configured address.
#[derive(Debug, Error)]
#[error("failed to bind {addr}: {source}")]
pub struct BindError {
    pub addr: String,
    #[source]
    pub source: io::Error,
}

/// Errors returned by [`Server::start`](crate::server::Server::start).
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Bind(#[from] BindError),

    /// `start` was called on a server that is not in [`ServerState::Created`].
    #[error("server cannot start from state {0:?}")]
    InvalidState(ServerState),

    #[error("invalid server configuration: {0}")]
    InvalidConfig(String),
}

/// Errors surfaced to callers of [`Client`](crate::client::Client).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The peer closed the connection instead of replying.
    #[error("peer closed the connection")]
    Disconnected,
}

impl ClientError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Connection(err) if err.is_timeout())
    }

    pub fn is_not_connected(&self) -> bool {
        matches!(self, ClientError::Connection(ConnectionError::NotConnected))
    }
}
