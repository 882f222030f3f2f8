//! # Client
//!
//! A [`Client`] owns exactly one [`Connection`] to one peer and talks to it in
//! strict request/response turns: one envelope out, one envelope back.
//!
//! ## Failure policy
//!
//! Any failed exchange closes the connection. There is no silent reconnect;
//! callers `connect` again before retrying. [`Client::ping`] is the exception
//! to error reporting: it folds every failure into `false`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let mut client = Client::new(ClientConfig::new("127.0.0.1", 65432));
//! client.connect(Duration::from_secs(5)).await?;
//!
//! let reply = client
//!     .send_as_json(&json!({ "movie": "Alien" }), Duration::from_secs(1))
//!     .await?;
//! println!("server said {reply}");
//!
//! client.close().await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;

use crate::common::codec::{Codec, JsonCodec};
use crate::common::config::ClientConfig;
use crate::common::connection::Connection;
use crate::common::error::{ClientError, CodecError, ConnectionError};
use crate::common::messages::{new_ping_token, ping_probe, pong_token, Envelope};

/// Request/response client over a single framed connection.
pub struct Client {
    config: ClientConfig,
    connection: Connection,
    codec: Arc<dyn Codec>,
    /// `(address, port)` of the last successful connect, kept for diagnostics
    connected_at: Option<(String, u16)>,
}

impl Client {
    /// Create an unconnected client for the configured peer.
    pub fn new(config: ClientConfig) -> Self {
        let connection = Connection::new(config.remote_address.clone(), config.remote_port)
            .with_io_timeout(config.io_timeout())
            .with_max_frame_bytes(config.max_frame_bytes);

        Self {
            config,
            connection,
            codec: Arc::new(JsonCodec),
            connected_at: None,
        }
    }

    pub fn with_codec(mut self, codec: impl Codec + 'static) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Where the last successful `connect` went.
    pub fn connected_at(&self) -> Option<(&str, u16)> {
        self.connected_at
            .as_ref()
            .map(|(address, port)| (address.as_str(), *port))
    }

    /// Connect to the configured peer.
    ///
    /// Only the transport can fail here, so the error is the bare
    /// [`ConnectionError`]; `?` lifts it into [`ClientError`] where needed.
    pub async fn connect(&mut self, timeout: Duration) -> Result<(), ConnectionError> {
        info!("🔗 Connecting to {}", self.connection.peer_target());
        self.connection.connect(timeout).await?;
        self.connected_at = Some((
            self.connection.peer_address().to_string(),
            self.connection.peer_port(),
        ));
        info!("✅ Connected to {}", self.connection.peer_target());
        Ok(())
    }

    /// Send `value` and wait for the peer's reply.
    ///
    /// Both the send and the receive are bounded by `timeout`.
    ///
    /// # Errors
    /// - `Connection(NotConnected)`: `connect` was not called or the client was closed
    /// - `Connection(Timeout)`: either leg took longer than `timeout`
    /// - `Codec(Decode)`: the reply is not a valid envelope
    /// - `Disconnected`: the peer closed instead of replying
    ///
    /// The connection is closed on every error.
    pub async fn send_as_json<T>(&mut self, value: &T, timeout: Duration) -> Result<Envelope, ClientError>
    where
        T: Serialize + ?Sized,
    {
        let outcome = self.exchange(value, timeout).await;
        self.close_on_error(outcome).await
    }

    /// Wait for one envelope the peer sends unprompted, e.g. a relayed message.
    /// Same failure policy as [`send_as_json`](Self::send_as_json).
    pub async fn receive_json(&mut self, timeout: Duration) -> Result<Envelope, ClientError> {
        let outcome = self.read_envelope(timeout).await;
        self.close_on_error(outcome).await
    }

    /// Check that the peer answers a ping with the matching pong.
    ///
    /// Returns `false` for a wrong token, a malformed reply, a timeout, or a
    /// client that is not connected.
    pub async fn ping(&mut self, timeout: Duration) -> bool {
        let token = new_ping_token();
        match self.send_as_json(&ping_probe(&token), timeout).await {
            Ok(reply) if pong_token(&reply) == Some(token.as_str()) => true,
            Ok(reply) => {
                debug!("🏓 Ping {} answered with {}", token, reply);
                false
            }
            Err(err) => {
                debug!("🏓 Ping {} failed: {}", token, err);
                false
            }
        }
    }

    /// Close the connection. Safe to call repeatedly.
    pub async fn close(&self) {
        if !self.connection.is_connected() {
            return;
        }
        self.connection.close().await;
        if let Some((address, port)) = self.connected_at() {
            info!("🔌 Connection closed at host {} / port {}", address, port);
        }
    }

    async fn exchange<T>(&self, value: &T, timeout: Duration) -> Result<Envelope, ClientError>
    where
        T: Serialize + ?Sized,
    {
        if !self.connection.is_connected() {
            return Err(ConnectionError::NotConnected.into());
        }

        let envelope =
            serde_json::to_value(value).map_err(|e| CodecError::Encode(e.to_string()))?;
        let payload = self.codec.encode(&envelope)?;
        self.connection.send(&payload, timeout).await?;
        self.read_envelope(timeout).await
    }

    async fn read_envelope(&self, timeout: Duration) -> Result<Envelope, ClientError> {
        let payload = self
            .connection
            .receive(self.config.max_frame_bytes, timeout)
            .await?
            .ok_or(ClientError::Disconnected)?;
        Ok(self.codec.decode(&payload)?)
    }

    async fn close_on_error(
        &self,
        outcome: Result<Envelope, ClientError>,
    ) -> Result<Envelope, ClientError> {
        if let Err(err) = &outcome {
            warn!(
                "⚠️  Request to {} failed, closing connection: {}",
                self.connection.peer_target(),
                err
            );
            self.close().await;
        }
        outcome
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("peer", &self.connection.peer_target())
            .field("codec", &self.codec.name())
            .field("connected_at", &self.connected_at)
            .finish()
    }
}
