//! # Per-Connection Handler
//!
//! Every accepted client gets its own task running [`SessionContext::serve`]:
//!
//! ```text
//! loop {
//!     receive frame ──▶ peer closed?   ──▶ exit
//!                   └─▶ decode envelope
//!                       ├─ Echo:  reply = responder(envelope)
//!                       └─ Relay: send frame to every other peer, reply = {"status": "OK"}
//!                       send reply to the sender
//! }
//! unregister peer, close connection
//! ```
//!
//! A session that fails (I/O error, malformed envelope, idle timeout) logs the
//! failure and ends. Nothing propagates to the accept loop or to other sessions.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::task::JoinSet;

use crate::common::codec::Codec;
use crate::common::config::ServerConfig;
use crate::common::connection::Connection;
use crate::common::error::{CodecError, ConnectionError};
use crate::common::messages::{relay_ack, Envelope};

use super::metrics::ServerMetrics;
use super::registry::{ConnectionRegistry, PeerId};

/// What a server does with each inbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMode {
    /// Reply to the sender with the responder's answer.
    Echo,
    /// Forward to every other connected client; acknowledge the sender.
    Relay,
}

impl ServerMode {
    pub fn from_config(config: &ServerConfig) -> Self {
        if config.relay_mode {
            ServerMode::Relay
        } else {
            ServerMode::Echo
        }
    }
}

impl std::fmt::Display for ServerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerMode::Echo => write!(f, "echo"),
            ServerMode::Relay => write!(f, "relay"),
        }
    }
}

/// Builds the reply to an envelope in [`ServerMode::Echo`].
///
/// Application code plugs its request handling in here. Closures of the form
/// `Fn(PeerId, Envelope) -> Envelope` implement it directly.
pub trait Responder: Send + Sync {
    fn respond(&self, peer: PeerId, message: Envelope) -> Envelope;
}

/// Default responder: sends the decoded envelope straight back.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoResponder;

impl Responder for EchoResponder {
    fn respond(&self, _peer: PeerId, message: Envelope) -> Envelope {
        message
    }
}

impl<F> Responder for F
where
    F: Fn(PeerId, Envelope) -> Envelope + Send + Sync,
{
    fn respond(&self, peer: PeerId, message: Envelope) -> Envelope {
        self(peer, message)
    }
}

#[derive(Debug, Error)]
enum SessionError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("no message for {0:?}")]
    Idle(Duration),
}

/// Everything a session task needs, shared by all sessions of one server.
pub(crate) struct SessionContext {
    pub(crate) mode: ServerMode,
    pub(crate) codec: Arc<dyn Codec>,
    pub(crate) responder: Arc<dyn Responder>,
    pub(crate) registry: ConnectionRegistry,
    pub(crate) metrics: ServerMetrics,
    pub(crate) io_timeout: Duration,
    pub(crate) idle_timeout: Option<Duration>,
    pub(crate) max_frame_bytes: usize,
}

impl SessionContext {
    pub(crate) fn new(
        config: &ServerConfig,
        codec: Arc<dyn Codec>,
        responder: Arc<dyn Responder>,
    ) -> Self {
        Self {
            mode: ServerMode::from_config(config),
            codec,
            responder,
            registry: ConnectionRegistry::new(),
            metrics: ServerMetrics::new(),
            io_timeout: config.io_timeout(),
            idle_timeout: config.idle_timeout(),
            max_frame_bytes: config.max_frame_bytes,
        }
    }

    /// Serve one client until it disconnects or fails, then clean up after it.
    pub(crate) async fn serve(&self, peer: PeerId, connection: Arc<Connection>) {
        info!(
            "👋 Client {} connected ({} active)",
            peer,
            self.metrics.active_sessions()
        );

        match self.run(peer, &connection).await {
            Ok(()) => info!("👋 Client {} disconnected", peer),
            Err(SessionError::Connection(ConnectionError::NotConnected)) => {
                debug!("🔌 Session with {} closed by the server", peer)
            }
            Err(err) => {
                self.metrics.record_handler_error();
                error!("❌ Session with {} ended: {}", peer, err);
            }
        }

        self.registry.remove_if_same(&peer, &connection).await;
        connection.close().await;
    }

    async fn run(&self, peer: PeerId, connection: &Connection) -> Result<(), SessionError> {
        let receive_timeout = self.idle_timeout.unwrap_or(self.io_timeout);

        loop {
            let payload = match connection
                .receive(self.max_frame_bytes, receive_timeout)
                .await
            {
                Ok(Some(payload)) => payload,
                Ok(None) => return Ok(()),
                // Without an idle limit a quiet client is fine; re-arm the receive.
                Err(ConnectionError::Timeout(_)) if self.idle_timeout.is_none() => continue,
                Err(ConnectionError::Timeout(waited)) => return Err(SessionError::Idle(waited)),
                Err(err) => return Err(err.into()),
            };

            self.metrics.record_received();
            let message = self.codec.decode(&payload)?;
            debug!("📨 {} bytes from {}", payload.len(), peer);

            let reply = match self.mode {
                ServerMode::Echo => self.responder.respond(peer, message),
                ServerMode::Relay => {
                    self.broadcast(peer, &payload).await;
                    relay_ack()
                }
            };

            let bytes = self.codec.encode(&reply)?;
            connection.send(&bytes, self.io_timeout).await?;
        }
    }

    /// Send `payload` to every registered session except `sender`.
    ///
    /// Deliveries run concurrently. A failed delivery is skipped; the failing
    /// connection closes itself and its own session unregisters it.
    async fn broadcast(&self, sender: PeerId, payload: &Bytes) {
        let targets = self.registry.others(&sender).await;
        if targets.is_empty() {
            debug!("📭 No other clients to relay to from {}", sender);
            return;
        }

        let mut deliveries = JoinSet::new();
        for (peer, connection) in targets {
            let payload = payload.clone();
            let timeout = self.io_timeout;
            deliveries.spawn(async move { (peer, connection.send(&payload, timeout).await) });
        }

        let (mut delivered, mut failed) = (0u64, 0u64);
        while let Some(joined) = deliveries.join_next().await {
            match joined {
                Ok((_, Ok(()))) => delivered += 1,
                Ok((peer, Err(err))) => {
                    failed += 1;
                    warn!("⚠️  Skipping {} for relay from {}: {}", peer, sender, err);
                }
                Err(err) => {
                    failed += 1;
                    warn!("⚠️  Relay delivery task failed: {}", err);
                }
            }
        }

        self.metrics.record_relayed(delivered, failed);
        debug!(
            "📣 Relayed message from {} to {} peer(s), {} skipped",
            sender, delivered, failed
        );
    }
}
