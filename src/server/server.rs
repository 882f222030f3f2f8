//! # Server - Accept Loop and Lifecycle
//!
//! A [`Server`] binds the configured address, listens, and serves every accepted
//! client on its own task. Echo or relay behavior comes from
//! [`ServerMode`], picked from `ServerConfig::relay_mode`.
//!
//! ## Lifecycle
//!
//! ```text
//! Created ──bind──▶ Bound ──listen──▶ Listening ──start()──▶ Accepting ──stop()──▶ Stopped
//! ```
//!
//! A failed `listen` rolls the server back to `Created`.
//!
//! ## Backlog
//!
//! `max_concurrent_clients` sizes the kernel listen backlog only. The accept
//! loop never stops accepting, so any number of sessions can run at once;
//! the backlog just bounds how many handshakes may wait for the next `accept`.
//!
//! ## Shutdown
//!
//! [`Server::stop`] is cooperative: it ends the accept loop (dropping the
//! listening socket) and closes every registered connection, which wakes each
//! session task so it can clean up and exit.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{error, info, warn};
use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::common::codec::{Codec, JsonCodec};
use crate::common::config::ServerConfig;
use crate::common::connection::Connection;
use crate::common::error::{BindError, ServerError};

use super::handler::{EchoResponder, Responder, ServerMode, SessionContext};
use super::metrics::{MetricsSnapshot, ServerMetrics};
use super::registry::PeerId;

/// Pause after a failed `accept` (e.g. out of file descriptors) before retrying.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Where a server is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Bound,
    Listening,
    Accepting,
    Stopped,
}

/// Configures the pluggable parts of a [`Server`] before it is built.
pub struct ServerBuilder {
    config: ServerConfig,
    codec: Arc<dyn Codec>,
    responder: Arc<dyn Responder>,
}

impl ServerBuilder {
    pub fn codec(mut self, codec: impl Codec + 'static) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Reply logic for echo mode. Ignored in relay mode.
    pub fn responder(mut self, responder: impl Responder + 'static) -> Self {
        self.responder = Arc::new(responder);
        self
    }

    pub fn build(self) -> Server {
        let session = SessionContext::new(&self.config, self.codec, self.responder);
        let (shutdown, _) = watch::channel(false);

        Server {
            inner: Arc::new(ServerInner {
                config: self.config,
                session,
                state: Mutex::new(ServerState::Created),
                local_addr: Mutex::new(None),
                shutdown,
                accept_task: Mutex::new(None),
            }),
        }
    }
}

/// Handle to an echo or relay server. Clones refer to the same server.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    config: ServerConfig,
    session: SessionContext,
    state: Mutex<ServerState>,
    local_addr: Mutex<Option<SocketAddr>>,
    shutdown: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// A server with the JSON codec and the echo responder.
    pub fn new(config: ServerConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: ServerConfig) -> ServerBuilder {
        ServerBuilder {
            config,
            codec: Arc::new(JsonCodec),
            responder: Arc::new(EchoResponder),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn mode(&self) -> ServerMode {
        self.inner.session.mode
    }

    pub fn state(&self) -> ServerState {
        *lock(&self.inner.state)
    }

    /// Address actually bound, once the server is listening. Useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.inner.local_addr)
    }

    /// Peers whose sessions are currently registered.
    pub async fn connected_peers(&self) -> Vec<PeerId> {
        self.inner.session.registry.peers().await
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.session.metrics.snapshot()
    }

    pub fn metrics_handle(&self) -> ServerMetrics {
        self.inner.session.metrics.clone()
    }

    /// Bind, listen and start accepting clients.
    ///
    /// With `daemon = true` the accept loop runs on a background task and this
    /// returns as soon as the server is accepting. Otherwise it returns only
    /// after [`stop`](Self::stop) is called from elsewhere.
    ///
    /// # Errors
    /// - [`ServerError::Bind`]: the address is unavailable (in use, no permission,
    ///   unresolvable). Startup is aborted, never retried.
    /// - [`ServerError::InvalidState`]: the server was already started or stopped.
    /// - [`ServerError::InvalidConfig`]: the configuration cannot be served.
    pub async fn start(&self, daemon: bool) -> Result<(), ServerError> {
        self.inner
            .config
            .validate()
            .map_err(ServerError::InvalidConfig)?;

        let state = self.state();
        if state != ServerState::Created {
            return Err(ServerError::InvalidState(state));
        }

        info!(
            "🚀 Starting {} server on {}",
            self.mode(),
            self.inner.config.bind_target()
        );
        let listener = self.bind_and_listen().await?;
        self.advance(ServerState::Listening, ServerState::Accepting)?;

        if daemon {
            let server = self.clone();
            let task = tokio::spawn(async move { server.accept_loop(listener).await });
            *lock(&self.inner.accept_task) = Some(task);
        } else {
            self.accept_loop(listener).await;
        }

        Ok(())
    }

    async fn bind_and_listen(&self) -> Result<TcpListener, ServerError> {
        let config = &self.inner.config;
        let target = config.bind_target();
        let bind_error = |source: io::Error| BindError {
            addr: target.clone(),
            source,
        };

        let addr = lookup_host(target.as_str())
            .await
            .map_err(bind_error)?
            .next()
            .ok_or_else(|| {
                bind_error(io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    "address did not resolve",
                ))
            })?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_error)?;
        #[cfg(unix)]
        socket.set_reuseaddr(true).map_err(bind_error)?;

        socket.bind(addr).map_err(bind_error)?;
        self.advance(ServerState::Created, ServerState::Bound)?;

        let listener = match socket.listen(config.max_concurrent_clients) {
            Ok(listener) => listener,
            Err(err) => return Err(self.listen_failed(bind_error(err))),
        };
        let local_addr = listener
            .local_addr()
            .map_err(|err| self.listen_failed(bind_error(err)))?;
        *lock(&self.inner.local_addr) = Some(local_addr);
        self.advance(ServerState::Bound, ServerState::Listening)?;

        info!(
            "📡 {} server listening on {} (backlog {})",
            self.mode(),
            local_addr,
            config.max_concurrent_clients
        );
        Ok(listener)
    }

    /// Roll back a bind whose `listen` failed. The socket is already dropped,
    /// so a later `start` may try again.
    fn listen_failed(&self, err: BindError) -> ServerError {
        match self.advance(ServerState::Bound, ServerState::Created) {
            Ok(()) => err.into(),
            Err(state_err) => state_err,
        }
    }

    async fn accept_loop(&self, listener: TcpListener) {
        loop {
            let accepted = tokio::select! {
                _ = self.shutdown_signal() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => self.spawn_session(stream, peer).await,
                Err(err) => {
                    error!("❌ Accept error: {}", err);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }

        info!(
            "🛑 Stopped accepting on {}",
            self.local_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|| self.inner.config.bind_target())
        );
    }

    /// Register the client, then hand it to its own session task.
    async fn spawn_session(&self, stream: TcpStream, peer: PeerId) {
        let config = &self.inner.config;
        let connection = match Connection::from_stream(stream) {
            Ok(connection) => Arc::new(
                connection
                    .with_io_timeout(config.io_timeout())
                    .with_max_frame_bytes(config.max_frame_bytes),
            ),
            Err(err) => {
                warn!("⚠️  Dropping connection from {}: {}", peer, err);
                return;
            }
        };

        let session = &self.inner.session;
        if let Some(stale) = session.registry.insert(peer, Arc::clone(&connection)).await {
            warn!("⚠️  Replacing stale session for {}", peer);
            stale.close().await;
        }

        // stop() may have drained the registry between accept and insert.
        if *self.inner.shutdown.borrow() {
            session.registry.remove_if_same(&peer, &connection).await;
            connection.close().await;
            return;
        }

        session.metrics.session_opened();
        let server = self.clone();
        tokio::spawn(async move {
            server.inner.session.serve(peer, connection).await;
            server.inner.session.metrics.session_closed();
        });
    }

    /// Stop accepting, close every session and wait for the accept loop to end.
    /// Calling it again is a no-op.
    pub async fn stop(&self) {
        {
            let mut state = lock(&self.inner.state);
            if *state == ServerState::Stopped {
                return;
            }
            *state = ServerState::Stopped;
        }

        self.inner.shutdown.send_replace(true);

        let sessions = self.inner.session.registry.drain().await;
        let closed = sessions.len();
        for (_, connection) in sessions {
            connection.close().await;
        }

        let accept_task = lock(&self.inner.accept_task).take();
        if let Some(task) = accept_task {
            if let Err(err) = task.await {
                warn!("⚠️  Accept loop ended abnormally: {}", err);
            }
        }

        info!("🛑 Server stopped, {} session(s) closed", closed);
    }

    fn shutdown_signal(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut shutdown = self.inner.shutdown.subscribe();
        async move {
            let _ = shutdown.wait_for(|stopping| *stopping).await;
        }
    }

    fn advance(&self, from: ServerState, to: ServerState) -> Result<(), ServerError> {
        let mut state = lock(&self.inner.state);
        if *state != from {
            return Err(ServerError::InvalidState(*state));
        }
        *state = to;
        Ok(())
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("mode", &self.mode())
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn daemon_start_walks_the_state_machine() {
        let server = Server::new(ServerConfig::new("127.0.0.1", 0));
        assert_eq!(server.state(), ServerState::Created);
        assert!(server.local_addr().is_none());

        server.start(true).await.unwrap();
        assert!(server.local_addr().is_some());
        assert_ne!(server.local_addr().unwrap().port(), 0);

        assert_eq!(server.state(), ServerState::Accepting);

        server.stop().await;
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let server = Server::new(ServerConfig::new("127.0.0.1", 0));
        server.start(true).await.unwrap();

        let err = server.start(true).await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidState(_)), "got {err:?}");
        server.stop().await;

        let err = server.start(true).await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidState(ServerState::Stopped)));
    }

    #[tokio::test]
    async fn zero_client_limit_is_invalid() {
        let config = ServerConfig::new("127.0.0.1", 0).with_max_concurrent_clients(0);
        let err = Server::new(config).start(true).await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn occupied_port_is_a_bind_error() {
        let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = holder.local_addr().unwrap().port();

        let server = Server::new(ServerConfig::new("127.0.0.1", port));
        let err = server.start(true).await.unwrap_err();
        assert!(matches!(err, ServerError::Bind(_)), "got {err:?}");
        assert!(server.local_addr().is_none());
    }

    #[tokio::test]
    async fn unresolvable_address_is_a_bind_error() {
        let server = Server::new(ServerConfig::new("no-such-host.invalid", 0));
        let err = server.start(true).await.unwrap_err();
        assert!(matches!(err, ServerError::Bind(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn failed_listen_allows_a_retry() {
        let server = Server::new(ServerConfig::new("127.0.0.1", 0));
        server
            .advance(ServerState::Created, ServerState::Bound)
            .unwrap();

        let err = server.listen_failed(BindError {
            addr: "127.0.0.1:0".to_string(),
            source: io::Error::new(io::ErrorKind::Other, "listen refused"),
        });
        assert!(matches!(err, ServerError::Bind(_)), "got {err:?}");
        assert_eq!(server.state(), ServerState::Created);

        server.start(true).await.unwrap();
        assert_eq!(server.state(), ServerState::Accepting);
        server.stop().await;
    }

    #[tokio::test]
    async fn debug_shows_mode_and_state() {
        let server = Server::new(ServerConfig::new("127.0.0.1", 0).with_relay_mode(true));
        let shown = format!("{server:?}");
        assert!(shown.contains("Relay"), "{shown}");
        assert!(shown.contains("Created"), "{shown}");
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let server = Server::new(ServerConfig::new("127.0.0.1", 0));
        server.start(true).await.unwrap();
        server.stop().await;
        server.stop().await;
        assert_eq!(server.state(), ServerState::Stopped);
    }
}
