//! # TCP Connection Abstraction
//!
//! A [`Connection`] is one framed TCP session with an explicit lifecycle:
//!
//! ```text
//! new() ──connect()──▶ connected ──close()──▶ closed ──connect()──▶ connected ...
//! from_stream() ─────▶ connected
//! ```
//!
//! `send` and `receive` are only valid while connected and are always bounded by
//! a timeout. All methods take `&self`, so one `Arc<Connection>` can be read by
//! its owning handler while other tasks write to it (relay broadcasts). The two
//! socket halves sit behind separate locks for that reason.
//!
//! ## Guarantees
//!
//! - `receive` is cancel-safe: bytes already read for an unfinished frame stay
//!   buffered across timeouts, so a slow peer never desynchronizes the stream.
//! - A `close` from any task wakes a `receive` or `send` blocked on this
//!   connection; they return [`ConnectionError::NotConnected`].
//! - `close` is idempotent and releases the socket exactly once.
//! - A failed or timed-out `send` may have written part of a frame, so the
//!   connection closes itself afterwards.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::PoisonError;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::time;

use super::codec::{decode_frame, encode_frame, DEFAULT_MAX_FRAME_BYTES};
use super::error::ConnectionError;

/// Default deadline for a single send or receive.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `close` waits for the write-side shutdown to flush.
const CLOSE_GRACE: Duration = Duration::from_millis(200);

const READ_CHUNK: usize = 8 * 1024;

/// Read half plus the bytes received so far that do not form a full frame yet.
struct FrameReader {
    half: OwnedReadHalf,
    buf: BytesMut,
}

impl FrameReader {
    fn new(half: OwnedReadHalf) -> Self {
        Self {
            half,
            buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// `Ok(None)` means the peer closed cleanly between frames.
    async fn next_frame(&mut self, max_bytes: usize) -> Result<Option<Bytes>, ConnectionError> {
        loop {
            if let Some(frame) = decode_frame(&mut self.buf, max_bytes)? {
                return Ok(Some(frame));
            }

            self.buf.reserve(READ_CHUNK);
            if self.half.read_buf(&mut self.buf).await? == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("peer closed inside a frame ({} bytes pending)", self.buf.len()),
                )
                .into());
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Endpoints {
    local: SocketAddr,
    peer: SocketAddr,
}

/// One bidirectional, length-framed TCP session.
pub struct Connection {
    peer_address: String,
    peer_port: u16,
    io_timeout: Duration,
    max_frame_bytes: usize,
    connected: AtomicBool,
    /// `true` whenever the connection is not usable; flipping it wakes blocked I/O.
    closed: watch::Sender<bool>,
    endpoints: std::sync::Mutex<Option<Endpoints>>,
    reader: Mutex<Option<FrameReader>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
}

impl Connection {
    /// Create an unconnected connection to `peer_address:peer_port`.
    ///
    /// # Example
    /// ```ignore
    /// let conn = Connection::new("127.0.0.1", 65432);
    /// conn.connect(Duration::from_secs(5)).await?;
    /// ```
    pub fn new(peer_address: impl Into<String>, peer_port: u16) -> Self {
        let (closed, _) = watch::channel(true);
        Self {
            peer_address: peer_address.into(),
            peer_port,
            io_timeout: DEFAULT_IO_TIMEOUT,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            connected: AtomicBool::new(false),
            closed,
            endpoints: std::sync::Mutex::new(None),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
        }
    }

    /// Wrap an already established stream (e.g. one returned by `accept`).
    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let endpoints = Endpoints {
            local: stream.local_addr()?,
            peer: stream.peer_addr()?,
        };
        let (read_half, write_half) = stream.into_split();
        let (closed, _) = watch::channel(false);

        Ok(Self {
            peer_address: endpoints.peer.ip().to_string(),
            peer_port: endpoints.peer.port(),
            io_timeout: DEFAULT_IO_TIMEOUT,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            connected: AtomicBool::new(true),
            closed,
            endpoints: std::sync::Mutex::new(Some(endpoints)),
            reader: Mutex::new(Some(FrameReader::new(read_half))),
            writer: Mutex::new(Some(write_half)),
        })
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// Largest payload this connection will send.
    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    pub fn peer_address(&self) -> &str {
        &self.peer_address
    }

    pub fn peer_port(&self) -> u16 {
        self.peer_port
    }

    /// "address:port" of the remote end, as configured.
    pub fn peer_target(&self) -> String {
        format!("{}:{}", self.peer_address, self.peer_port)
    }

    pub fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Local socket address of the most recent session.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.endpoints().map(|e| e.local)
    }

    /// Resolved remote socket address of the most recent session.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.endpoints().map(|e| e.peer)
    }

    fn endpoints(&self) -> Option<Endpoints> {
        *self
            .endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the transport to the configured peer.
    ///
    /// Fails with [`ConnectionError::Refused`] if the peer is unreachable and
    /// [`ConnectionError::Timeout`] if the handshake does not finish in time.
    /// Connecting an already connected connection is a no-op.
    pub async fn connect(&self, timeout: Duration) -> Result<(), ConnectionError> {
        if self.is_connected() {
            return Ok(());
        }

        let target = self.peer_target();
        let stream = match time::timeout(timeout, TcpStream::connect(target.as_str())).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ConnectionError::Refused {
                    addr: target,
                    source,
                })
            }
            Err(_) => return Err(ConnectionError::Timeout(timeout)),
        };

        stream.set_nodelay(true)?;
        let endpoints = Endpoints {
            local: stream.local_addr()?,
            peer: stream.peer_addr()?,
        };
        let (read_half, write_half) = stream.into_split();

        *self.reader.lock().await = Some(FrameReader::new(read_half));
        *self.writer.lock().await = Some(write_half);
        *self
            .endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(endpoints);
        self.closed.send_replace(false);
        self.connected.store(true, Ordering::SeqCst);

        debug!("🔗 Connected to {} from {}", target, endpoints.local);
        Ok(())
    }

    /// Write `payload` as one frame.
    pub async fn send(&self, payload: &[u8], timeout: Duration) -> Result<(), ConnectionError> {
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected);
        }

        let frame = encode_frame(payload, self.max_frame_bytes)?;

        let outcome = tokio::select! {
            biased;
            _ = self.closed_signal() => return Err(ConnectionError::NotConnected),
            outcome = time::timeout(timeout, self.write_frame(&frame)) => outcome,
        };

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                self.close().await;
                Err(err)
            }
            Err(_) => {
                self.close().await;
                Err(ConnectionError::Timeout(timeout))
            }
        }
    }

    async fn write_frame(&self, frame: &[u8]) -> Result<(), ConnectionError> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(ConnectionError::NotConnected)?;
        writer.write_all(frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Wait for the next frame.
    ///
    /// # Returns
    /// - `Ok(Some(payload))`: one complete frame
    /// - `Ok(None)`: the peer closed the connection
    /// - `Err(Timeout)`: nothing complete arrived within `timeout`; the
    ///   connection stays usable
    /// - `Err(NotConnected)`: the connection is (or was concurrently) closed
    pub async fn receive(
        &self,
        max_bytes: usize,
        timeout: Duration,
    ) -> Result<Option<Bytes>, ConnectionError> {
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected);
        }

        tokio::select! {
            biased;
            _ = self.closed_signal() => Err(ConnectionError::NotConnected),
            outcome = time::timeout(timeout, self.read_frame(max_bytes)) => match outcome {
                Ok(result) => result,
                Err(_) => Err(ConnectionError::Timeout(timeout)),
            },
        }
    }

    async fn read_frame(&self, max_bytes: usize) -> Result<Option<Bytes>, ConnectionError> {
        let mut reader = self.reader.lock().await;
        let reader = reader.as_mut().ok_or(ConnectionError::NotConnected)?;
        reader.next_frame(max_bytes).await
    }

    /// Resolves once the connection is closed, including a close that already
    /// happened before the call.
    fn closed_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut closed = self.closed.subscribe();
        async move {
            // A dropped sender also means closed.
            let _ = closed.wait_for(|closed| *closed).await;
        }
    }

    /// Close the connection. Safe to call repeatedly and from any task.
    pub async fn close(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        self.closed.send_replace(true);

        // Blocked receive/send calls have been woken and release these locks.
        let reader = self.reader.lock().await.take();
        let writer = self.writer.lock().await.take();
        drop(reader);

        if let Some(mut writer) = writer {
            if let Ok(Err(err)) = time::timeout(CLOSE_GRACE, writer.shutdown()).await {
                debug!("Shutdown of {} reported: {}", self.peer_target(), err);
            }
        }

        debug!("🔌 Connection to {} closed", self.peer_target());
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer_target())
            .field("connected", &self.is_connected())
            .field("io_timeout", &self.io_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    const SHORT: Duration = Duration::from_millis(200);
    const LONG: Duration = Duration::from_secs(5);

    async fn connected_pair() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let conn = Connection::new("127.0.0.1", port);
        let (connected, accepted) = tokio::join!(conn.connect(LONG), listener.accept());
        connected.unwrap();
        (conn, accepted.unwrap().0)
    }

    #[tokio::test]
    async fn io_requires_a_connection() {
        let conn = Connection::new("127.0.0.1", 9);
        assert!(!conn.is_connected());
        assert!(matches!(
            conn.send(b"{}", SHORT).await,
            Err(ConnectionError::NotConnected)
        ));
        assert!(matches!(
            conn.receive(1024, SHORT).await,
            Err(ConnectionError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn connect_to_closed_port_is_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let conn = Connection::new("127.0.0.1", port);
        let err = conn.connect(LONG).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Refused { .. }), "got {err:?}");
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let (conn, stream) = connected_pair().await;
        let server = Connection::from_stream(stream).unwrap();

        conn.send(b"{\"hello\":1}", LONG).await.unwrap();
        let got = server.receive(1024, LONG).await.unwrap().unwrap();
        assert_eq!(&got[..], b"{\"hello\":1}");

        server.send(b"[]", LONG).await.unwrap();
        let got = conn.receive(1024, LONG).await.unwrap().unwrap();
        assert_eq!(&got[..], b"[]");

        assert_eq!(server.peer_addr(), conn.local_addr());
    }

    #[tokio::test]
    async fn peer_close_is_not_an_error() {
        let (conn, stream) = connected_pair().await;
        drop(stream);
        assert!(conn.receive(1024, LONG).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn timeout_keeps_partial_frame() {
        let (conn, mut stream) = connected_pair().await;
        let frame = encode_frame(b"{\"slow\":true}", DEFAULT_MAX_FRAME_BYTES).unwrap();

        stream.write_all(&frame[..6]).await.unwrap();
        let err = conn.receive(1024, SHORT).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(conn.is_connected());

        stream.write_all(&frame[6..]).await.unwrap();
        let got = conn.receive(1024, LONG).await.unwrap().unwrap();
        assert_eq!(&got[..], b"{\"slow\":true}");
    }

    #[tokio::test]
    async fn oversized_incoming_frame_is_rejected() {
        let (conn, mut stream) = connected_pair().await;
        stream
            .write_all(&encode_frame(&[b'x'; 64], DEFAULT_MAX_FRAME_BYTES).unwrap())
            .await
            .unwrap();
        let err = conn.receive(16, LONG).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Frame(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn close_wakes_blocked_receive() {
        let (conn, _stream) = connected_pair().await;
        let conn = Arc::new(conn);

        let reader = Arc::clone(&conn);
        let blocked = tokio::spawn(async move { reader.receive(1024, LONG).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        conn.close().await;
        let outcome = tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("receive should wake up")
            .unwrap();
        assert!(matches!(outcome, Err(ConnectionError::NotConnected)));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_concurrent_safe() {
        let (conn, mut stream) = connected_pair().await;
        let conn = Arc::new(conn);

        let closers: Vec<_> = (0..4)
            .map(|_| {
                let conn = Arc::clone(&conn);
                tokio::spawn(async move { conn.close().await })
            })
            .collect();
        for closer in closers {
            closer.await.unwrap();
        }
        conn.close().await;

        assert!(!conn.is_connected());
        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reconnect_after_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let conn = Connection::new("127.0.0.1", port);

        conn.connect(LONG).await.unwrap();
        let (_first, _) = listener.accept().await.unwrap();
        conn.close().await;

        conn.connect(LONG).await.unwrap();
        let (second, _) = listener.accept().await.unwrap();
        let server = Connection::from_stream(second).unwrap();
        conn.send(b"1", LONG).await.unwrap();
        assert_eq!(&server.receive(8, LONG).await.unwrap().unwrap()[..], b"1");
    }
}
