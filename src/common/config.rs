//! # Configuration
//!
//! Server and client settings, loadable from TOML files. Only the endpoint keys
//! are required; everything else falls back to a default.
//!
//! ```toml
//! # server.toml
//! bind_address = "127.0.0.1"
//! bind_port = 65432
//! max_concurrent_clients = 5
//! relay_mode = true
//! ```
//!
//! ```toml
//! # client.toml
//! remote_address = "127.0.0.1"
//! remote_port = 65432
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::codec::DEFAULT_MAX_FRAME_BYTES;

const DEFAULT_MAX_CONCURRENT_CLIENTS: u32 = 5;
const DEFAULT_IO_TIMEOUT_MS: u64 = 5_000;

/// Load a TOML configuration file and deserialize it into the specified type.
///
/// # Example
/// ```ignore
/// let config: ServerConfig = load_config("config/relay.toml")?;
/// ```
pub fn load_config<T>(path: impl AsRef<Path>) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: T = toml::from_str(&content)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Everything a [`Server`](crate::server::Server) needs to start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind (e.g. "127.0.0.1", "0.0.0.0", "localhost")
    pub bind_address: String,
    /// Port to bind; 0 lets the OS pick one
    pub bind_port: u16,
    /// Listen backlog and cap on simultaneously served clients
    #[serde(default = "default_max_concurrent_clients")]
    pub max_concurrent_clients: u32,
    /// Broadcast each message to the other clients instead of replying to the sender
    #[serde(default)]
    pub relay_mode: bool,
    /// Deadline for each socket write (milliseconds)
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    /// Close connections that stay silent this long; `None` keeps them open
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
    /// Largest accepted payload, in bytes
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl ServerConfig {
    pub fn new(bind_address: impl Into<String>, bind_port: u16) -> Self {
        Self {
            bind_address: bind_address.into(),
            bind_port,
            max_concurrent_clients: DEFAULT_MAX_CONCURRENT_CLIENTS,
            relay_mode: false,
            io_timeout_ms: DEFAULT_IO_TIMEOUT_MS,
            idle_timeout_secs: None,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        load_config(path)
    }

    pub fn with_max_concurrent_clients(mut self, max_concurrent_clients: u32) -> Self {
        self.max_concurrent_clients = max_concurrent_clients;
        self
    }

    pub fn with_relay_mode(mut self, relay_mode: bool) -> Self {
        self.relay_mode = relay_mode;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout_secs = timeout.map(|t| t.as_secs().max(1));
        self
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    /// "address:port" as handed to the resolver.
    pub fn bind_target(&self) -> String {
        format!("{}:{}", self.bind_address, self.bind_port)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_clients == 0 {
            return Err("max_concurrent_clients must be at least 1".to_string());
        }
        if self.io_timeout_ms == 0 {
            return Err("io_timeout_ms must be positive".to_string());
        }
        if self.max_frame_bytes == 0 {
            return Err("max_frame_bytes must be positive".to_string());
        }
        Ok(())
    }
}

/// Where a [`Client`](crate::client::Client) connects to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub remote_address: String,
    pub remote_port: u16,
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl ClientConfig {
    pub fn new(remote_address: impl Into<String>, remote_port: u16) -> Self {
        Self {
            remote_address: remote_address.into(),
            remote_port,
            io_timeout_ms: DEFAULT_IO_TIMEOUT_MS,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        load_config(path)
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

fn default_max_concurrent_clients() -> u32 {
    DEFAULT_MAX_CONCURRENT_CLIENTS
}

fn default_io_timeout_ms() -> u64 {
    DEFAULT_IO_TIMEOUT_MS
}

fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}
