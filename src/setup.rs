//! # Setup Helpers
//!
//! One-call constructors for the common case: a server already accepting in the
//! background, or a client already connected.

use std::time::Duration;

use log::info;

use crate::client::Client;
use crate::common::config::{ClientConfig, ServerConfig};
use crate::common::error::{ConnectionError, ServerError};
use crate::server::Server;

/// Connect timeout used by [`setup_client`].
pub const SETUP_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Build a server for `config` (relay or echo per `relay_mode`) and start it
/// in the background.
///
/// On success the returned server is bound, listening and accepting.
pub async fn setup_server(config: ServerConfig) -> Result<Server, ServerError> {
    let server = Server::new(config);
    server.start(true).await?;
    if let Some(addr) = server.local_addr() {
        info!("✅ {} server ready on {}", server.mode(), addr);
    }
    Ok(server)
}

/// Build a client for `config` and connect it within [`SETUP_CONNECT_TIMEOUT`].
///
/// No client is returned unless the connect succeeded.
pub async fn setup_client(config: ClientConfig) -> Result<Client, ConnectionError> {
    let mut client = Client::new(config);
    client.connect(SETUP_CONNECT_TIMEOUT).await?;
    Ok(client)
}
