// Shared helpers for the loopback integration tests.
#![allow(dead_code)]

use std::time::Duration;

use jsonwire::client::Client;
use jsonwire::common::config::{ClientConfig, ServerConfig};
use jsonwire::server::Server;

pub const SHORT: Duration = Duration::from_millis(300);
pub const LONG: Duration = Duration::from_secs(5);

/// Server config on an OS-assigned loopback port.
pub fn loopback() -> ServerConfig {
    ServerConfig::new("127.0.0.1", 0)
}

/// Client config pointing at a started server.
pub fn client_config(server: &Server) -> ClientConfig {
    let addr = server.local_addr().expect("server is not listening");
    ClientConfig::new("127.0.0.1", addr.port())
}

pub async fn connect(server: &Server) -> Client {
    let mut client = Client::new(client_config(server));
    client.connect(LONG).await.expect("connect failed");
    client
}

/// Registration happens on the server's accept task, after the client's
/// connect has already returned. Poll until the registry has `count` peers.
pub async fn wait_for_peers(server: &Server, count: usize) {
    for _ in 0..100 {
        if server.connected_peers().await.len() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "expected {} registered peers, found {}",
        count,
        server.connected_peers().await.len()
    );
}
