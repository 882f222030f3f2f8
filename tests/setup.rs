// One-call setup helpers and configuration files.

mod common;

use std::io::Write;

use serde_json::json;

use common::{client_config, loopback, LONG};
use jsonwire::common::config::{ClientConfig, ServerConfig};
use jsonwire::common::error::{ConnectionError, ServerError};
use jsonwire::server::{ServerMode, ServerState};
use jsonwire::setup::{setup_client, setup_server};

#[tokio::test]
async fn setup_server_picks_the_mode_from_config() {
    let echo = setup_server(loopback()).await.unwrap();
    assert_eq!(echo.mode(), ServerMode::Echo);
    assert!(echo.local_addr().is_some());
    // Already accepting when the helper returns.
    assert_eq!(echo.state(), ServerState::Accepting);

    let relay = setup_server(loopback().with_relay_mode(true)).await.unwrap();
    assert_eq!(relay.mode(), ServerMode::Relay);

    echo.stop().await;
    relay.stop().await;
}

#[tokio::test]
async fn setup_client_returns_a_connected_client() {
    let server = setup_server(loopback()).await.unwrap();
    let mut client = setup_client(client_config(&server)).await.unwrap();

    assert!(client.is_connected());
    assert_eq!(client.connected_at().map(|(_, port)| port), server.local_addr().map(|a| a.port()));
    assert_eq!(client.send_as_json(&json!("hi"), LONG).await.unwrap(), json!("hi"));

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn setup_client_reports_a_refused_connection() {
    let port = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    };

    let err = setup_client(ClientConfig::new("127.0.0.1", port)).await.unwrap_err();
    assert!(matches!(err, ConnectionError::Refused { .. }), "got {err:?}");
}

#[tokio::test]
async fn setup_server_fails_on_an_occupied_port() {
    let running = setup_server(loopback()).await.unwrap();
    let port = running.local_addr().unwrap().port();

    let err = setup_server(ServerConfig::new("127.0.0.1", port)).await.unwrap_err();
    assert!(matches!(err, ServerError::Bind(_)), "got {err:?}");

    // The first server is untouched.
    assert_eq!(running.state(), ServerState::Accepting);
    let mut client = setup_client(client_config(&running)).await.unwrap();
    assert_eq!(client.send_as_json(&json!([1, 2]), LONG).await.unwrap(), json!([1, 2]));

    client.close().await;
    running.stop().await;
}

#[tokio::test]
async fn server_starts_from_a_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
bind_address = "127.0.0.1"
bind_port = 0
relay_mode = true
"#
    )
    .unwrap();

    let config = ServerConfig::from_file(file.path()).unwrap();
    assert_eq!(config.max_concurrent_clients, 5);

    let server = setup_server(config).await.unwrap();
    assert_eq!(server.mode(), ServerMode::Relay);
    server.stop().await;
}
