//! # Server Binary Entry Point
//!
//! Runs an echo or relay server until Ctrl-C.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin jsonwire-server -- --config config/relay.toml
//! cargo run --bin jsonwire-server -- --address 0.0.0.0 --port 65432 --relay
//! ```
//!
//! On shutdown the final metrics snapshot is logged as JSON.

use anyhow::{anyhow, Context};
use clap::Parser;
use log::{info, LevelFilter};

use jsonwire::common::config::ServerConfig;
use jsonwire::common::logging::init_logger;
use jsonwire::server::Server;

/// Command-line arguments for the server binary
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a server configuration file (TOML format)
    ///
    /// Example: config/server.toml. Overrides the address flags below.
    #[arg(short, long)]
    config: Option<String>,

    #[arg(short, long, default_value = "127.0.0.1")]
    address: String,

    #[arg(short, long, default_value_t = 65432)]
    port: u16,

    /// Cap on simultaneously served clients
    #[arg(long)]
    max_clients: Option<u32>,

    /// Broadcast every message to the other clients
    #[arg(long)]
    relay: bool,

    /// off, error, warn, info, debug or trace
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn server_config(&self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::new(self.address.clone(), self.port),
        };
        if let Some(max_clients) = self.max_clients {
            config = config.with_max_concurrent_clients(max_clients);
        }
        if self.relay {
            config = config.with_relay_mode(true);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level: LevelFilter = args
        .log_level
        .parse()
        .map_err(|_| anyhow!("unknown log level '{}'", args.log_level))?;
    init_logger(level);

    let server = Server::new(args.server_config()?);

    let outcome = tokio::select! {
        result = server.start(false) => result.context("server failed"),
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Ctrl-C received, shutting down");
            Ok(())
        }
    };

    server.stop().await;
    info!("📊 Final metrics: {}", serde_json::to_string(&server.metrics())?);

    outcome
}
