//! # Client Binary Entry Point
//!
//! Talks to a jsonwire server from the command line.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin jsonwire-client -- --port 65432 send '{"movie": "Alien"}'
//! cargo run --bin jsonwire-client -- --config config/client.toml ping
//! cargo run --bin jsonwire-client -- --port 65432 listen --count 10
//! ```

use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use log::{info, LevelFilter};
use serde_json::Value;

use jsonwire::client::Client;
use jsonwire::common::config::ClientConfig;
use jsonwire::common::logging::init_logger;

/// Command-line arguments for the client binary
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a client configuration file (TOML format)
    ///
    /// Example: config/client.toml. Overrides the address flags below.
    #[arg(short, long)]
    config: Option<String>,

    #[arg(short, long, default_value = "127.0.0.1")]
    address: String,

    #[arg(short, long, default_value_t = 65432)]
    port: u16,

    /// Connect and request timeout in milliseconds
    #[arg(long, default_value_t = 5_000)]
    timeout_ms: u64,

    /// off, error, warn, info, debug or trace
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one JSON document and print the reply
    Send { json: String },
    /// Check that the server answers a ping
    Ping,
    /// Print messages relayed by the server
    Listen {
        /// Stop after this many messages
        #[arg(long)]
        count: Option<usize>,
        /// Give up after this long without a message
        #[arg(long, default_value_t = 300)]
        wait_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level: LevelFilter = args
        .log_level
        .parse()
        .map_err(|_| anyhow!("unknown log level '{}'", args.log_level))?;
    init_logger(level);

    let config = match &args.config {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::new(args.address.clone(), args.port),
    };
    let timeout = Duration::from_millis(args.timeout_ms);

    let mut client = Client::new(config);
    client.connect(timeout).await?;

    let outcome = run(&mut client, args.command, timeout).await;
    client.close().await;
    outcome
}

async fn run(client: &mut Client, command: Command, timeout: Duration) -> anyhow::Result<()> {
    match command {
        Command::Send { json } => {
            let value: Value = serde_json::from_str(&json).context("argument is not valid JSON")?;
            let reply = client.send_as_json(&value, timeout).await?;
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
        Command::Ping => {
            if !client.ping(timeout).await {
                bail!("no pong from server");
            }
            println!("pong");
        }
        Command::Listen { count, wait_secs } => {
            let wait = Duration::from_secs(wait_secs);
            let mut received = 0usize;
            while count.map_or(true, |limit| received < limit) {
                let message = client.receive_json(wait).await?;
                println!("{}", message);
                received += 1;
            }
            info!("📬 Received {} message(s)", received);
        }
    }
    Ok(())
}
