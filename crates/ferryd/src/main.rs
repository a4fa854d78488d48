//! ferryd — the Ferry pairing broker.
//!
//! Holds no file data: senders advertise a code phrase, receivers claim
//! it, and chunks are relayed connection-to-connection.

use anyhow::{Context, Result};
use clap::Parser;

use ferry_core::config::FerryConfig;

/// LAN file-transfer broker: pairs senders and receivers by code phrase
/// and relays their chunks.
#[derive(Parser, Debug)]
#[command(name = "ferryd", version, about)]
struct Args {
    /// TCP port to listen on (overrides config).
    #[arg(long)]
    port: Option<u16>,

    /// UDP discovery port (overrides config).
    #[arg(long)]
    discovery_port: Option<u16>,

    /// Largest chunk body relayed, in bytes (overrides config).
    #[arg(long)]
    max_chunk_size: Option<u64>,

    /// Write a default config file if none exists, print its path, exit.
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity, e.g. RUST_LOG=debug ferryd
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if args.init_config {
        let path = FerryConfig::write_default_if_missing()
            .context("failed to write default configuration")?;
        println!("{}", path.display());
        return Ok(());
    }

    let mut config = FerryConfig::load().context("failed to load configuration")?;
    if let Some(port) = args.port {
        config.network.tcp_port = port;
    }
    if let Some(port) = args.discovery_port {
        config.network.discovery_port = port;
    }
    if let Some(size) = args.max_chunk_size {
        config.transfer.max_chunk_size = size;
    }

    tracing::info!(
        tcp_port = config.network.tcp_port,
        discovery_port = config.network.discovery_port,
        max_chunk_size = config.transfer.max_chunk_size,
        "ferryd starting"
    );

    let handle = ferry_broker::spawn(&config)
        .await
        .context("failed to bind broker sockets")?;

    // Runs until a task dies or the process is killed.
    handle.join().await;
    Ok(())
}
