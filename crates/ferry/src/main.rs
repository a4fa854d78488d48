//! ferry — LAN file transfer through a pairing broker.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use ferry::receiver::{self, ReceiveOptions};
use ferry::sender;
use ferry_core::discovery::DEFAULT_DISCOVERY_PORT;

/// Send a file under a short code phrase, or receive one by presenting
/// that phrase. The broker is found automatically on the local network
/// unless --broker is given.
#[derive(Parser, Debug)]
#[command(name = "ferry", version, about)]
struct Args {
    /// File to send.
    #[arg(long, value_name = "PATH", conflicts_with = "receive")]
    send: Option<PathBuf>,

    /// Code phrase of a transfer to receive.
    #[arg(long, value_name = "CODE")]
    receive: Option<String>,

    /// Broker address (host:port), skipping discovery.
    #[arg(long, value_name = "ADDR")]
    broker: Option<String>,

    /// Output path for the received file (default: the advertised name).
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Accept the offered file without prompting.
    #[arg(long)]
    yes: bool,

    /// UDP port probed during discovery.
    #[arg(long, default_value_t = DEFAULT_DISCOVERY_PORT)]
    discovery_port: u16,
}

/// How long discovery waits for a broker to answer.
const DISCOVERY_WAIT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity, e.g. RUST_LOG=debug ferry --send f
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    match (args.send, args.receive) {
        (Some(path), None) => {
            sender::send_file(&path, args.broker, args.discovery_port, DISCOVERY_WAIT).await
        }
        (None, Some(code)) => {
            receiver::receive_file(
                &code,
                ReceiveOptions {
                    broker: args.broker,
                    output: args.output,
                    assume_yes: args.yes,
                    discovery_port: args.discovery_port,
                    discovery_wait: DISCOVERY_WAIT,
                },
            )
            .await
        }
        _ => anyhow::bail!("pass exactly one of --send <path> or --receive <code>; see --help"),
    }
}
