//! Broker library — pairs senders and receivers by code phrase and
//! relays chunks between them. `ferryd` is a thin wrapper over
//! [`spawn`]; the integration suite drives the same entry point against
//! ephemeral ports.

pub mod broker;
pub mod discovery;
pub mod listener;

pub use broker::Broker;

use std::net::SocketAddr;

use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;

use ferry_core::config::FerryConfig;

/// Running broker: the bound addresses plus the task handles keeping it
/// alive. Dropping the handle aborts every task.
pub struct BrokerHandle {
    pub tcp_addr: SocketAddr,
    pub discovery_addr: SocketAddr,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl BrokerHandle {
    /// Wait for any broker task to exit. They run forever, so this only
    /// returns on a fatal error or panic.
    pub async fn join(mut self) {
        if self.tasks.is_empty() {
            return;
        }
        let tasks = std::mem::take(&mut self.tasks);
        let (result, _, rest) = futures::future::select_all(tasks).await;
        tracing::error!(?result, "broker task exited");
        for task in rest {
            task.abort();
        }
    }

    pub fn shutdown(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for BrokerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Bind the TCP and discovery sockets and start every broker task.
/// Port 0 in the config asks the OS for an ephemeral port; the handle
/// reports what was actually bound.
pub async fn spawn(config: &FerryConfig) -> std::io::Result<BrokerHandle> {
    let tcp = TcpListener::bind(("0.0.0.0", config.network.tcp_port)).await?;
    let tcp_addr = tcp.local_addr()?;

    let udp = UdpSocket::bind(("0.0.0.0", config.network.discovery_port)).await?;
    let discovery_addr = udp.local_addr()?;

    let (accepted_tx, accepted_rx) = mpsc::channel(16);
    let (events_tx, events_rx) = mpsc::channel(1024);

    let broker = Broker::new(config.transfer.max_chunk_size);
    let queue_depth = config.transfer.outbound_queue_depth;
    let tcp_port = tcp_addr.port();

    let tasks = vec![
        tokio::spawn(async move {
            broker.run(accepted_rx, events_rx).await;
        }),
        tokio::spawn(async move {
            if let Err(e) = listener::accept_loop(tcp, accepted_tx, events_tx, queue_depth).await {
                tracing::error!(error = %e, "accept loop failed");
            }
        }),
        tokio::spawn(async move {
            if let Err(e) = discovery::responder_loop(udp, tcp_port).await {
                tracing::error!(error = %e, "discovery responder failed");
            }
        }),
    ];

    Ok(BrokerHandle { tcp_addr, discovery_addr, tasks })
}
