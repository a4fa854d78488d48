//! UDP discovery responder.
//!
//! Clients probe the LAN with a fixed datagram; the broker answers with
//! its TCP port so the probe's source learns where to connect. Anything
//! that is not the probe is ignored.

use anyhow::Result;
use tokio::net::UdpSocket;

use ferry_core::discovery;

/// Answer discovery probes forever.
pub async fn responder_loop(socket: UdpSocket, tcp_port: u16) -> Result<()> {
    let local = socket.local_addr()?;
    tracing::info!(port = local.port(), tcp_port, "discovery responder listening");

    let mut buf = vec![0u8; 256];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                tracing::warn!(error = %e, "discovery recv failed");
                continue;
            }
        };

        if !discovery::is_probe(&buf[..len]) {
            tracing::trace!(peer = %peer, len, "ignoring non-probe datagram");
            continue;
        }

        let reply = discovery::reply_for_port(tcp_port);
        match socket.send_to(reply.as_bytes(), peer).await {
            Ok(_) => tracing::debug!(peer = %peer, "answered discovery probe"),
            Err(e) => tracing::warn!(peer = %peer, error = %e, "discovery reply failed"),
        }
    }
}
