//! TCP accept loop — validates peers before the broker ever sees them.
//!
//! Each accepted socket gets its own task for the validation exchange so
//! a half-open peer cannot stall the acceptor. Only validated streams are
//! promoted to framed connections and handed to the dispatch loop.

use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use ferry_net::validate::validate_inbound;
use ferry_net::{ConnEvent, ConnId, Connection};

/// First connection id handed out; ids only grow from here.
const FIRST_CONN_ID: ConnId = 10_000;

/// How long a peer gets to answer the validation nonce.
const VALIDATION_DEADLINE: Duration = Duration::from_secs(5);

/// Accept forever. Validated connections go to `accepted`; their traffic
/// lands on `events`.
pub async fn accept_loop(
    listener: TcpListener,
    accepted: mpsc::Sender<Connection>,
    events: mpsc::Sender<(ConnId, ConnEvent)>,
    queue_depth: usize,
) -> Result<()> {
    let mut next_id = FIRST_CONN_ID;

    tracing::info!(addr = %listener.local_addr()?, "broker listening");

    loop {
        let (mut stream, peer_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };

        let id = next_id;
        next_id = next_id.wrapping_add(1);
        tracing::debug!(conn = id, peer = %peer_addr, "new connection");

        let accepted = accepted.clone();
        let events = events.clone();
        tokio::spawn(async move {
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(conn = id, error = %e, "set_nodelay failed");
            }

            match timeout(VALIDATION_DEADLINE, validate_inbound(&mut stream)).await {
                Ok(Ok(())) => {
                    tracing::info!(conn = id, peer = %peer_addr, "peer validated");
                    let conn = Connection::spawn(id, stream, queue_depth, events);
                    if accepted.send(conn).await.is_err() {
                        tracing::warn!(conn = id, "broker gone, dropping connection");
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(conn = id, peer = %peer_addr, error = %e, "validation failed");
                }
                Err(_) => {
                    tracing::warn!(conn = id, peer = %peer_addr, "validation timed out");
                }
            }
        });
    }
}
