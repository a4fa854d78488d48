//! Discovery scenarios against the real UDP responder.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

use ferry_core::discovery::{parse_reply, PROBE};

use crate::*;

#[tokio::test]
async fn responder_advertises_the_tcp_port() {
    let broker = start_broker(512).await;
    let dest = SocketAddr::from(([127, 0, 0, 1], broker.discovery_addr.port()));

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.send_to(PROBE, dest).await.unwrap();

    let mut buf = [0u8; 256];
    let (len, from) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("responder should answer")
        .unwrap();

    assert_eq!(from.port(), broker.discovery_addr.port());
    assert_eq!(parse_reply(&buf[..len]), Some(broker.tcp_addr.port()));
}

#[tokio::test]
async fn non_probe_datagrams_are_ignored() {
    let broker = start_broker(512).await;
    let dest = SocketAddr::from(([127, 0, 0, 1], broker.discovery_addr.port()));

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.send_to(b"who goes there", dest).await.unwrap();

    let mut buf = [0u8; 256];
    let answered = timeout(Duration::from_millis(300), socket.recv_from(&mut buf)).await;
    assert!(answered.is_err(), "junk datagrams must draw no reply");

    // The responder is still alive for real probes afterwards.
    socket.send_to(PROBE, dest).await.unwrap();
    let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("responder should answer")
        .unwrap();
    assert_eq!(parse_reply(&buf[..len]), Some(broker.tcp_addr.port()));
}
