//! Shared scaffolding: an ephemeral in-process broker and client helpers.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::timeout;

use ferry_broker::BrokerHandle;
use ferry_core::config::FerryConfig;
use ferry_core::message::{CodePhrase, FileData, Message, MsgId, PayloadType, PreMetadata};
use ferry_net::Client;

pub const RECV_DEADLINE: Duration = Duration::from_secs(5);

/// Broker on OS-assigned ports with the given chunk budget.
pub async fn start_broker(max_chunk_size: u64) -> BrokerHandle {
    let mut config = FerryConfig::default();
    config.network.tcp_port = 0;
    config.network.discovery_port = 0;
    config.transfer.max_chunk_size = max_chunk_size;
    ferry_broker::spawn(&config).await.expect("broker should bind")
}

/// The broker binds the wildcard address; tests dial loopback.
pub fn loopback(handle: &BrokerHandle) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], handle.tcp_addr.port()))
}

pub async fn connect(handle: &BrokerHandle) -> Client {
    Client::connect(loopback(handle)).await.expect("client should connect")
}

pub fn pre(code: &str, name: &str, size: u64) -> PreMetadata {
    PreMetadata {
        payload_type: PayloadType::File,
        code_phrase: CodePhrase::new(code).unwrap(),
        file_data: FileData::new(size, name).unwrap(),
    }
}

/// Receive with a deadline so a wedged broker fails the test instead of
/// hanging the suite.
pub async fn recv(client: &mut Client) -> Message {
    timeout(RECV_DEADLINE, client.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("connection closed while waiting for a message")
}

pub async fn recv_expect(client: &mut Client, want: MsgId) -> Message {
    let msg = recv(client).await;
    assert_eq!(msg.id, want, "unexpected message");
    msg
}

/// Fresh scratch directory under the system temp dir.
pub fn scratch_dir(tag: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("ferry-{tag}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).expect("scratch dir should be creatable");
    dir
}

/// Advertises carry no acknowledgement; synchronize by probing from a
/// throwaway connection until the code phrase is visible.
pub async fn wait_until_registered(handle: &BrokerHandle, code: &str) {
    let mut prober = connect(handle).await;
    loop {
        assert!(prober.send(pre(code, "", 0).to_message(MsgId::RequestReceive)).await);
        match recv(&mut prober).await.id {
            MsgId::Accept => return,
            MsgId::Reject => tokio::time::sleep(Duration::from_millis(5)).await,
            other => panic!("unexpected probe reply {other:?}"),
        }
    }
}
