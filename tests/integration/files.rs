//! File-backed transfers: the sessions driving real files on disk.

use tokio::fs::File;

use ferry::session::{ReceiverSession, SenderSession};
use ferry_core::message::{CodePhrase, Message, MsgId, PayloadType, PostMetadata};

use crate::*;

#[tokio::test]
async fn file_to_file_transfer_is_bit_identical() {
    let broker = start_broker(4096).await;
    let dir = scratch_dir("roundtrip");

    let input = dir.join("input.bin");
    let payload: Vec<u8> = (0..50_000u32).map(|i| (i.wrapping_mul(31) % 256) as u8).collect();
    std::fs::write(&input, &payload).unwrap();

    let mut sender = connect(&broker).await;
    assert!(sender.send(pre("sonder-mettle-9c2", "input.bin", 50_000).to_message(MsgId::Send)).await);
    wait_until_registered(&broker, "sonder-mettle-9c2").await;

    let mut receiver = connect(&broker).await;
    let code = CodePhrase::new("sonder-mettle-9c2").unwrap();
    assert!(receiver.send(code.to_message(MsgId::Receive)).await);

    let mut start = recv_expect(&mut sender, MsgId::Accept).await;
    let post = PostMetadata::pop_from(&mut start).unwrap();
    assert_eq!(post.file_data.file_name, "input.bin");

    let output = dir.join("output.bin");
    let receiver_output = output.clone();
    let receiver_task = tokio::spawn(async move {
        let mut sink = File::create(&receiver_output).await.unwrap();
        let ok = ReceiverSession::new(PayloadType::File).run(&mut receiver, &mut sink).await;
        sink.sync_all().await.unwrap();
        (ok, receiver)
    });

    let mut source = File::open(&input).await.unwrap();
    let sent = SenderSession::new(PayloadType::File, post.max_chunk_size)
        .run(&mut sender, &mut source)
        .await;
    assert!(sent);

    let (ok, mut receiver) = receiver_task.await.unwrap();
    assert!(ok);
    assert_eq!(std::fs::read(&output).unwrap(), payload);

    assert!(receiver.send(Message::new(MsgId::FinishReceive)).await);
    receiver.flush().await;
    recv_expect(&mut sender, MsgId::Success).await;

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn empty_file_transfers_cleanly() {
    let broker = start_broker(512).await;
    let dir = scratch_dir("empty");

    let input = dir.join("empty.bin");
    std::fs::write(&input, b"").unwrap();

    let mut sender = connect(&broker).await;
    assert!(sender.send(pre("aglet-frivol-000", "empty.bin", 0).to_message(MsgId::Send)).await);
    wait_until_registered(&broker, "aglet-frivol-000").await;

    let mut receiver = connect(&broker).await;
    let code = CodePhrase::new("aglet-frivol-000").unwrap();
    assert!(receiver.send(code.to_message(MsgId::Receive)).await);
    recv_expect(&mut sender, MsgId::Accept).await;

    // A zero-length source sends no chunks, only the final marker.
    let mut source = File::open(&input).await.unwrap();
    let sent = SenderSession::new(PayloadType::File, 512).run(&mut sender, &mut source).await;
    assert!(sent);

    let output = dir.join("out.bin");
    let mut sink = File::create(&output).await.unwrap();
    let ok = ReceiverSession::new(PayloadType::File).run(&mut receiver, &mut sink).await;
    assert!(ok);
    assert_eq!(std::fs::read(&output).unwrap().len(), 0);

    assert!(receiver.send(Message::new(MsgId::FinishReceive)).await);
    receiver.flush().await;
    recv_expect(&mut sender, MsgId::Success).await;

    let _ = std::fs::remove_dir_all(&dir);
}
