//! Transfer scenarios: the full wire trace, the session-level round
//! trip, and every mid-stream failure the broker polices.

use std::io::Cursor;
use std::time::Duration;

use ferry::session::{ReceiverSession, SenderSession};
use ferry_core::digest::{sha256_chunk, DIGEST_LEN};
use ferry_core::message::{chunk_message, CodePhrase, Message, MsgId, PayloadType, PostMetadata};

use crate::*;

#[tokio::test]
async fn happy_path_wire_trace() {
    let broker = start_broker(512).await;
    let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();

    // Sender advertises a 1000-byte file under "abc".
    let mut sender = connect(&broker).await;
    assert!(sender.send(pre("abc", "t", 1000).to_message(MsgId::Send)).await);
    wait_until_registered(&broker, "abc").await;

    // Receiver probes the code phrase and gets the manifest.
    let mut receiver = connect(&broker).await;
    assert!(receiver.send(pre("abc", "", 0).to_message(MsgId::RequestReceive)).await);
    let mut offer = recv_expect(&mut receiver, MsgId::Accept).await;
    let post = PostMetadata::pop_from(&mut offer).unwrap();
    assert_eq!(post.max_chunk_size, 512);
    assert_eq!(post.code_phrase.code, "abc");
    assert_eq!(post.file_data.file_name, "t");
    assert_eq!(post.file_data.file_size, 1000);

    // Receiver commits; the broker's Accept to the sender starts the stream.
    assert!(receiver.send(CodePhrase::new("abc").unwrap().to_message(MsgId::Receive)).await);
    let mut start = recv_expect(&mut sender, MsgId::Accept).await;
    let start_post = PostMetadata::pop_from(&mut start).unwrap();
    assert_eq!(start_post.max_chunk_size, 512);

    // 1000 bytes at 512 per chunk: one full chunk, one 488-byte tail.
    assert!(sender.send(chunk_message(&payload[..512])).await);
    assert!(sender.send(chunk_message(&payload[512..])).await);
    assert!(sender.send(Message::new(MsgId::FinalChunk)).await);

    let first = recv_expect(&mut receiver, MsgId::Chunk).await;
    assert_eq!(first.body.len(), 512 + DIGEST_LEN);
    let second = recv_expect(&mut receiver, MsgId::Chunk).await;
    assert_eq!(second.body.len(), 488 + DIGEST_LEN);
    recv_expect(&mut receiver, MsgId::FinalChunk).await;

    // Reassemble and verify bit-identical payloads.
    let mut out = Vec::new();
    for msg in [first, second] {
        let (data, claimed) = ferry_core::message::split_chunk(msg).unwrap();
        assert_eq!(sha256_chunk(&data), claimed);
        out.extend_from_slice(&data);
    }
    assert_eq!(out, payload);

    assert!(receiver.send(Message::new(MsgId::FinishReceive)).await);
    recv_expect(&mut sender, MsgId::Success).await;
}

#[tokio::test]
async fn sessions_round_trip_a_file() {
    let broker = start_broker(512).await;
    let payload: Vec<u8> = (0..10_000u32).map(|i| (i * 7 % 256) as u8).collect();

    let mut sender = connect(&broker).await;
    assert!(sender.send(pre("kismet-aglet-0aa", "blob.bin", 10_000).to_message(MsgId::Send)).await);
    wait_until_registered(&broker, "kismet-aglet-0aa").await;

    let mut receiver = connect(&broker).await;
    let code = CodePhrase::new("kismet-aglet-0aa").unwrap();
    assert!(receiver.send(code.to_message(MsgId::Receive)).await);

    let mut start = recv_expect(&mut sender, MsgId::Accept).await;
    let post = PostMetadata::pop_from(&mut start).unwrap();

    let receiver_task = tokio::spawn(async move {
        let mut sink = Vec::new();
        let ok = ReceiverSession::new(PayloadType::File).run(&mut receiver, &mut sink).await;
        (ok, sink, receiver)
    });

    let mut source = Cursor::new(payload.clone());
    let sent = SenderSession::new(PayloadType::File, post.max_chunk_size)
        .run(&mut sender, &mut source)
        .await;
    assert!(sent, "sender session should complete");

    let (ok, sink, mut receiver) = receiver_task.await.unwrap();
    assert!(ok, "receiver session should complete");
    assert_eq!(sink, payload);

    assert!(receiver.send(Message::new(MsgId::FinishReceive)).await);
    receiver.flush().await;
    recv_expect(&mut sender, MsgId::Success).await;
}

#[tokio::test]
async fn duplicate_code_rejects_the_second_sender() {
    let broker = start_broker(512).await;

    let mut first = connect(&broker).await;
    assert!(first.send(pre("abc", "one", 10).to_message(MsgId::Send)).await);
    wait_until_registered(&broker, "abc").await;

    let mut second = connect(&broker).await;
    assert!(second.send(pre("abc", "two", 20).to_message(MsgId::Send)).await);
    recv_expect(&mut second, MsgId::Reject).await;

    // The first sender still owns the code phrase.
    let mut prober = connect(&broker).await;
    assert!(prober.send(pre("abc", "", 0).to_message(MsgId::RequestReceive)).await);
    let mut offer = recv_expect(&mut prober, MsgId::Accept).await;
    let post = PostMetadata::pop_from(&mut offer).unwrap();
    assert_eq!(post.file_data.file_name, "one");
}

#[tokio::test]
async fn unknown_code_is_rejected_then_aborted() {
    let broker = start_broker(512).await;
    let mut receiver = connect(&broker).await;

    assert!(receiver.send(pre("nope", "", 0).to_message(MsgId::RequestReceive)).await);
    recv_expect(&mut receiver, MsgId::Reject).await;

    assert!(receiver.send(CodePhrase::new("nope").unwrap().to_message(MsgId::Receive)).await);
    recv_expect(&mut receiver, MsgId::Abort).await;
}

#[tokio::test]
async fn oversize_chunk_aborts_both_sides() {
    let broker = start_broker(512).await;

    let mut sender = connect(&broker).await;
    assert!(sender.send(pre("abc", "t", 2048).to_message(MsgId::Send)).await);
    wait_until_registered(&broker, "abc").await;

    let mut receiver = connect(&broker).await;
    assert!(receiver.send(CodePhrase::new("abc").unwrap().to_message(MsgId::Receive)).await);
    recv_expect(&mut sender, MsgId::Accept).await;

    // 1 KiB body against a 512-byte budget.
    assert!(sender.send(chunk_message(&vec![0u8; 1024])).await);

    recv_expect(&mut receiver, MsgId::Abort).await;
    recv_expect(&mut sender, MsgId::Abort).await;

    // The sender's wait loop maps that Abort to failure; nothing else
    // arrives afterwards.
    assert_eq!(sender.recv_timeout(Duration::from_millis(100)).await, None);
}

#[tokio::test]
async fn chunk_at_exactly_the_bound_is_relayed() {
    let broker = start_broker(512).await;

    let mut sender = connect(&broker).await;
    assert!(sender.send(pre("abc", "t", 512).to_message(MsgId::Send)).await);
    wait_until_registered(&broker, "abc").await;

    let mut receiver = connect(&broker).await;
    assert!(receiver.send(CodePhrase::new("abc").unwrap().to_message(MsgId::Receive)).await);
    recv_expect(&mut sender, MsgId::Accept).await;

    // body == max_chunk_size + digest: right on the limit, not over it.
    assert!(sender.send(chunk_message(&vec![0xA5u8; 512])).await);
    let relayed = recv_expect(&mut receiver, MsgId::Chunk).await;
    assert_eq!(relayed.body.len(), 512 + DIGEST_LEN);
}

#[tokio::test]
async fn long_chunk_stream_arrives_in_emission_order() {
    let broker = start_broker(512).await;

    let mut sender = connect(&broker).await;
    assert!(sender.send(pre("abc", "t", 15_000).to_message(MsgId::Send)).await);
    wait_until_registered(&broker, "abc").await;

    let mut receiver = connect(&broker).await;
    assert!(receiver.send(CodePhrase::new("abc").unwrap().to_message(MsgId::Receive)).await);
    recv_expect(&mut sender, MsgId::Accept).await;

    const CHUNKS: u8 = 150;
    let receiver_task = tokio::spawn(async move {
        let mut seen = Vec::new();
        loop {
            let msg = recv(&mut receiver).await;
            match msg.id {
                MsgId::Chunk => {
                    let (data, _) = ferry_core::message::split_chunk(msg).unwrap();
                    seen.push(data[0]);
                }
                MsgId::FinalChunk => return seen,
                other => panic!("unexpected message {other:?}"),
            }
        }
    });

    for i in 0..CHUNKS {
        assert!(sender.send(chunk_message(&[i; 100])).await);
    }
    assert!(sender.send(Message::new(MsgId::FinalChunk)).await);

    let seen = receiver_task.await.unwrap();
    let expected: Vec<u8> = (0..CHUNKS).collect();
    assert_eq!(seen, expected, "relay must preserve emission order");
}

#[tokio::test]
async fn code_phrase_is_free_again_after_completion() {
    let broker = start_broker(512).await;

    let mut sender = connect(&broker).await;
    assert!(sender.send(pre("abc", "t", 3).to_message(MsgId::Send)).await);
    wait_until_registered(&broker, "abc").await;

    let mut receiver = connect(&broker).await;
    assert!(receiver.send(CodePhrase::new("abc").unwrap().to_message(MsgId::Receive)).await);
    recv_expect(&mut sender, MsgId::Accept).await;

    assert!(sender.send(chunk_message(b"abc")).await);
    assert!(sender.send(Message::new(MsgId::FinalChunk)).await);
    recv_expect(&mut receiver, MsgId::Chunk).await;
    recv_expect(&mut receiver, MsgId::FinalChunk).await;
    assert!(receiver.send(Message::new(MsgId::FinishReceive)).await);
    recv_expect(&mut sender, MsgId::Success).await;

    // A new sender can register the same phrase now.
    let mut next = connect(&broker).await;
    assert!(next.send(pre("abc", "again", 1).to_message(MsgId::Send)).await);
    wait_until_registered(&broker, "abc").await;
}

#[tokio::test]
async fn probing_does_not_commit_the_receiver() {
    let broker = start_broker(512).await;

    let mut sender = connect(&broker).await;
    assert!(sender.send(pre("abc", "t", 5).to_message(MsgId::Send)).await);
    wait_until_registered(&broker, "abc").await;

    // One receiver probes and walks away; the offer stays claimable.
    let mut undecided = connect(&broker).await;
    assert!(undecided.send(pre("abc", "", 0).to_message(MsgId::RequestReceive)).await);
    recv_expect(&mut undecided, MsgId::Accept).await;
    drop(undecided);

    let mut committed = connect(&broker).await;
    assert!(committed.send(CodePhrase::new("abc").unwrap().to_message(MsgId::Receive)).await);
    recv_expect(&mut sender, MsgId::Accept).await;
}

#[tokio::test]
async fn second_claim_on_an_active_relay_is_aborted() {
    let broker = start_broker(512).await;

    let mut sender = connect(&broker).await;
    assert!(sender.send(pre("abc", "t", 5).to_message(MsgId::Send)).await);
    wait_until_registered(&broker, "abc").await;

    let mut receiver = connect(&broker).await;
    assert!(receiver.send(CodePhrase::new("abc").unwrap().to_message(MsgId::Receive)).await);
    recv_expect(&mut sender, MsgId::Accept).await;

    // Relays are one-to-one; a latecomer cannot join.
    let mut latecomer = connect(&broker).await;
    assert!(latecomer.send(CodePhrase::new("abc").unwrap().to_message(MsgId::Receive)).await);
    recv_expect(&mut latecomer, MsgId::Abort).await;
}

#[tokio::test]
async fn corrupted_chunk_fails_the_receiver_and_aborts_the_sender() {
    let broker = start_broker(512).await;

    let mut sender = connect(&broker).await;
    assert!(sender.send(pre("abc", "t", 100).to_message(MsgId::Send)).await);
    wait_until_registered(&broker, "abc").await;

    let mut receiver = connect(&broker).await;
    assert!(receiver.send(CodePhrase::new("abc").unwrap().to_message(MsgId::Receive)).await);
    recv_expect(&mut sender, MsgId::Accept).await;

    // Flip one bit of the digest trailer.
    let mut tampered = chunk_message(b"the quick brown fox");
    let last = tampered.body.len() - 1;
    tampered.body[last] ^= 0x01;
    assert!(sender.send(tampered).await);

    let mut sink = Vec::new();
    let ok = ReceiverSession::new(PayloadType::File).run(&mut receiver, &mut sink).await;
    assert!(!ok, "digest mismatch must fail the session");
    assert!(sink.is_empty(), "no corrupt bytes may reach the sink");

    // The session's FailedReceive makes the broker abort the sender.
    recv_expect(&mut sender, MsgId::Abort).await;
}
