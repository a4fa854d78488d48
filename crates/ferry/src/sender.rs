//! Send routine: advertise a file under a fresh code phrase, wait for a
//! receiver to claim it, stream the chunks, then wait for the verdict.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::fs::File;

use ferry_core::message::{CodePhrase, FileData, MsgId, PayloadType, PostMetadata, PreMetadata};
use ferry_core::phrase;
use ferry_net::Client;

use crate::discovery;
use crate::session::SenderSession;

/// Words per generated code phrase.
const PHRASE_WORDS: usize = 2;

/// Poll granularity while waiting for the broker's verdict.
const VERDICT_POLL: Duration = Duration::from_millis(50);

pub async fn send_file(
    path: &Path,
    broker: Option<String>,
    discovery_port: u16,
    discovery_wait: Duration,
) -> Result<()> {
    // Touch the file before anything goes on the wire: a missing source
    // must fail locally, with no advertise left behind on the broker.
    let metadata = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;
    anyhow::ensure!(metadata.is_file(), "{} is not a regular file", path.display());

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("unnamed")
        .to_string();
    let file_size = metadata.len();

    let addr = discovery::resolve(broker, discovery_port, discovery_wait).await?;
    let mut client = Client::connect(addr)
        .await
        .with_context(|| format!("failed to connect to broker at {addr}"))?;
    tracing::info!(broker = %addr, "connected and validated");

    let code = phrase::random_phrase(PHRASE_WORDS);
    let pre = PreMetadata {
        payload_type: PayloadType::File,
        code_phrase: CodePhrase::new(code.clone())?,
        file_data: FileData::new(file_size, file_name.clone())?,
    };
    anyhow::ensure!(
        client.send(pre.to_message(MsgId::Send)).await,
        "connection lost before the advertise went out"
    );

    println!("Share this code phrase with the receiver: {code}");
    tracing::info!(code = %code, file = %file_name, size = file_size, "advertised, waiting for a receiver");

    // The Accept carrying the manifest doubles as the start signal.
    let post = wait_for_claim(&mut client).await?;
    tracing::info!(max_chunk_size = post.max_chunk_size, "receiver claimed the transfer");

    let mut source = File::open(path)
        .await
        .with_context(|| format!("cannot open {}", path.display()))?;
    let session = SenderSession::new(PayloadType::File, post.max_chunk_size);
    let streamed = session.run(&mut client, &mut source).await;
    if !streamed {
        client.flush().await;
        anyhow::bail!("transfer aborted mid-stream");
    }

    wait_for_verdict(&mut client).await?;
    println!("Transfer complete.");
    Ok(())
}

async fn wait_for_claim(client: &mut Client) -> Result<PostMetadata> {
    loop {
        let Some(mut msg) = client.recv().await else {
            anyhow::bail!("broker connection closed while waiting for a receiver");
        };
        match msg.id {
            MsgId::Accept => return Ok(PostMetadata::pop_from(&mut msg)?),
            MsgId::Reject => anyhow::bail!("broker rejected the advertise (code phrase in use?)"),
            MsgId::Abort => anyhow::bail!("broker aborted before the transfer started"),
            other => tracing::debug!(msg = ?other, "ignoring message while waiting for a claim"),
        }
    }
}

/// Only `Success` is a positive completion signal.
async fn wait_for_verdict(client: &mut Client) -> Result<()> {
    loop {
        match client.recv_timeout(VERDICT_POLL).await {
            Some(msg) => match msg.id {
                MsgId::Success => {
                    tracing::info!("broker confirmed receipt");
                    return Ok(());
                }
                MsgId::Abort => anyhow::bail!("broker aborted after the final chunk"),
                other => tracing::debug!(msg = ?other, "ignoring message while waiting for the verdict"),
            },
            None => anyhow::ensure!(
                client.is_connected(),
                "broker connection closed before confirmation"
            ),
        }
    }
}
