//! Receive routine: find the broker, probe the code phrase, confirm the
//! offer, then commit and stream to disk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::fs::File;

use ferry_core::message::{
    CodePhrase, FileData, Message, MsgId, PayloadType, PostMetadata, PreMetadata,
};
use ferry_net::Client;

use crate::discovery;
use crate::session::ReceiverSession;

pub struct ReceiveOptions {
    pub broker: Option<String>,
    pub output: Option<PathBuf>,
    /// Skip the interactive accept prompt.
    pub assume_yes: bool,
    pub discovery_port: u16,
    pub discovery_wait: Duration,
}

pub async fn receive_file(code: &str, options: ReceiveOptions) -> Result<()> {
    let addr = discovery::resolve(options.broker, options.discovery_port, options.discovery_wait)
        .await?;
    let mut client = Client::connect(addr)
        .await
        .with_context(|| format!("failed to connect to broker at {addr}"))?;
    tracing::info!(broker = %addr, "connected and validated");

    let code_phrase = CodePhrase::new(code)?;
    let pre = PreMetadata {
        payload_type: PayloadType::File,
        code_phrase: code_phrase.clone(),
        file_data: FileData::new(0, "")?,
    };
    anyhow::ensure!(
        client.send(pre.to_message(MsgId::RequestReceive)).await,
        "connection lost before the request went out"
    );

    let post = wait_for_offer(&mut client).await?;
    let offered = &post.file_data;
    println!("Incoming file \"{}\" ({} bytes).", offered.file_name, offered.file_size);

    if !options.assume_yes && !confirm("Accept? [y/N] ")? {
        println!("Declined.");
        return Ok(());
    }

    let out_path = options
        .output
        .unwrap_or_else(|| output_name(&offered.file_name));

    // Commit; from here on failures must tell the broker.
    anyhow::ensure!(
        client.send(code_phrase.to_message(MsgId::Receive)).await,
        "connection lost before the claim went out"
    );

    let mut sink = match File::create(&out_path).await {
        Ok(file) => file,
        Err(e) => {
            client.send(Message::new(MsgId::FailedReceive)).await;
            client.flush().await;
            return Err(e).with_context(|| format!("cannot create {}", out_path.display()));
        }
    };

    let session = ReceiverSession::new(PayloadType::File);
    let received = session.run(&mut client, &mut sink).await;
    if !received {
        // A partial file may remain; it is left for the user to inspect.
        anyhow::bail!("receive failed (partial output may remain at {})", out_path.display());
    }

    if let Err(e) = sink.sync_all().await {
        client.send(Message::new(MsgId::FailedReceive)).await;
        client.flush().await;
        return Err(e).with_context(|| format!("cannot sync {}", out_path.display()));
    }
    drop(sink);

    client.send(Message::new(MsgId::FinishReceive)).await;
    client.disconnect_after_flush().await;

    println!("Received \"{}\" into {}.", offered.file_name, out_path.display());
    Ok(())
}

async fn wait_for_offer(client: &mut Client) -> Result<PostMetadata> {
    loop {
        let Some(mut msg) = client.recv().await else {
            anyhow::bail!("broker connection closed while waiting for the offer");
        };
        match msg.id {
            MsgId::Accept => return Ok(PostMetadata::pop_from(&mut msg)?),
            MsgId::Reject => anyhow::bail!("broker does not know this code phrase"),
            MsgId::Abort => anyhow::bail!("broker aborted the request"),
            other => tracing::debug!(msg = ?other, "ignoring message while waiting for the offer"),
        }
    }
}

/// Advertised names come from the sender; keep only the final component
/// so they cannot point outside the working directory.
fn output_name(advertised: &str) -> PathBuf {
    let base = Path::new(advertised)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .unwrap_or("out");
    PathBuf::from(base)
}

fn confirm(prompt: &str) -> Result<bool> {
    use std::io::Write;

    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}
