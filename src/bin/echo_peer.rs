//! Echo peer - opens a process region and sends every message back.
//!
//! Usage: `groupwire-echo-peer /region-name`
//!
//! On start it prints the layout it found as one JSON line on stdout. Each
//! incoming message is echoed on the acceptor->creator direction, except
//! `!error`, which raises the ERROR status instead. The peer exits once the
//! creator sends shutdown.

use bytes::Bytes;
use groupwire::control::write_stdout_json;
use groupwire::transport::open_with_info;
use groupwire::Channel;
use tokio::sync::mpsc;

const ERROR_COMMAND: &[u8] = b"!error";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let region = std::env::args()
        .nth(1)
        .ok_or("usage: groupwire-echo-peer <region>")?;

    let (endpoint, info) = open_with_info(&region)?;
    write_stdout_json(&info)?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    let channel = Channel::builder()
        .on_message(move |message| {
            let _ = tx.send(message);
        })
        .start(endpoint)
        .await?;

    loop {
        tokio::select! {
            _ = channel.closed() => break,
            message = rx.recv() => match message {
                Some(message) if &message[..] == ERROR_COMMAND => channel.report_error().await?,
                Some(message) => {
                    if let Err(e) = channel.send(message).await {
                        tracing::warn!(error = %e, "Echo failed");
                    }
                }
                None => break,
            },
        }
    }

    channel.shutdown().await?;
    Ok(())
}
