//! Sandbox channel: stdin/stdout loop for trying rules interactively.
//!
//! Every line typed is treated as a mail body; match results are printed.

use async_trait::async_trait;
use futures::stream;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse};
use crate::error::ChannelError;

/// Channel name prefix marking test contexts.
pub const SANDBOX_PREFIX: &str = "sandbox";

/// Whether a message came from a sandbox channel.
pub fn is_sandbox(msg: &IncomingMessage) -> bool {
    msg.channel.starts_with(SANDBOX_PREFIX)
}

/// Reads lines from stdin and prints replies to stdout.
pub struct SandboxChannel;

impl SandboxChannel {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SandboxChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for SandboxChannel {
    fn name(&self) -> &str {
        SANDBOX_PREFIX
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            eprint!("sandbox> ");

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            eprint!("sandbox> ");
                            continue;
                        }
                        let msg = IncomingMessage::new(SANDBOX_PREFIX, "local-user", &line);
                        if tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF
                    Err(e) => {
                        tracing::error!("Error reading stdin: {}", e);
                        break;
                    }
                }
            }
        });

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn respond(
        &self,
        _msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        println!("\n{}\n", response.content);
        eprint!("sandbox> ");
        Ok(())
    }
}
