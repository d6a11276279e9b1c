//! Relay loop: wires channels to the dispatcher.
//!
//! Messages are handled one at a time, in arrival order. Mail channels go
//! through the production path; sandbox channels get the match echo.

use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::bots::BotRegistry;
use crate::channels::email::channel_name;
use crate::channels::{
    ChannelManager, EmailChannel, EmailConfig, IncomingMessage, OutgoingResponse, SandboxChannel,
    is_sandbox,
};
use crate::config::RelayConfig;
use crate::dispatch::{DispatchReport, Dispatcher, OutgoingBinding};
use crate::error::{ConfigError, Error};
use crate::rules::compile_rules;

/// Length of the content preview in logs, in chars.
const LOG_PREVIEW_CHARS: usize = 80;

/// What the relay did with one message.
#[derive(Debug)]
pub enum RelayOutcome {
    /// Production path ran; see the report.
    Dispatched(DispatchReport),
    /// Sandbox replies posted back on the originating channel.
    Sandbox { replies: usize },
    /// Not from a monitored account, or sandbox disabled.
    Ignored,
}

pub struct Relay {
    dispatcher: Arc<Dispatcher>,
    channels: ChannelManager,
    mail_channels: HashSet<String>,
    sandbox_enabled: bool,
}

impl Relay {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        channels: ChannelManager,
        monitored: &[String],
        sandbox_enabled: bool,
    ) -> Self {
        Self {
            dispatcher,
            channels,
            mail_channels: monitored.iter().map(|m| channel_name(m)).collect(),
            sandbox_enabled,
        }
    }

    /// Compile the rules and build one mail channel per monitored address,
    /// plus the sandbox when enabled. Any failure here is fatal.
    pub fn from_config(config: &RelayConfig, registry: Arc<dyn BotRegistry>) -> Result<Self, Error> {
        let rules = compile_rules(&config.patterns)?;
        info!(rules = rules.len(), "Compiled rules");

        let dispatcher = Dispatcher::new(
            rules,
            OutgoingBinding::from_config(config),
            registry,
            config.continue_on_match,
        );

        let mut channels = ChannelManager::new();
        for mail in &config.mails {
            let account = config
                .account(mail)
                .ok_or_else(|| ConfigError::MissingRequired {
                    key: format!("accounts[{mail}]"),
                    hint: "Add an [[accounts]] entry with its IMAP settings.".into(),
                })?;
            channels.add(Box::new(EmailChannel::new(EmailConfig::from_account(account)?)));
        }
        if config.sandbox_enabled {
            channels.add(Box::new(SandboxChannel::new()));
        }

        Ok(Self::new(
            Arc::new(dispatcher),
            channels,
            &config.mails,
            config.sandbox_enabled,
        ))
    }

    pub fn channels(&self) -> &ChannelManager {
        &self.channels
    }

    /// Handle one inbound message. Never fails: delivery problems end up
    /// in the report and the logs.
    pub async fn handle_message(&self, msg: &IncomingMessage) -> RelayOutcome {
        info!(
            channel = %msg.channel,
            from = %msg.user_id,
            "{}",
            preview(&msg.content)
        );

        if is_sandbox(msg) {
            if !self.sandbox_enabled {
                debug!(channel = %msg.channel, "Sandbox disabled, ignoring message");
                return RelayOutcome::Ignored;
            }
            let replies = self.dispatcher.handle_sandbox(&msg.content);
            let count = replies.len();
            for reply in replies {
                if let Err(e) = self.channels.respond(msg, OutgoingResponse::text(reply)).await {
                    warn!(channel = %msg.channel, "Sandbox reply failed: {e}");
                }
            }
            return RelayOutcome::Sandbox { replies: count };
        }

        if !self.mail_channels.contains(&msg.channel) {
            warn!(channel = %msg.channel, "Message from unmonitored channel ignored");
            return RelayOutcome::Ignored;
        }

        RelayOutcome::Dispatched(self.dispatcher.handle_incoming(&msg.content).await)
    }

    /// Consume every channel until all streams end or Ctrl+C.
    pub async fn run(self) -> Result<(), Error> {
        let mut message_stream = self.channels.start_all().await?;
        info!(channels = ?self.channels.names(), "Relay ready and listening");

        loop {
            let message = tokio::select! {
                biased;
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl+C received, shutting down...");
                    break;
                }
                msg = message_stream.next() => {
                    match msg {
                        Some(m) => m,
                        None => {
                            info!("All channel streams ended, shutting down...");
                            break;
                        }
                    }
                }
            };

            self.handle_message(&message).await;
        }

        self.channels.shutdown_all().await;
        Ok(())
    }
}

fn preview(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(LOG_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}
