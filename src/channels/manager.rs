//! Channel manager: starts every channel and merges their streams.

use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::channels::channel::{Channel, IncomingMessage, MessageStream, OutgoingResponse};
use crate::error::ChannelError;

/// Owns the inbound channels and routes replies back to them.
#[derive(Default)]
pub struct ChannelManager {
    channels: Vec<Box<dyn Channel>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, channel: Box<dyn Channel>) {
        self.channels.push(channel);
    }

    pub fn names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Start every channel. One failing channel aborts startup.
    pub async fn start_all(&self) -> Result<MessageStream, ChannelError> {
        let mut streams = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            streams.push(channel.start().await?);
            info!(channel = channel.name(), "Channel started");
        }
        Ok(Box::pin(stream::select_all(streams)))
    }

    /// Reply on the channel the message came from.
    pub async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        let channel = self
            .channels
            .iter()
            .find(|c| c.name() == msg.channel)
            .ok_or_else(|| ChannelError::NotFound(msg.channel.clone()))?;
        channel.respond(msg, response).await
    }

    /// Health-check every channel, logging failures.
    pub async fn health_check_all(&self) {
        for channel in &self.channels {
            if let Err(e) = channel.health_check().await {
                warn!(channel = channel.name(), "Health check failed: {e}");
            }
        }
    }

    pub async fn shutdown_all(&self) {
        for channel in &self.channels {
            if let Err(e) = channel.shutdown().await {
                warn!(channel = channel.name(), "Shutdown failed: {e}");
            }
        }
    }
}
