//! Inbound channels: monitored mail accounts and the sandbox.

pub mod channel;
pub mod email;
pub mod manager;
pub mod sandbox;

pub use channel::*;
pub use email::{EmailChannel, EmailConfig};
pub use manager::ChannelManager;
pub use sandbox::{SandboxChannel, is_sandbox};
