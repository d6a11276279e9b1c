//! Mail relay: forwards matching mail to chat through an outgoing bot.

pub mod bots;
pub mod channels;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod relay;
pub mod rules;
