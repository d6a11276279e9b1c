//! Destinations and the outgoing binding.

use std::fmt;

use crate::config::{Platform, RelayConfig};

/// Marks a direct (one-to-one) destination in configuration.
pub const PRIVATE_PREFIX: &str = "private:";

/// Where a rendered message is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    Group(String),
    Private(String),
}

impl Destination {
    /// Parse a configured id; `private:<id>` is a direct conversation.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.strip_prefix(PRIVATE_PREFIX) {
            Some(id) => Destination::Private(id.trim().to_string()),
            None => Destination::Group(raw.to_string()),
        }
    }

    /// The platform-side id, without the private marker.
    pub fn id(&self) -> &str {
        match self {
            Destination::Group(id) | Destination::Private(id) => id,
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(self, Destination::Private(_))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Group(id) => f.write_str(id),
            Destination::Private(id) => write!(f, "{PRIVATE_PREFIX}{id}"),
        }
    }
}

/// The single outgoing bot and the fixed list of places it delivers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingBinding {
    pub platform: Platform,
    pub self_id: String,
    pub destinations: Vec<Destination>,
}

impl OutgoingBinding {
    pub fn new(platform: Platform, self_id: impl Into<String>, destinations: Vec<Destination>) -> Self {
        Self {
            platform,
            self_id: self_id.into(),
            destinations,
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(
            config.platform,
            config.sid.clone(),
            config.session_ids.iter().map(|s| Destination::parse(s)).collect(),
        )
    }
}
