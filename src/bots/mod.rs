//! Outgoing bots and the registry the dispatcher looks them up in.

pub mod onebot;
pub mod telegram;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::config::{BotConfig, Platform};
use crate::dispatch::Destination;
use crate::error::{ChannelError, ConfigError, Error};

pub use onebot::OneBot;
pub use telegram::TelegramBot;

/// Upper bound on one HTTP request to a bot API.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// HTTP client for the bot drivers.
fn http_client() -> Result<reqwest::Client, ChannelError> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| ChannelError::Http(format!("failed to build http client: {e}")))
}

/// A bot instance able to deliver text to a destination.
#[async_trait]
pub trait Bot: Send + Sync {
    fn platform(&self) -> Platform;

    fn self_id(&self) -> &str;

    /// Deliver `content`. One attempt, no retry.
    async fn send_message(&self, destination: &Destination, content: &str)
    -> Result<(), ChannelError>;

    /// Check the bot is reachable with its credentials.
    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// Lookup of active bots by platform and self id.
pub trait BotRegistry: Send + Sync {
    fn find(&self, platform: Platform, self_id: &str) -> Option<Arc<dyn Bot>>;

    /// `platform,self_id` of every registered bot, for diagnostics.
    fn available(&self) -> Vec<String>;
}

/// Registry over a fixed set of bots built at startup.
#[derive(Default)]
pub struct StaticBotRegistry {
    bots: Vec<Arc<dyn Bot>>,
}

impl StaticBotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, bot: Arc<dyn Bot>) {
        self.bots.push(bot);
    }

    /// Build one bot per config entry. Secrets are read here, so a missing
    /// token variable fails startup.
    pub fn from_configs(configs: &[BotConfig]) -> Result<Self, Error> {
        let mut registry = Self::new();
        for config in configs {
            let bot: Arc<dyn Bot> = match config.platform {
                Platform::Telegram => {
                    let token = config.token()?.ok_or_else(|| ConfigError::MissingRequired {
                        key: format!("bots[{}].token_env", config.self_id),
                        hint: "Telegram bots need a bot token.".into(),
                    })?;
                    Arc::new(TelegramBot::new(config.self_id.clone(), token)?)
                }
                Platform::Onebot => {
                    let endpoint =
                        config
                            .endpoint
                            .clone()
                            .ok_or_else(|| ConfigError::MissingRequired {
                                key: format!("bots[{}].endpoint", config.self_id),
                                hint: "OneBot bots need the HTTP API base URL.".into(),
                            })?;
                    Arc::new(OneBot::new(config.self_id.clone(), endpoint, config.token()?)?)
                }
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: format!("bots[{}].platform", config.self_id),
                        message: format!("no sender available for platform {other}"),
                    }
                    .into());
                }
            };
            info!(platform = %bot.platform(), self_id = %bot.self_id(), "Registered bot");
            registry.add(bot);
        }
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.bots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bots.is_empty()
    }
}

impl BotRegistry for StaticBotRegistry {
    fn find(&self, platform: Platform, self_id: &str) -> Option<Arc<dyn Bot>> {
        self.bots
            .iter()
            .find(|b| b.platform() == platform && b.self_id() == self_id)
            .cloned()
    }

    fn available(&self) -> Vec<String> {
        self.bots
            .iter()
            .map(|b| format!("{},{}", b.platform(), b.self_id()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullBot {
        platform: Platform,
        self_id: String,
    }

    #[async_trait]
    impl Bot for NullBot {
        fn platform(&self) -> Platform {
            self.platform
        }
        fn self_id(&self) -> &str {
            &self.self_id
        }
        async fn send_message(&self, _: &Destination, _: &str) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    fn registry() -> StaticBotRegistry {
        let mut registry = StaticBotRegistry::new();
        registry.add(Arc::new(NullBot {
            platform: Platform::Telegram,
            self_id: "relay".into(),
        }));
        registry.add(Arc::new(NullBot {
            platform: Platform::Onebot,
            self_id: "10001".into(),
        }));
        registry
    }

    #[test]
    fn finds_by_platform_and_id() {
        let registry = registry();
        let bot = registry.find(Platform::Onebot, "10001").unwrap();
        assert_eq!(bot.self_id(), "10001");
        assert!(registry.find(Platform::Telegram, "10001").is_none());
        assert!(registry.find(Platform::Onebot, "relay").is_none());
    }

    #[test]
    fn lists_available_bots() {
        assert_eq!(registry().available(), vec!["telegram,relay", "onebot,10001"]);
        assert!(StaticBotRegistry::new().available().is_empty());
    }

    #[test]
    fn from_configs_builds_onebot_without_token() {
        let configs = vec![BotConfig {
            platform: Platform::Onebot,
            self_id: "10001".into(),
            token_env: None,
            endpoint: Some("http://127.0.0.1:5700".into()),
        }];
        let registry = StaticBotRegistry::from_configs(&configs).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.find(Platform::Onebot, "10001").is_some());
    }

    #[test]
    fn from_configs_fails_on_missing_token_var() {
        // SAFETY: no other test reads this variable.
        unsafe { std::env::remove_var("MAIL_RELAY_TEST_MISSING_TOKEN") };
        let configs = vec![BotConfig {
            platform: Platform::Telegram,
            self_id: "relay".into(),
            token_env: Some("MAIL_RELAY_TEST_MISSING_TOKEN".into()),
            endpoint: None,
        }];
        let err = StaticBotRegistry::from_configs(&configs).err().unwrap();
        assert!(matches!(err, Error::Config(ConfigError::MissingEnvVar(_))));
    }

    #[tokio::test]
    async fn health_check_defaults_to_healthy() {
        let bot = NullBot {
            platform: Platform::Telegram,
            self_id: "relay".into(),
        };
        assert!(bot.health_check().await.is_ok());
    }
}
