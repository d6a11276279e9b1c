//! Configuration types.
//!
//! Loaded from a TOML file at startup and validated before anything runs.
//! Secrets never live in the file: accounts and bots name the environment
//! variables holding them.

use std::fmt;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;

/// Environment variable holding the config file path.
pub const CONFIG_PATH_ENV: &str = "MAIL_RELAY_CONFIG";

/// Config file used when `MAIL_RELAY_CONFIG` is not set.
pub const DEFAULT_CONFIG_PATH: &str = "mail-relay.toml";

/// Relay configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Monitored mail addresses, one subscription each.
    pub mails: Vec<String>,
    /// Rules, evaluated in this order.
    #[serde(default)]
    pub patterns: Vec<RuleConfig>,
    /// Platform of the outgoing bot.
    #[serde(default)]
    pub platform: Platform,
    /// Self id of the outgoing bot.
    pub sid: String,
    /// Destinations; `private:<id>` marks a direct conversation.
    #[serde(default, alias = "sessionIds")]
    pub session_ids: Vec<String>,
    /// Keep evaluating rules after the first match.
    #[serde(default, alias = "continueOnMatch")]
    pub continue_on_match: bool,
    /// Echo match results back on the sandbox channel.
    #[serde(default, alias = "sandboxEnabled")]
    pub sandbox_enabled: bool,
    /// IMAP settings for the monitored addresses.
    #[serde(default)]
    pub accounts: Vec<MailAccountConfig>,
    /// Outgoing bots available for lookup.
    #[serde(default)]
    pub bots: Vec<BotConfig>,
}

/// One rule as written in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleConfig {
    /// `|`-separated keyword alternatives; empty means no gate.
    #[serde(default)]
    pub keywords: Option<String>,
    #[serde(default = "default_pattern", alias = "regex")]
    pub pattern: String,
    #[serde(default = "default_flags", alias = "modifier")]
    pub flags: String,
    #[serde(default = "default_template", alias = "format")]
    pub template: String,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            keywords: None,
            pattern: default_pattern(),
            flags: default_flags(),
            template: default_template(),
        }
    }
}

fn default_pattern() -> String {
    r"\b\d{6,}\b".to_string()
}

fn default_flags() -> String {
    "igm".to_string()
}

fn default_template() -> String {
    "$0".to_string()
}

/// Chat platforms a bot may be configured on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Onebot,
    Kook,
    Telegram,
    Discord,
    Lark,
    Chronocat,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Onebot => "onebot",
            Platform::Kook => "kook",
            Platform::Telegram => "telegram",
            Platform::Discord => "discord",
            Platform::Lark => "lark",
            Platform::Chronocat => "chronocat",
        }
    }

    /// Whether this crate ships a sender for the platform.
    pub fn has_driver(&self) -> bool {
        matches!(self, Platform::Onebot | Platform::Telegram)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// IMAP settings for one mail account.
#[derive(Debug, Clone, Deserialize)]
pub struct MailAccountConfig {
    pub address: String,
    pub imap_host: String,
    #[serde(default = "default_imap_port")]
    pub imap_port: u16,
    /// Login name; defaults to the address.
    #[serde(default)]
    pub username: Option<String>,
    /// Environment variable holding the IMAP password.
    pub password_env: String,
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl MailAccountConfig {
    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.address)
    }

    pub fn password(&self) -> Result<SecretString, ConfigError> {
        read_secret(&self.password_env)
    }
}

fn default_imap_port() -> u16 {
    993
}

fn default_mailbox() -> String {
    "INBOX".to_string()
}

fn default_poll_interval() -> u64 {
    60
}

/// One outgoing bot.
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    pub platform: Platform,
    pub self_id: String,
    /// Environment variable holding the bot token (Telegram) or the
    /// access token (OneBot, optional there).
    #[serde(default)]
    pub token_env: Option<String>,
    /// Base URL of the OneBot HTTP API.
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl BotConfig {
    pub fn token(&self) -> Result<Option<SecretString>, ConfigError> {
        self.token_env.as_deref().map(read_secret).transpose()
    }
}

/// Read a secret from the environment.
pub fn read_secret(var: &str) -> Result<SecretString, ConfigError> {
    std::env::var(var)
        .map(SecretString::from)
        .map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
}

/// Config file path: `MAIL_RELAY_CONFIG` or `mail-relay.toml`.
pub fn config_path_from_env() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

impl RelayConfig {
    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: RelayConfig =
            toml::from_str(raw).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks. Rule patterns are checked by the rule compiler.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mails.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "mails".into(),
                hint: "List at least one mail address to monitor.".into(),
            });
        }
        if self.sid.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "sid".into(),
                hint: "Set the self id of the outgoing bot.".into(),
            });
        }
        for mail in &self.mails {
            if self.account(mail).is_none() {
                return Err(ConfigError::MissingRequired {
                    key: format!("accounts[{mail}]"),
                    hint: "Add an [[accounts]] entry with its IMAP settings.".into(),
                });
            }
        }
        for id in &self.session_ids {
            if crate::dispatch::Destination::parse(id).id().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "session_ids".into(),
                    message: format!("empty destination id \"{id}\""),
                });
            }
        }
        for account in &self.accounts {
            if account.poll_interval_secs == 0 {
                return Err(ConfigError::InvalidValue {
                    key: format!("accounts[{}].poll_interval_secs", account.address),
                    message: "must be greater than zero".into(),
                });
            }
        }
        for bot in &self.bots {
            if !bot.platform.has_driver() {
                return Err(ConfigError::InvalidValue {
                    key: format!("bots[{}].platform", bot.self_id),
                    message: format!("no sender available for platform {}", bot.platform),
                });
            }
            match bot.platform {
                Platform::Telegram if bot.token_env.is_none() => {
                    return Err(ConfigError::MissingRequired {
                        key: format!("bots[{}].token_env", bot.self_id),
                        hint: "Telegram bots need a bot token.".into(),
                    });
                }
                Platform::Onebot if bot.endpoint.is_none() => {
                    return Err(ConfigError::MissingRequired {
                        key: format!("bots[{}].endpoint", bot.self_id),
                        hint: "OneBot bots need the HTTP API base URL.".into(),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// IMAP settings for `address`.
    pub fn account(&self, address: &str) -> Option<&MailAccountConfig> {
        self.accounts
            .iter()
            .find(|a| a.address.eq_ignore_ascii_case(address))
    }
}
