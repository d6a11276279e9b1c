//! Error types for the mail relay.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Configuration-related errors. All of these are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Rule #{index} has an invalid pattern: {reason}")]
    InvalidPattern { index: usize, reason: String },

    #[error("Rule #{index} has invalid flags \"{flags}\": {reason}")]
    InvalidFlags {
        index: usize,
        flags: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Delivery errors. Never propagated: logged and collected in the
/// dispatch report while the remaining rules and destinations carry on.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error("No bot found for {platform}/{self_id}, available: [{}]", .available.join(", "))]
    BotUnavailable {
        platform: String,
        self_id: String,
        available: Vec<String>,
    },

    #[error("Failed to send to {destination}: {reason}")]
    SendFailed { destination: String, reason: String },
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("No channel named {0}")]
    NotFound(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Channel health check failed: {name}")]
    HealthCheckFailed { name: String },
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_unavailable_lists_available_bots() {
        let err = DispatchError::BotUnavailable {
            platform: "telegram".into(),
            self_id: "relay".into(),
            available: vec!["onebot,10001".into(), "telegram,other".into()],
        };
        assert_eq!(
            err.to_string(),
            "No bot found for telegram/relay, available: [onebot,10001, telegram,other]"
        );
    }

    #[test]
    fn config_error_converts_into_top_level() {
        let err: Error = ConfigError::MissingEnvVar("TOKEN".into()).into();
        assert!(matches!(err, Error::Config(ConfigError::MissingEnvVar(_))));
        assert!(err.to_string().contains("TOKEN"));
    }
}
