use std::sync::Arc;

use anyhow::Context;

use mail_relay::bots::{BotRegistry, StaticBotRegistry};
use mail_relay::config::{RelayConfig, config_path_from_env};
use mail_relay::relay::Relay;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // Install rustls crypto provider before any TLS usage
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    let config_path = config_path_from_env();
    let config = RelayConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    tracing::info!("Mail relay v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Monitored mail addresses: {}", config.mails.join(", "));
    tracing::info!(
        "Outgoing bot: {},{} -> [{}]",
        config.platform,
        config.sid,
        config.session_ids.join(", ")
    );

    let registry = StaticBotRegistry::from_configs(&config.bots)?;
    let available = registry.available();
    if registry.is_empty() {
        tracing::warn!("No bots configured");
    } else {
        tracing::info!("Available bots: [{}]", available.join(", "));
    }
    match registry.find(config.platform, &config.sid) {
        Some(bot) => {
            if let Err(e) = bot.health_check().await {
                tracing::warn!("Outgoing bot health check failed: {e}");
            }
        }
        None => tracing::warn!(
            "No bot configured for {},{}; matches will not be delivered",
            config.platform,
            config.sid
        ),
    }

    let relay = Relay::from_config(&config, Arc::new(registry))?;
    relay.channels().health_check_all().await;
    relay.run().await?;

    Ok(())
}
