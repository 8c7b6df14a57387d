mod bot;
mod config;
mod dispatcher;
mod polling;
mod sender;
mod update;
mod webhook;

#[cfg(test)]
mod test_support;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::Bot;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::AppState;
use crate::config::Config;
use crate::sender::{OutboundSender, TelegramApi};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,echobot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Listen address: {}", config.listen_addr());
    info!(
        "  Webhook URL: {}",
        config.telegram.webhook_url.as_deref().unwrap_or("(none)")
    );
    info!(
        "  Send retries: {} (backoff {}ms)",
        config.sender.max_retries, config.sender.backoff_ms
    );

    // A handler table without a trailing catch-all is a startup error
    let dispatcher = dispatcher::echo_bot().context("Invalid handler table")?;

    let bot = Bot::new(&config.telegram.bot_token).set_api_url(config.api_url()?);
    let sender = OutboundSender::new(Arc::new(TelegramApi::new(bot.clone())), &config.sender);
    let state = Arc::new(AppState::new(dispatcher, sender));

    info!("Bot is starting...");
    bot::run(&config, bot, state).await?;

    info!("Bot stopped");
    Ok(())
}
