use std::sync::Arc;

use anyhow::Result;
use teloxide::Bot;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::polling;
use crate::sender::OutboundSender;
use crate::update::Update;
use crate::webhook;

/// Shared application state: the routing table and the outbound sender.
/// Read-only after startup, shared across in-flight updates.
pub struct AppState {
    dispatcher: Dispatcher,
    sender: OutboundSender,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, sender: OutboundSender) -> Self {
        Self { dispatcher, sender }
    }

    /// Route one update and deliver the reply, if any.
    /// Failures are logged here; the update counts as processed either way.
    pub async fn process_update(&self, update: Update) {
        let update_id = update.update_id();
        let outbound = match self.dispatcher.dispatch(&update) {
            Ok(Some(outbound)) => outbound,
            Ok(None) => {
                debug!(update_id, "Update has no text, nothing to reply");
                return;
            }
            Err(e) => {
                error!(update_id, error = %e, "Dispatch failed");
                return;
            }
        };

        if let Err(e) = self.sender.send(&outbound).await {
            error!(update_id, error = %e, "Failed to deliver reply");
        }
    }
}

/// Run the bot: webhook mode when a public URL is configured, long-polling otherwise
pub async fn run(config: &Config, bot: Bot, state: Arc<AppState>) -> Result<()> {
    match config.webhook_endpoint()? {
        Some(endpoint) => {
            info!("Starting in webhook mode");
            webhook::serve(config, bot, state, endpoint).await
        }
        None => {
            info!("No webhook_url configured, starting in long-polling mode");
            polling::run(config, bot, state).await
        }
    }
}

/// Resolves on Ctrl-C
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
