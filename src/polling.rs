use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use teloxide::requests::Requester;
use teloxide::Bot;
use tracing::{debug, info, warn};

use crate::bot::{self, AppState};
use crate::config::Config;
use crate::update::Update;

/// Where batches of raw updates come from
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Fetch updates with `update_id >= offset`
    async fn fetch(&self, offset: Option<i64>) -> Result<Vec<Value>>;
}

#[derive(Debug, Deserialize)]
struct GetUpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Value>,
    #[serde(default)]
    description: Option<String>,
}

/// Long-polls the Bot API `getUpdates` method
pub struct BotApiSource {
    client: reqwest::Client,
    url: String,
    timeout_secs: u32,
}

impl BotApiSource {
    pub fn new(config: &Config) -> Result<Self> {
        let timeout_secs = config.polling.timeout_secs;
        let client = reqwest::Client::builder()
            // Leave headroom over the server-side long-poll timeout
            .timeout(Duration::from_secs(u64::from(timeout_secs) + 10))
            .build()
            .context("Failed to build HTTP client")?;
        let url = format!(
            "{}/bot{}/getUpdates",
            config.telegram.api_url.trim_end_matches('/'),
            config.telegram.bot_token
        );
        Ok(Self {
            client,
            url,
            timeout_secs,
        })
    }
}

#[async_trait]
impl UpdateSource for BotApiSource {
    async fn fetch(&self, offset: Option<i64>) -> Result<Vec<Value>> {
        let mut query = vec![
            ("timeout", self.timeout_secs.to_string()),
            ("allowed_updates", r#"["message"]"#.to_string()),
        ];
        if let Some(offset) = offset {
            query.push(("offset", offset.to_string()));
        }

        let response = self
            .client
            .get(&self.url)
            .query(&query)
            .send()
            .await
            // The request URL embeds the bot token
            .map_err(reqwest::Error::without_url)
            .context("Failed to request updates")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            bail!("getUpdates failed ({}): {}", status, error_body);
        }

        let body: GetUpdatesResponse = response
            .json()
            .await
            .map_err(reqwest::Error::without_url)
            .context("Failed to parse getUpdates response")?;
        if !body.ok {
            bail!(
                "getUpdates returned an error: {}",
                body.description.unwrap_or_default()
            );
        }
        Ok(body.result)
    }
}

/// Pulls batches from an [`UpdateSource`] and feeds them to the app.
/// The offset only moves once a whole batch has been processed.
pub struct Poller<S> {
    source: S,
    app: Arc<AppState>,
    offset: Option<i64>,
}

impl<S: UpdateSource> Poller<S> {
    pub fn new(source: S, app: Arc<AppState>) -> Self {
        Self {
            source,
            app,
            offset: None,
        }
    }

    /// Fetch and process one batch. Returns the number of updates seen.
    pub async fn poll_once(&mut self) -> Result<usize> {
        let batch = self.source.fetch(self.offset).await?;
        let count = batch.len();
        let mut high_water: Option<i64> = None;

        for raw in batch {
            let update_id = raw.get("update_id").and_then(Value::as_i64);
            match Update::from_value(raw) {
                Ok(update) => self.app.process_update(update).await,
                Err(e) => warn!(?update_id, error = %e, "Skipping undecodable update"),
            }
            if let Some(id) = update_id {
                high_water = Some(high_water.map_or(id, |h| h.max(id)));
            }
        }

        if let Some(id) = high_water {
            self.offset = Some(id + 1);
            debug!(offset = id + 1, count, "Batch processed");
        }
        Ok(count)
    }

    pub async fn run(mut self, error_backoff: Duration) {
        loop {
            if let Err(e) = self.poll_once().await {
                warn!("Polling failed: {:#}", e);
                tokio::time::sleep(error_backoff).await;
            }
        }
    }
}

/// Clear any registered webhook and long-poll until Ctrl-C
pub async fn run(config: &Config, bot: Bot, app: Arc<AppState>) -> Result<()> {
    bot.delete_webhook()
        .await
        .context("Failed to clear webhook before polling")?;

    let poller = Poller::new(BotApiSource::new(config)?, app);
    let error_backoff = Duration::from_secs(config.polling.error_backoff_secs);

    info!("Polling for updates...");
    tokio::select! {
        _ = poller.run(error_backoff) => {}
        _ = bot::shutdown_signal() => {}
    }

    Ok(())
}
