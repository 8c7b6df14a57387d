use anyhow::{bail, Context, Result};
use reqwest::Url;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sender: SenderConfig,
    #[serde(default)]
    pub polling: PollingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Public base URL the platform calls back to. Unset means long-polling.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SenderConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    #[serde(default = "default_poll_timeout_secs")]
    pub timeout_secs: u32,
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
}

fn default_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_poll_timeout_secs() -> u32 {
    30
}

fn default_error_backoff_secs() -> u64 {
    5
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_url: default_api_url(),
            webhook_url: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_poll_timeout_secs(),
            error_backoff_secs: default_error_backoff_secs(),
        }
    }
}

impl Config {
    /// Load `path` if it exists, apply environment overrides, then validate.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml(&content)?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Overrides from `TELEGRAM_BOT_TOKEN`, `WEBHOOK_URL` and `PORT`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Some(url) = lookup("WEBHOOK_URL") {
            self.telegram.webhook_url = Some(url).filter(|u| !u.trim().is_empty());
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid PORT value: {}", port))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            bail!("Bot token is missing: set TELEGRAM_BOT_TOKEN or [telegram] bot_token");
        }
        self.api_url()?;
        self.webhook_endpoint()?;
        Ok(())
    }

    pub fn api_url(&self) -> Result<Url> {
        Url::parse(&self.telegram.api_url)
            .with_context(|| format!("Invalid api_url: {}", self.telegram.api_url))
    }

    /// Full callback URL registered with the platform, `{webhook_url}/bot/{token}`
    pub fn webhook_endpoint(&self) -> Result<Option<Url>> {
        let Some(base) = self.telegram.webhook_url.as_deref() else {
            return Ok(None);
        };
        Url::parse(base).with_context(|| format!("Invalid webhook_url: {}", base))?;
        let endpoint = format!(
            "{}/bot/{}",
            base.trim_end_matches('/'),
            self.telegram.bot_token
        );
        let url = Url::parse(&endpoint).context("Invalid webhook endpoint")?;
        Ok(Some(url))
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
