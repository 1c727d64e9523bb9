use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment variable holding the Telegram bot token.
pub const TOKEN_ENV_VAR: &str = "TELEGRAM_BOT_TOKEN";

/// Game front-end opened by the welcome button.
pub const DEFAULT_WEB_APP_URL: &str = "https://cat-card-balance-bot.poehali.dev";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub stats: StatsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_web_app_url")]
    pub web_app_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StatsConfig {
    #[serde(default = "default_recent_activity_limit")]
    pub recent_activity_limit: usize,
    /// Cron expression for the stats heartbeat log line
    #[serde(default = "default_heartbeat_cron")]
    pub heartbeat_cron: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_api_base_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_web_app_url() -> String {
    DEFAULT_WEB_APP_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    2
}

fn default_recent_activity_limit() -> usize {
    20
}

fn default_heartbeat_cron() -> String {
    "0 0 * * * *".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base_url: default_api_base_url(),
            web_app_url: default_web_app_url(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            recent_activity_limit: default_recent_activity_limit(),
            heartbeat_cron: default_heartbeat_cron(),
        }
    }
}

impl TelegramConfig {
    /// The bot token, or None when it is unset or blank.
    pub fn token(&self) -> Option<&str> {
        let token = self.bot_token.trim();
        if token.is_empty() {
            None
        } else {
            Some(token)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    /// Load the config file if it exists, otherwise start from defaults.
    /// `TELEGRAM_BOT_TOKEN` always wins over the file.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Config::default()
        };

        Ok(config.with_token_override(std::env::var(TOKEN_ENV_VAR).ok()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Invalid TOML")?;
        if config.stats.recent_activity_limit == 0 {
            anyhow::bail!("stats.recent_activity_limit must be greater than zero");
        }
        Ok(config)
    }

    /// Replace the bot token with `token` when it is present and non-blank.
    pub fn with_token_override(mut self, token: Option<String>) -> Self {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.telegram.bot_token = token;
        }
        self
    }
}
