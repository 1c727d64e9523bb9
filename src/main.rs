mod config;
mod envelope;
mod handler;
mod heartbeat;
mod platform;
mod server;
mod stats;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, TOKEN_ENV_VAR};
use crate::envelope::InboundEvent;
use crate::handler::WebhookHandler;
use crate::heartbeat::Heartbeat;
use crate::platform::telegram::TelegramNotifier;
use crate::platform::Notifier;
use crate::stats::StatsStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so `--event` output stays clean JSON
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,kotobot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let event_path = args
        .iter()
        .position(|a| a == "--event")
        .map(|i| {
            args.get(i + 1)
                .map(PathBuf::from)
                .context("--event requires a path to an event JSON file")
        })
        .transpose()?;
    let config_path = args
        .iter()
        .enumerate()
        .find(|(i, a)| {
            !a.starts_with("--") && (*i == 0 || args[*i - 1] != "--event")
        })
        .map(|(_, a)| PathBuf::from(a))
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Web app: {}", config.telegram.web_app_url);
    info!("  Bot API: {}", config.telegram.api_base_url);
    info!(
        "  Bot token: {}",
        if config.telegram.token().is_some() { "configured" } else { "missing" }
    );

    let notifier: Option<Arc<dyn Notifier>> = match config.telegram.token() {
        Some(_) => Some(Arc::new(TelegramNotifier::new(&config.telegram)?) as Arc<dyn Notifier>),
        None => {
            warn!(
                "{} is not set; webhook deliveries will be rejected",
                TOKEN_ENV_VAR
            );
            None
        }
    };

    let stats = StatsStore::new();
    let handler = Arc::new(WebhookHandler::new(
        stats.clone(),
        notifier,
        config.telegram.web_app_url.clone(),
        config.stats.recent_activity_limit,
    ));

    if let Some(path) = event_path {
        return run_once(&handler, &path).await;
    }

    let heartbeat = Heartbeat::start(&config.stats.heartbeat_cron, stats).await?;

    info!("Bot webhook is starting...");
    server::serve(handler, &config.server.host, config.server.port).await?;

    heartbeat.shutdown().await?;
    Ok(())
}

/// Handle a single envelope event from a file and print the response envelope.
async fn run_once(handler: &WebhookHandler, path: &Path) -> Result<()> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read event file: {}", path.display()))?;
    let event: InboundEvent = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse event file: {}", path.display()))?;

    let response = server::invoke(handler, &event).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&response).context("Failed to serialize response")?
    );
    Ok(())
}
