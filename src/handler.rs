//! Webhook dispatch.
//!
//! One entry point, [`WebhookHandler::handle`], turns an [`InboundEvent`]
//! into an [`HttpResponse`]:
//!
//! - `OPTIONS` answers the CORS pre-flight,
//! - `GET ?stats=true` returns the usage snapshot,
//! - `POST` processes a Telegram update,
//! - anything else is `405`.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::envelope::{HttpResponse, InboundEvent};
use crate::platform::telegram::{parse_update, Update};
use crate::platform::{IncomingMessage, Notifier, OutgoingMessage, WebAppButton};
use crate::stats::{StatsStore, Upsert};

pub const START_COMMAND: &str = "/start";

pub const WELCOME_TEXT: &str = "🐱 Добро пожаловать в КотоКоллекцию!\n\n\
Собирай редких котиков, зарабатывай очки и соревнуйся с друзьями!";

pub const PLAY_BUTTON_TEXT: &str = "🎮 Играть";

const CORS_HEADERS: [(&str, &str); 4] = [
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Methods", "GET, POST, OPTIONS"),
    ("Access-Control-Allow-Headers", "Content-Type"),
    ("Access-Control-Max-Age", "86400"),
];

/// Failures while processing a webhook update.
/// Every kind is reported to the caller as a 500 with `{"error": ...}`.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Bot token not configured")]
    MissingToken,
    #[error("{0}")]
    MalformedUpdate(#[from] serde_json::Error),
    #[error("{0:#}")]
    Delivery(anyhow::Error),
}

impl HandlerError {
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerError::MissingToken => "configuration",
            HandlerError::MalformedUpdate(_) => "bad_request",
            HandlerError::Delivery(_) => "delivery",
        }
    }

    fn into_response(self) -> HttpResponse {
        HttpResponse::error(500, self.to_string())
    }
}

pub struct WebhookHandler {
    stats: StatsStore,
    /// None when no bot token is configured
    notifier: Option<Arc<dyn Notifier>>,
    web_app_url: String,
    recent_activity_limit: usize,
}

impl WebhookHandler {
    pub fn new(
        stats: StatsStore,
        notifier: Option<Arc<dyn Notifier>>,
        web_app_url: impl Into<String>,
        recent_activity_limit: usize,
    ) -> Self {
        Self {
            stats,
            notifier,
            web_app_url: web_app_url.into(),
            recent_activity_limit,
        }
    }

    #[allow(dead_code)]
    pub fn stats(&self) -> &StatsStore {
        &self.stats
    }

    pub async fn handle(&self, event: &InboundEvent) -> HttpResponse {
        match event.http_method.as_str() {
            "OPTIONS" => preflight(),
            "GET" if event.query("stats") == Some("true") => self.stats_snapshot().await,
            "POST" => match self.process_update(event.body_or_empty()).await {
                Ok(()) => HttpResponse::json(200, &serde_json::json!({ "ok": true })),
                Err(e) => {
                    match &e {
                        HandlerError::Delivery(_) => {
                            error!(kind = e.kind(), "Webhook processing failed: {}", e)
                        }
                        _ => warn!(kind = e.kind(), "Webhook rejected: {}", e),
                    }
                    e.into_response()
                }
            },
            other => {
                warn!("Method not allowed: {}", other);
                HttpResponse::error(405, "Method not allowed")
            }
        }
    }

    async fn stats_snapshot(&self) -> HttpResponse {
        let snapshot = self.stats.snapshot(self.recent_activity_limit).await;
        match serde_json::to_value(&snapshot) {
            Ok(value) => HttpResponse::json(200, &value),
            Err(e) => HttpResponse::error(500, e.to_string()),
        }
    }

    async fn process_update(&self, body: &str) -> Result<(), HandlerError> {
        let notifier = self.notifier.as_ref().ok_or(HandlerError::MissingToken)?;

        let message = match parse_update(body)? {
            Update::Message(msg) => IncomingMessage::from(msg),
            Update::Other => return Ok(()),
        };

        info!(
            "{} message from {} ({}) in chat {}: {}",
            message.platform,
            message.user_name,
            message.user_id.as_deref().unwrap_or("-"),
            message.chat_id,
            message.text
        );

        if let Some(user_id) = &message.user_id {
            let now = Utc::now().timestamp_millis();
            let outcome = self
                .stats
                .record_message(user_id, &message.user_name, &message.text, now)
                .await;
            if outcome == Upsert::Created {
                info!("New player: {} ({})", message.user_name, user_id);
            }
        }

        if message.text == START_COMMAND {
            let welcome = OutgoingMessage {
                chat_id: message.chat_id.clone(),
                text: WELCOME_TEXT.to_string(),
                web_app_button: Some(WebAppButton {
                    text: PLAY_BUTTON_TEXT.to_string(),
                    url: self.web_app_url.clone(),
                }),
            };
            notifier
                .send_message(&welcome)
                .await
                .map_err(HandlerError::Delivery)?;
            info!("Sent welcome to chat {}", message.chat_id);
        }

        Ok(())
    }
}

fn preflight() -> HttpResponse {
    let headers: BTreeMap<String, String> = CORS_HEADERS
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    HttpResponse::new(200, headers, String::new())
}
