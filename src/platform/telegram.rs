use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::TelegramConfig;
use crate::platform::{ChatId, IncomingMessage, Notifier, OutgoingMessage};

const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

// ── Inbound update schema ──────────────────────────────────────────────────────

/// A webhook update, reduced to the shapes the bot reacts to.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawUpdate")]
pub enum Update {
    Message(TgMessage),
    /// Callback queries, edits, member updates, ... acknowledged and ignored
    Other,
}

#[derive(Deserialize)]
struct RawUpdate {
    #[serde(default)]
    message: Option<TgMessage>,
}

impl From<RawUpdate> for Update {
    fn from(raw: RawUpdate) -> Self {
        match raw.message {
            Some(message) => Update::Message(message),
            None => Update::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TgMessage {
    pub chat: TgChat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub from: Option<TgUser>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TgChat {
    pub id: ChatId,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TgUser {
    #[serde(default)]
    pub id: Option<UserIdRepr>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
}

/// Telegram sends integers; test harnesses and proxies sometimes send strings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum UserIdRepr {
    Numeric(i64),
    Text(String),
}

impl UserIdRepr {
    fn into_string(self) -> String {
        match self {
            UserIdRepr::Numeric(id) => id.to_string(),
            UserIdRepr::Text(id) => id,
        }
    }
}

/// Parse a webhook body. Errors carry serde's description of what was wrong.
pub fn parse_update(body: &str) -> Result<Update, serde_json::Error> {
    serde_json::from_str(body)
}

impl From<TgMessage> for IncomingMessage {
    fn from(msg: TgMessage) -> Self {
        let (user_id, username, first_name) = match msg.from {
            Some(user) => (user.id.map(UserIdRepr::into_string), user.username, user.first_name),
            None => (None, None, None),
        };

        let user_name = username
            .filter(|n| !n.is_empty())
            .or_else(|| first_name.filter(|n| !n.is_empty()))
            .unwrap_or_else(|| match &user_id {
                Some(id) => format!("User {}", id),
                None => "Unknown".to_string(),
            });

        IncomingMessage {
            platform: "telegram".to_string(),
            chat_id: msg.chat.id,
            user_id,
            user_name,
            text: msg.text.unwrap_or_default(),
        }
    }
}

// ── Outbound sendMessage payload ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendMessageRequest {
    pub chat_id: ChatId,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<InlineKeyboardMarkup>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub web_app: WebAppInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebAppInfo {
    pub url: String,
}

impl From<&OutgoingMessage> for SendMessageRequest {
    fn from(message: &OutgoingMessage) -> Self {
        let reply_markup = message.web_app_button.as_ref().map(|button| InlineKeyboardMarkup {
            inline_keyboard: vec![vec![InlineKeyboardButton {
                text: button.text.clone(),
                web_app: WebAppInfo {
                    url: button.url.clone(),
                },
            }]],
        });

        Self {
            chat_id: message.chat_id.clone(),
            text: message.text.clone(),
            reply_markup,
        }
    }
}

// ── Bot API client ─────────────────────────────────────────────────────────────

/// Outcome of one delivery attempt that did not succeed.
enum AttemptError {
    /// Transport failure, 429 or 5xx: worth another try
    Retryable(anyhow::Error),
    Fatal(anyhow::Error),
}

/// Sends messages through the Telegram Bot API `sendMessage` method.
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_base_url: String,
    token: String,
    max_retries: u32,
    retry_backoff: Duration,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let token = config.token().context("Bot token not configured")?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            max_retries: config.max_retries,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        })
    }

    #[allow(dead_code)]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base_url, self.token)
    }

    async fn attempt(&self, request: &SendMessageRequest) -> Result<(), AttemptError> {
        // without_url() keeps the token out of error messages
        let response = self
            .client
            .post(self.endpoint())
            .json(request)
            .send()
            .await
            .map_err(|e| {
                AttemptError::Retryable(
                    anyhow::Error::new(e.without_url()).context("Failed to send request to Telegram"),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let err = anyhow::anyhow!("Telegram API error ({}): {}", status, error_body);
            return Err(if is_retryable(status) {
                AttemptError::Retryable(err)
            } else {
                AttemptError::Fatal(err)
            });
        }

        let result: serde_json::Value = response.json().await.map_err(|e| {
            AttemptError::Fatal(
                anyhow::Error::new(e.without_url()).context("Failed to parse Telegram response"),
            )
        })?;
        debug!("Telegram sendMessage response: {}", result);

        Ok(())
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_message(&self, message: &OutgoingMessage) -> Result<()> {
        let request = SendMessageRequest::from(message);

        let mut retries = 0;
        loop {
            match self.attempt(&request).await {
                Ok(()) => return Ok(()),
                Err(AttemptError::Retryable(e)) if retries < self.max_retries => {
                    retries += 1;
                    warn!(
                        "sendMessage to chat {} failed (retry {}/{}): {:#}",
                        request.chat_id, retries, self.max_retries, e
                    );
                    tokio::time::sleep(self.retry_backoff * retries).await;
                }
                Err(AttemptError::Retryable(e)) | Err(AttemptError::Fatal(e)) => return Err(e),
            }
        }
    }
}
