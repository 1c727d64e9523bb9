pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Chat identifier as the platform sent it: numeric id or `@channel` style name.
/// Serialized back in the same form.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ChatId {
    Numeric(i64),
    Named(String),
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatId::Numeric(id) => write!(f, "{}", id),
            ChatId::Named(name) => write!(f, "{}", name),
        }
    }
}

/// A message received from any platform
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    /// Platform identifier (e.g., "telegram")
    pub platform: String,
    pub chat_id: ChatId,
    /// Sender id; some updates (channel posts) carry none
    pub user_id: Option<String>,
    /// Display name of the user
    pub user_name: String,
    /// The message text, empty for non-text messages
    pub text: String,
}

/// Button that opens a web application inside the chat client
#[derive(Debug, Clone, PartialEq)]
pub struct WebAppButton {
    pub text: String,
    pub url: String,
}

/// A message to deliver to a chat
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub chat_id: ChatId,
    pub text: String,
    pub web_app_button: Option<WebAppButton>,
}

/// Outbound delivery capability.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_message(&self, message: &OutgoingMessage) -> Result<()>;
}
