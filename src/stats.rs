use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Action recorded the first time a user writes to the bot.
pub const ACTION_STARTED: &str = "Запустил бота";
/// Action recorded for a message without text (stickers, photos, ...).
pub const ACTION_MESSAGE: &str = "Отправил сообщение";

/// Per-user usage counters
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatsRecord {
    pub user_id: String,
    pub username: String,
    pub cards_count: i64,
    pub points_count: i64,
    pub first_seen_millis: i64,
    pub last_seen_millis: i64,
    pub last_action: String,
}

impl UserStatsRecord {
    fn new(user_id: &str, username: &str, now_millis: i64) -> Self {
        Self {
            user_id: user_id.to_string(),
            username: username.to_string(),
            cards_count: 0,
            points_count: 0,
            first_seen_millis: now_millis,
            last_seen_millis: now_millis,
            last_action: ACTION_STARTED.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub user_id: String,
    pub username: String,
    pub action: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total_users: usize,
    pub total_cards: i64,
    pub total_points: i64,
    pub recent_activity: Vec<ActivityEntry>,
}

/// Whether an upsert created a new record or touched an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
}

/// In-process user statistics, keyed by user id.
/// Lives as long as the process; every mutation happens under one lock.
#[derive(Clone, Default)]
pub struct StatsStore {
    users: Arc<Mutex<HashMap<String, UserStatsRecord>>>,
}

impl StatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the record on first contact, otherwise bump last-seen and
    /// record the latest action. An empty `text` counts as a plain message.
    pub async fn record_message(
        &self,
        user_id: &str,
        username: &str,
        text: &str,
        now_millis: i64,
    ) -> Upsert {
        let mut users = self.users.lock().await;
        match users.get_mut(user_id) {
            Some(record) => {
                record.last_seen_millis = record.last_seen_millis.max(now_millis);
                record.last_action = if text.is_empty() {
                    ACTION_MESSAGE.to_string()
                } else {
                    text.to_string()
                };
                debug!("Updated stats for user {}", user_id);
                Upsert::Updated
            }
            None => {
                users.insert(
                    user_id.to_string(),
                    UserStatsRecord::new(user_id, username, now_millis),
                );
                debug!("Created stats for user {}", user_id);
                Upsert::Created
            }
        }
    }

    #[allow(dead_code)]
    pub async fn get(&self, user_id: &str) -> Option<UserStatsRecord> {
        self.users.lock().await.get(user_id).cloned()
    }

    #[allow(dead_code)]
    pub async fn user_count(&self) -> usize {
        self.users.lock().await.len()
    }

    /// Totals plus the `limit` most recently active users, newest first.
    pub async fn snapshot(&self, limit: usize) -> StatsSnapshot {
        let users = self.users.lock().await;

        let mut recent_activity: Vec<ActivityEntry> = users
            .values()
            .map(|u| ActivityEntry {
                user_id: u.user_id.clone(),
                username: u.username.clone(),
                action: u.last_action.clone(),
                timestamp: u.last_seen_millis,
            })
            .collect();
        recent_activity.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        recent_activity.truncate(limit);

        StatsSnapshot {
            total_users: users.len(),
            total_cards: users.values().map(|u| u.cards_count).sum(),
            total_points: users.values().map(|u| u.points_count).sum(),
            recent_activity,
        }
    }
}
