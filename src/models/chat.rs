// src/models/chat.rs
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct Chat {
    pub id: i32,
    pub user_id: i32,
    pub title: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: i32,
    pub user_id: i32,
    pub chat_id: Option<i32>,
    pub content: String,
    pub is_bot: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageView {
    pub content: String,
    pub is_bot: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<Message> for MessageView {
    fn from(msg: Message) -> Self {
        MessageView {
            content: msg.content,
            is_bot: msg.is_bot,
            created_at: msg.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MessageCreate {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatUpdate {
    pub title: String,
}

/// Successful turn: bot reply plus the caller's updated quota picture.
/// `remaining_messages` is null for premium users (unlimited), which is
/// not the same thing as 0 messages left.
#[derive(Debug, Serialize)]
pub struct TurnResponse {
    pub bot_message: String,
    pub current_count: i64,
    pub remaining_messages: Option<i64>,
    pub time_frame: &'static str,
}

#[derive(Debug, Serialize)]
pub struct QuotaExceededResponse {
    pub detail: &'static str,
    pub upgrade_required: bool,
    pub current_count: i64,
    pub time_frame: &'static str,
}

#[derive(Debug, Serialize)]
pub struct MessageCountResponse {
    pub current_count: i64,
    pub time_frame: &'static str,
}
