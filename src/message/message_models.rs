use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct Message {
    pub id: Uuid,
    /// Store-assigned insertion order, breaks ties between equal `created_at`.
    pub seq: i64,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_username: Option<String>,
    pub sender_display_name: Option<String>,
    pub sender_avatar_url: Option<String>,
    pub content: String,
    pub attachment_urls: Vec<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// A message about to be appended. The sender snapshot is read from the
/// sender's participant row inside the same write.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub attachment_urls: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_username: Option<String>,
    pub sender_display_name: Option<String>,
    pub sender_avatar_url: Option<String>,
    pub content: String,
    pub attachment_urls: Vec<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for MessageResponse {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            sender_username: message.sender_username,
            sender_display_name: message.sender_display_name,
            sender_avatar_url: message.sender_avatar_url,
            content: message.content,
            attachment_urls: message.attachment_urls,
            is_read: message.is_read,
            created_at: message.created_at,
        }
    }
}
