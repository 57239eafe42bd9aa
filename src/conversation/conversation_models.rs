use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::message::message_models::MessageResponse;

#[derive(Debug, Clone, FromRow)]
pub struct Conversation {
    pub id: Uuid,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Membership row. The display attributes are copied when the user joins and
/// are not refreshed afterwards.
#[derive(Debug, Clone, FromRow)]
pub struct Participant {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub joined_at: DateTime<Utc>,
    pub last_read_at: Option<DateTime<Utc>>,
}

impl Participant {
    pub fn joining(conversation_id: Uuid, user_id: Uuid, profile: Option<&UserProfile>, joined_at: DateTime<Utc>) -> Self {
        Self {
            conversation_id,
            user_id,
            username: profile.map(|p| p.username.clone()),
            display_name: profile.and_then(|p| p.display_name.clone()),
            avatar_url: profile.and_then(|p| p.avatar_url.clone()),
            joined_at,
            last_read_at: None,
        }
    }
}

/// Last known identity attributes of a user, taken from their token claims.
#[derive(Debug, Clone, FromRow)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Everything needed to persist a new conversation in one unit.
#[derive(Debug, Clone)]
pub struct NewConversation {
    pub id: Uuid,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub participants: Vec<Participant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantRemoval {
    NotParticipant,
    Removed { conversation_deleted: bool },
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantResponse {
    pub user_id: Uuid,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub joined_at: DateTime<Utc>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub is_online: bool,
}

impl ParticipantResponse {
    pub fn from_participant(participant: Participant, is_online: bool) -> Self {
        Self {
            user_id: participant.user_id,
            username: participant.username,
            display_name: participant.display_name,
            avatar_url: participant.avatar_url,
            joined_at: participant.joined_at,
            last_read_at: participant.last_read_at,
            is_online,
        }
    }

    fn label(&self) -> Option<&str> {
        self.display_name.as_deref().or(self.username.as_deref())
    }
}

/// Summary shape used by the conversation list.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResponse {
    pub id: Uuid,
    pub title: Option<String>,
    pub display_title: String,
    pub participants: Vec<ParticipantResponse>,
    pub last_message: Option<MessageResponse>,
    pub unread_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Detail shape; `messages` is oldest first.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDetailResponse {
    pub id: Uuid,
    pub title: Option<String>,
    pub display_title: String,
    pub participants: Vec<ParticipantResponse>,
    pub messages: Vec<MessageResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Title shown to `viewer_id`: the explicit title, otherwise the names of the
/// other participants.
pub fn display_title(title: Option<&str>, participants: &[ParticipantResponse], viewer_id: Uuid) -> String {
    if let Some(title) = title.map(str::trim).filter(|t| !t.is_empty()) {
        return title.to_string();
    }

    let names: Vec<&str> = participants
        .iter()
        .filter(|p| p.user_id != viewer_id)
        .filter_map(ParticipantResponse::label)
        .collect();

    if names.is_empty() {
        "Conversation".to_string()
    } else {
        names.join(", ")
    }
}
