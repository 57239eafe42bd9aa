use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    conversation::conversation_models::ParticipantResponse,
    message::message_models::MessageResponse,
};

/// Server-to-client push events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum WsMessage {
    /// User group: a conversation appeared for this user; the client re-fetches it.
    NewConversation(ConversationRefPayload),
    /// Conversation group: a message to render inline.
    ReceiveMessage(MessageResponse),
    /// User group of every participant except the sender.
    NewMessage(NewMessagePayload),
    ParticipantAdded(ParticipantAddedPayload),
    ParticipantRemoved(ParticipantRemovedPayload),
    RemovedFromConversation(ConversationRefPayload),
    MessageDeleted(MessageDeletedPayload),
    /// Conversation group, excluding the typing connection.
    UserTyping(UserTypingPayload),
    Error(ErrorPayload),
    Ping,
    Pong,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRefPayload {
    pub conversation_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewMessagePayload {
    pub conversation_id: Uuid,
    pub message: MessageResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantAddedPayload {
    pub conversation_id: Uuid,
    pub participant: ParticipantResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRemovedPayload {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeletedPayload {
    pub conversation_id: Uuid,
    pub message_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserTypingPayload {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorPayload {
    pub message: String,
}

// Client-to-server messages
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    JoinConversation {
        conversation_id: Uuid,
    },
    LeaveConversation {
        conversation_id: Uuid,
    },
    Typing {
        conversation_id: Uuid,
    },
    SendMessage {
        conversation_id: Uuid,
        content: String,
        #[serde(default)]
        attachment_urls: Vec<String>,
    },
    Ping,
}
