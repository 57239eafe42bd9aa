use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;
use validator::Validate;

use crate::{
    conversation::{conversation_dto::page_window, conversation_repository::ConversationRepository},
    error::{AppError, Result},
    events::{DomainEvent, EventPublisher},
    membership::MembershipGuard,
    message::{
        message_dto::SendMessageRequest,
        message_models::{Message, MessageResponse, NewMessage},
        message_repository::MessageRepository,
    },
    websocket::{
        types::{MessageDeletedPayload, NewMessagePayload, WsMessage},
        ConnectionManager,
    },
};

#[derive(Clone)]
pub struct MessageService {
    messages: Arc<dyn MessageRepository>,
    conversations: Arc<dyn ConversationRepository>,
    guard: MembershipGuard,
    ws_manager: ConnectionManager,
    events: Arc<dyn EventPublisher>,
}

impl MessageService {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        conversations: Arc<dyn ConversationRepository>,
        guard: MembershipGuard,
        ws_manager: ConnectionManager,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            messages,
            conversations,
            guard,
            ws_manager,
            events,
        }
    }

    /// Persists the message, then pushes it to the conversation group and to
    /// the user group of every other participant.
    pub async fn send_message(
        &self,
        sender_id: Uuid,
        conversation_id: Uuid,
        payload: SendMessageRequest,
    ) -> Result<Message> {
        payload.validate()?;
        self.guard.require_participant(conversation_id, sender_id).await?;

        let message = self
            .messages
            .append(NewMessage {
                id: Uuid::new_v4(),
                conversation_id,
                sender_id,
                content: payload.content,
                attachment_urls: payload.attachment_urls,
                created_at: Utc::now(),
            })
            .await?
            // Membership was revoked between the check and the write
            .ok_or_else(not_a_participant)?;

        tracing::debug!(
            "Message {} appended to conversation {} by {}",
            message.id,
            conversation_id,
            sender_id
        );

        self.dispatch_new_message(&message).await;
        self.events
            .publish(DomainEvent::MessageSent {
                conversation_id,
                message_id: message.id,
                sender_id,
            })
            .await;

        Ok(message)
    }

    async fn dispatch_new_message(&self, message: &Message) {
        let response = MessageResponse::from(message.clone());

        self.ws_manager.send_to_conversation(
            &message.conversation_id,
            WsMessage::ReceiveMessage(response.clone()),
            None,
        );

        let participants = match self.conversations.list_participants(message.conversation_id).await {
            Ok(participants) => participants,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Could not load participants of {} for push",
                    message.conversation_id
                );
                return;
            }
        };

        for participant in participants.iter().filter(|p| p.user_id != message.sender_id) {
            self.ws_manager.send_to_user(
                &participant.user_id,
                WsMessage::NewMessage(NewMessagePayload {
                    conversation_id: message.conversation_id,
                    message: response.clone(),
                }),
            );
        }
    }

    /// One page of the conversation, oldest first. Page 1 holds the most
    /// recent messages.
    pub async fn get_conversation_messages(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Message>> {
        self.guard.require_participant(conversation_id, user_id).await?;

        let (limit, offset) = page_window(page, page_size);
        let mut messages = self
            .messages
            .find_conversation_messages(conversation_id, limit, offset)
            .await?;
        messages.reverse();

        Ok(messages)
    }

    pub async fn get_message(&self, user_id: Uuid, conversation_id: Uuid, message_id: Uuid) -> Result<Message> {
        let message = self.find_in_conversation(conversation_id, message_id).await?;
        self.guard.require_participant(conversation_id, user_id).await?;
        Ok(message)
    }

    /// Advances the caller's read cursor to the message. Reading your own
    /// message is a no-op.
    pub async fn mark_message_read(&self, user_id: Uuid, conversation_id: Uuid, message_id: Uuid) -> Result<bool> {
        let message = self.find_in_conversation(conversation_id, message_id).await?;
        self.guard.require_participant(conversation_id, user_id).await?;

        if message.sender_id == user_id {
            return Ok(true);
        }

        let advanced = self
            .conversations
            .advance_read_cursor(conversation_id, user_id, message.created_at)
            .await?;
        if !advanced {
            return Err(not_a_participant());
        }

        Ok(true)
    }

    /// Hard delete, sender only.
    pub async fn delete_message(&self, user_id: Uuid, conversation_id: Uuid, message_id: Uuid) -> Result<bool> {
        let message = self.find_in_conversation(conversation_id, message_id).await?;

        if message.sender_id != user_id {
            return Err(AppError::Forbidden(
                "You can only delete your own messages".to_string(),
            ));
        }

        if !self.messages.delete(message_id).await? {
            return Err(AppError::NotFound("Message not found".to_string()));
        }

        tracing::debug!("Message {} deleted by {}", message_id, user_id);

        self.ws_manager.send_to_conversation(
            &conversation_id,
            WsMessage::MessageDeleted(MessageDeletedPayload {
                conversation_id,
                message_id,
            }),
            None,
        );
        self.events
            .publish(DomainEvent::MessageDeleted {
                conversation_id,
                message_id,
                deleted_by: user_id,
            })
            .await;

        Ok(true)
    }

    async fn find_in_conversation(&self, conversation_id: Uuid, message_id: Uuid) -> Result<Message> {
        self.messages
            .find_by_id(message_id)
            .await?
            .filter(|m| m.conversation_id == conversation_id)
            .ok_or_else(|| AppError::NotFound("Message not found".to_string()))
    }
}

fn not_a_participant() -> AppError {
    AppError::Forbidden("You are not a participant in this conversation".to_string())
}
