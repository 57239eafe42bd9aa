use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::{
    conversation::{
        conversation_dto::{page_window, ConversationListResponse, CreateConversationRequest},
        conversation_models::{
            display_title, Conversation, ConversationDetailResponse, ConversationResponse,
            NewConversation, Participant, ParticipantRemoval, ParticipantResponse, UserProfile,
        },
        conversation_repository::ConversationRepository,
    },
    error::{AppError, Result},
    events::{DomainEvent, EventPublisher},
    membership::MembershipGuard,
    message::{
        message_dto::{SendMessageRequest, DEFAULT_MESSAGE_PAGE_SIZE},
        message_models::MessageResponse,
        message_repository::MessageRepository,
        MessageService,
    },
    websocket::{
        types::{ConversationRefPayload, ParticipantAddedPayload, ParticipantRemovedPayload, WsMessage},
        ConnectionManager,
    },
};

#[derive(Clone)]
pub struct ConversationService {
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    guard: MembershipGuard,
    message_service: MessageService,
    ws_manager: ConnectionManager,
    events: Arc<dyn EventPublisher>,
}

impl ConversationService {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        guard: MembershipGuard,
        message_service: MessageService,
        ws_manager: ConnectionManager,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            conversations,
            messages,
            guard,
            message_service,
            ws_manager,
            events,
        }
    }

    /// Creates the conversation with the creator always included, appends the
    /// optional first message and tells every participant's devices about it.
    pub async fn create_conversation(
        &self,
        creator: UserProfile,
        payload: CreateConversationRequest,
    ) -> Result<ConversationResponse> {
        payload.validate()?;

        let creator_id = creator.id;
        let title = payload
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let initial_message = payload.initial_message.filter(|m| !m.trim().is_empty());

        let mut member_ids = vec![creator_id];
        for user_id in payload.participant_ids {
            if !member_ids.contains(&user_id) {
                member_ids.push(user_id);
            }
        }

        let mut profiles: HashMap<Uuid, UserProfile> = self
            .conversations
            .find_profiles(&member_ids[1..])
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();
        profiles.insert(creator_id, creator);

        let conversation_id = Uuid::new_v4();
        let now = Utc::now();
        let participants = member_ids
            .iter()
            .map(|user_id| Participant::joining(conversation_id, *user_id, profiles.get(user_id), now))
            .collect();

        let mut conversation = self
            .conversations
            .create_conversation(NewConversation {
                id: conversation_id,
                title,
                created_at: now,
                participants,
            })
            .await?;

        tracing::info!(
            "Conversation {} created by {} with {} participants",
            conversation.id,
            creator_id,
            member_ids.len()
        );

        // Already committed: a failed first message is logged, not returned
        if let Some(content) = initial_message {
            match self
                .message_service
                .send_message(creator_id, conversation.id, SendMessageRequest::text(content))
                .await
            {
                Ok(_) => {
                    if let Some(refreshed) = self.conversations.find_by_id(conversation.id).await? {
                        conversation = refreshed;
                    }
                }
                Err(e) => tracing::warn!(
                    error = %e,
                    "Initial message for conversation {} was not stored",
                    conversation.id
                ),
            }
        }

        for user_id in &member_ids {
            self.ws_manager.send_to_user(
                user_id,
                WsMessage::NewConversation(ConversationRefPayload {
                    conversation_id: conversation.id,
                }),
            );
        }

        self.events
            .publish(DomainEvent::ConversationCreated {
                conversation_id: conversation.id,
                created_by: creator_id,
                participant_ids: member_ids,
            })
            .await;

        self.summarize(conversation, creator_id).await
    }

    /// Participants plus the latest messages, oldest first. Non-participants
    /// get `NotFound` so conversation ids are not leaked.
    pub async fn get_conversation_detail(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<ConversationDetailResponse> {
        if !self.guard.is_participant(conversation_id, user_id).await? {
            return Err(AppError::NotFound("Conversation not found".to_string()));
        }

        let conversation = self
            .conversations
            .find_by_id(conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))?;

        let participants = self.participant_responses(conversation_id).await?;

        let mut messages = self
            .messages
            .find_conversation_messages(conversation_id, DEFAULT_MESSAGE_PAGE_SIZE as i64, 0)
            .await?;
        messages.reverse();

        Ok(ConversationDetailResponse {
            id: conversation.id,
            display_title: display_title(conversation.title.as_deref(), &participants, user_id),
            title: conversation.title,
            participants,
            messages: messages.into_iter().map(MessageResponse::from).collect(),
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
            last_message_at: conversation.last_message_at,
        })
    }

    /// The user's conversations, most recently active first, plus how many of
    /// them hold unread messages.
    pub async fn list_user_conversations(
        &self,
        user_id: Uuid,
        page: u32,
        page_size: u32,
    ) -> Result<ConversationListResponse> {
        let (limit, offset) = page_window(page, page_size);
        let rows = self
            .conversations
            .find_user_conversations(user_id, limit, offset)
            .await?;

        let mut conversations = Vec::with_capacity(rows.len());
        for conversation in rows {
            conversations.push(self.summarize(conversation, user_id).await?);
        }

        let unread_count = self.conversations.count_conversations_with_unread(user_id).await?;

        Ok(ConversationListResponse {
            conversations,
            unread_count,
        })
    }

    /// Idempotent: an existing participant is returned unchanged and nothing
    /// is pushed.
    pub async fn add_participant(
        &self,
        requester_id: Uuid,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<ParticipantResponse> {
        self.guard.require_participant(conversation_id, requester_id).await?;

        let profile = self.conversations.find_profiles(&[user_id]).await?.into_iter().next();
        let (participant, created) = self
            .conversations
            .add_participant(Participant::joining(
                conversation_id,
                user_id,
                profile.as_ref(),
                Utc::now(),
            ))
            .await?;

        let response = ParticipantResponse::from_participant(participant, self.ws_manager.is_online(user_id));
        if !created {
            return Ok(response);
        }

        tracing::info!(
            "User {} added to conversation {} by {}",
            user_id,
            conversation_id,
            requester_id
        );

        // Includes the new member's own devices
        for member in self.conversations.list_participants(conversation_id).await? {
            self.ws_manager.send_to_user(
                &member.user_id,
                WsMessage::ParticipantAdded(ParticipantAddedPayload {
                    conversation_id,
                    participant: response.clone(),
                }),
            );
        }
        self.ws_manager.send_to_user(
            &user_id,
            WsMessage::NewConversation(ConversationRefPayload { conversation_id }),
        );

        self.events
            .publish(DomainEvent::ParticipantAdded {
                conversation_id,
                user_id,
                added_by: requester_id,
            })
            .await;

        Ok(response)
    }

    /// Any participant may remove any participant, and anyone may remove
    /// themselves. Returns false when the target was not a participant.
    pub async fn remove_participant(
        &self,
        requester_id: Uuid,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool> {
        if requester_id != user_id && !self.guard.is_participant(conversation_id, requester_id).await? {
            return Err(AppError::Forbidden(
                "You are not authorized to remove participants from this conversation".to_string(),
            ));
        }

        let conversation_deleted = match self
            .conversations
            .remove_participant(conversation_id, user_id)
            .await?
        {
            ParticipantRemoval::NotParticipant => return Ok(false),
            ParticipantRemoval::Removed { conversation_deleted } => conversation_deleted,
        };

        tracing::info!(
            "User {} removed from conversation {} by {}",
            user_id,
            conversation_id,
            requester_id
        );
        if conversation_deleted {
            tracing::info!("Conversation {} deleted with its last participant", conversation_id);
        }

        self.ws_manager.leave_conversation_for_user(user_id, conversation_id);

        let remaining = match self.conversations.list_participants(conversation_id).await {
            Ok(remaining) => remaining,
            Err(e) => {
                tracing::warn!(error = %e, "Could not load participants of {} for push", conversation_id);
                Vec::new()
            }
        };
        for member in remaining {
            self.ws_manager.send_to_user(
                &member.user_id,
                WsMessage::ParticipantRemoved(ParticipantRemovedPayload {
                    conversation_id,
                    user_id,
                }),
            );
        }
        self.ws_manager.send_to_user(
            &user_id,
            WsMessage::RemovedFromConversation(ConversationRefPayload { conversation_id }),
        );

        self.events
            .publish(DomainEvent::ParticipantRemoved {
                conversation_id,
                user_id,
                removed_by: requester_id,
            })
            .await;

        Ok(true)
    }

    /// Moves the caller's read cursor forward to `read_at` (default now). An
    /// earlier timestamp leaves the cursor where it is; a future one is
    /// capped at now.
    pub async fn mark_conversation_read(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        read_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        self.guard.require_participant(conversation_id, user_id).await?;

        let now = Utc::now();
        let read_at = read_at.map_or(now, |requested| requested.min(now));

        let advanced = self
            .conversations
            .advance_read_cursor(conversation_id, user_id, read_at)
            .await?;
        if !advanced {
            return Err(AppError::Forbidden(
                "You are not a participant in this conversation".to_string(),
            ));
        }

        Ok(true)
    }

    /// Number of conversations with at least one unread message, not the
    /// number of unread messages.
    pub async fn unread_conversations_count(&self, user_id: Uuid) -> Result<i64> {
        self.conversations.count_conversations_with_unread(user_id).await
    }

    async fn participant_responses(&self, conversation_id: Uuid) -> Result<Vec<ParticipantResponse>> {
        Ok(self
            .conversations
            .list_participants(conversation_id)
            .await?
            .into_iter()
            .map(|p| {
                let is_online = self.ws_manager.is_online(p.user_id);
                ParticipantResponse::from_participant(p, is_online)
            })
            .collect())
    }

    async fn summarize(&self, conversation: Conversation, viewer_id: Uuid) -> Result<ConversationResponse> {
        let participants = self.participant_responses(conversation.id).await?;
        let last_message = self
            .messages
            .find_conversation_messages(conversation.id, 1, 0)
            .await?
            .into_iter()
            .next()
            .map(MessageResponse::from);
        let unread_count = self.messages.count_unread(conversation.id, viewer_id).await?;

        Ok(ConversationResponse {
            id: conversation.id,
            display_title: display_title(conversation.title.as_deref(), &participants, viewer_id),
            title: conversation.title,
            participants,
            last_message,
            unread_count,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
            last_message_at: conversation.last_message_at,
        })
    }
}
