use axum::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;

use super::conversation_models::{
    Conversation, NewConversation, Participant, ParticipantRemoval, UserProfile,
};

/// Persistence seam for conversations, participants and the profile cache.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Inserts the conversation and all of its participant rows atomically.
    async fn create_conversation(&self, new: NewConversation) -> Result<Conversation>;

    async fn find_by_id(&self, conversation_id: Uuid) -> Result<Option<Conversation>>;

    /// Conversations `user_id` participates in, most recently updated first.
    async fn find_user_conversations(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Conversation>>;

    async fn is_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool>;

    async fn find_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Participant>>;

    /// Participants in join order.
    async fn list_participants(&self, conversation_id: Uuid) -> Result<Vec<Participant>>;

    /// Inserts the row unless the user is already a participant. Returns the
    /// stored row and whether it was created by this call.
    async fn add_participant(&self, participant: Participant) -> Result<(Participant, bool)>;

    /// Removes the row; the conversation is deleted with its last participant.
    async fn remove_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<ParticipantRemoval>;

    /// Moves the read cursor to `read_at` unless it is already later.
    /// Returns false when the user is not a participant.
    async fn advance_read_cursor(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        read_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Number of the user's conversations holding at least one message from
    /// someone else that is newer than the user's read cursor.
    async fn count_conversations_with_unread(&self, user_id: Uuid) -> Result<i64>;

    async fn upsert_profile(&self, profile: UserProfile) -> Result<()>;

    async fn find_profiles(&self, user_ids: &[Uuid]) -> Result<Vec<UserProfile>>;
}
