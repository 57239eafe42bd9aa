use axum::async_trait;
use uuid::Uuid;

use crate::error::Result;

use super::message_models::{Message, NewMessage};

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Appends the message, bumps the conversation's `last_message_at` and
    /// `updated_at`, and advances the sender's read cursor, all in one unit.
    /// Returns `None` (and writes nothing) if the sender is not a participant.
    async fn append(&self, new: NewMessage) -> Result<Option<Message>>;

    async fn find_by_id(&self, message_id: Uuid) -> Result<Option<Message>>;

    /// Newest first.
    async fn find_conversation_messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>>;

    /// Messages from others newer than `user_id`'s read cursor. A missing
    /// cursor counts every message from others.
    async fn count_unread(&self, conversation_id: Uuid, user_id: Uuid) -> Result<i64>;

    /// Hard delete; `last_message_at` is recomputed from what remains.
    async fn delete(&self, message_id: Uuid) -> Result<bool>;
}
