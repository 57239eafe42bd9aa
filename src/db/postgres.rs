use axum::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::{
    conversation::{
        conversation_models::{Conversation, NewConversation, Participant, ParticipantRemoval, UserProfile},
        conversation_repository::ConversationRepository,
    },
    error::{AppError, Result},
    message::{
        message_models::{Message, NewMessage},
        message_repository::MessageRepository,
    },
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Row lock on the conversation for the rest of the transaction. False when
/// the conversation does not exist.
async fn lock_conversation(tx: &mut Transaction<'_, Postgres>, conversation_id: Uuid) -> Result<bool> {
    let locked: Option<Uuid> = sqlx::query_scalar("SELECT id FROM conversations WHERE id = $1 FOR UPDATE")
        .bind(conversation_id)
        .fetch_optional(&mut **tx)
        .await?;

    Ok(locked.is_some())
}

#[async_trait]
impl ConversationRepository for PgStore {
    async fn create_conversation(&self, new: NewConversation) -> Result<Conversation> {
        let mut tx = self.pool.begin().await?;

        let conversation = sqlx::query_as::<_, Conversation>(
            "INSERT INTO conversations (id, title, created_at, updated_at)
             VALUES ($1, $2, $3, $3)
             RETURNING *",
        )
        .bind(new.id)
        .bind(new.title.as_deref())
        .bind(new.created_at)
        .fetch_one(&mut *tx)
        .await?;

        for participant in &new.participants {
            sqlx::query(
                "INSERT INTO conversation_participants
                    (conversation_id, user_id, username, display_name, avatar_url, joined_at)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (conversation_id, user_id) DO NOTHING",
            )
            .bind(conversation.id)
            .bind(participant.user_id)
            .bind(participant.username.as_deref())
            .bind(participant.display_name.as_deref())
            .bind(participant.avatar_url.as_deref())
            .bind(participant.joined_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(conversation)
    }

    async fn find_by_id(&self, conversation_id: Uuid) -> Result<Option<Conversation>> {
        let conversation = sqlx::query_as::<_, Conversation>("SELECT * FROM conversations WHERE id = $1")
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(conversation)
    }

    async fn find_user_conversations(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Conversation>> {
        let conversations = sqlx::query_as::<_, Conversation>(
            "SELECT c.* FROM conversations c
             INNER JOIN conversation_participants cp ON cp.conversation_id = c.id
             WHERE cp.user_id = $1
             ORDER BY c.updated_at DESC, c.id
             LIMIT $2 OFFSET $3",
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(conversations)
    }

    async fn is_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                SELECT 1 FROM conversation_participants
                WHERE conversation_id = $1 AND user_id = $2
             )",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn find_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Participant>> {
        let participant = sqlx::query_as::<_, Participant>(
            "SELECT * FROM conversation_participants
             WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(participant)
    }

    async fn list_participants(&self, conversation_id: Uuid) -> Result<Vec<Participant>> {
        let participants = sqlx::query_as::<_, Participant>(
            "SELECT * FROM conversation_participants
             WHERE conversation_id = $1
             ORDER BY joined_at ASC, user_id",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(participants)
    }

    async fn add_participant(&self, participant: Participant) -> Result<(Participant, bool)> {
        let mut tx = self.pool.begin().await?;

        if !lock_conversation(&mut tx, participant.conversation_id).await? {
            tx.rollback().await?;
            return Err(AppError::NotFound("Conversation not found".to_string()));
        }

        let inserted = sqlx::query_as::<_, Participant>(
            "INSERT INTO conversation_participants
                (conversation_id, user_id, username, display_name, avatar_url, joined_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (conversation_id, user_id) DO NOTHING
             RETURNING *",
        )
        .bind(participant.conversation_id)
        .bind(participant.user_id)
        .bind(participant.username.as_deref())
        .bind(participant.display_name.as_deref())
        .bind(participant.avatar_url.as_deref())
        .bind(participant.joined_at)
        .fetch_optional(&mut *tx)
        .await?;

        let result = match inserted {
            Some(row) => (row, true),
            None => {
                let existing = sqlx::query_as::<_, Participant>(
                    "SELECT * FROM conversation_participants
                     WHERE conversation_id = $1 AND user_id = $2",
                )
                .bind(participant.conversation_id)
                .bind(participant.user_id)
                .fetch_one(&mut *tx)
                .await?;
                (existing, false)
            }
        };

        tx.commit().await?;

        Ok(result)
    }

    async fn remove_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<ParticipantRemoval> {
        let mut tx = self.pool.begin().await?;

        // Serializes removals so two last leavers cannot both count a survivor
        if !lock_conversation(&mut tx, conversation_id).await? {
            tx.rollback().await?;
            return Ok(ParticipantRemoval::NotParticipant);
        }

        let removed = sqlx::query(
            "DELETE FROM conversation_participants
             WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if removed == 0 {
            tx.rollback().await?;
            return Ok(ParticipantRemoval::NotParticipant);
        }

        let remaining: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM conversation_participants WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .fetch_one(&mut *tx)
        .await?;

        let conversation_deleted = remaining == 0;
        if conversation_deleted {
            sqlx::query("DELETE FROM conversations WHERE id = $1")
                .bind(conversation_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(ParticipantRemoval::Removed { conversation_deleted })
    }

    async fn advance_read_cursor(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        read_at: DateTime<Utc>,
    ) -> Result<bool> {
        // GREATEST ignores NULL, so an unset cursor takes read_at
        let result = sqlx::query(
            "UPDATE conversation_participants
             SET last_read_at = GREATEST(last_read_at, $3)
             WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(read_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_conversations_with_unread(&self, user_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM conversation_participants cp
             WHERE cp.user_id = $1
               AND EXISTS (
                   SELECT 1 FROM messages m
                   WHERE m.conversation_id = cp.conversation_id
                     AND m.sender_id <> $1
                     AND (cp.last_read_at IS NULL OR m.created_at > cp.last_read_at)
               )",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn upsert_profile(&self, profile: UserProfile) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_profiles (id, username, display_name, avatar_url, updated_at)
             VALUES ($1, $2, $3, $4, NOW())
             ON CONFLICT (id) DO UPDATE SET
                username = EXCLUDED.username,
                display_name = EXCLUDED.display_name,
                avatar_url = EXCLUDED.avatar_url,
                updated_at = NOW()
             WHERE user_profiles.username IS DISTINCT FROM EXCLUDED.username
                OR user_profiles.display_name IS DISTINCT FROM EXCLUDED.display_name
                OR user_profiles.avatar_url IS DISTINCT FROM EXCLUDED.avatar_url",
        )
        .bind(profile.id)
        .bind(&profile.username)
        .bind(profile.display_name.as_deref())
        .bind(profile.avatar_url.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_profiles(&self, user_ids: &[Uuid]) -> Result<Vec<UserProfile>> {
        let profiles = sqlx::query_as::<_, UserProfile>(
            "SELECT id, username, display_name, avatar_url FROM user_profiles WHERE id = ANY($1)",
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(profiles)
    }
}

#[async_trait]
impl MessageRepository for PgStore {
    async fn append(&self, new: NewMessage) -> Result<Option<Message>> {
        let mut tx = self.pool.begin().await?;

        // Conversation row first, then the sender's row: the same order as
        // participant changes take them
        if !lock_conversation(&mut tx, new.conversation_id).await? {
            tx.rollback().await?;
            return Ok(None);
        }

        let sender = sqlx::query_as::<_, Participant>(
            "SELECT * FROM conversation_participants
             WHERE conversation_id = $1 AND user_id = $2
             FOR UPDATE",
        )
        .bind(new.conversation_id)
        .bind(new.sender_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(sender) = sender else {
            tx.rollback().await?;
            return Ok(None);
        };

        let message = sqlx::query_as::<_, Message>(
            "INSERT INTO messages
                (id, conversation_id, sender_id, sender_username, sender_display_name,
                 sender_avatar_url, content, attachment_urls, is_read, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE, $9)
             RETURNING *",
        )
        .bind(new.id)
        .bind(new.conversation_id)
        .bind(new.sender_id)
        .bind(sender.username.as_deref())
        .bind(sender.display_name.as_deref())
        .bind(sender.avatar_url.as_deref())
        .bind(&new.content)
        .bind(&new.attachment_urls)
        .bind(new.created_at)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE conversations
             SET last_message_at = GREATEST(last_message_at, $2),
                 updated_at = GREATEST(updated_at, $2)
             WHERE id = $1",
        )
        .bind(message.conversation_id)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE conversation_participants
             SET last_read_at = GREATEST(last_read_at, $3)
             WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(message.conversation_id)
        .bind(message.sender_id)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(message))
    }

    async fn find_by_id(&self, message_id: Uuid) -> Result<Option<Message>> {
        let message = sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = $1")
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(message)
    }

    async fn find_conversation_messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>> {
        let messages = sqlx::query_as::<_, Message>(
            "SELECT * FROM messages
             WHERE conversation_id = $1
             ORDER BY created_at DESC, seq DESC
             LIMIT $2 OFFSET $3",
        )
        .bind(conversation_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    async fn count_unread(&self, conversation_id: Uuid, user_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages m
             INNER JOIN conversation_participants cp
                ON cp.conversation_id = m.conversation_id AND cp.user_id = $2
             WHERE m.conversation_id = $1
               AND m.sender_id <> $2
               AND (cp.last_read_at IS NULL OR m.created_at > cp.last_read_at)",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn delete(&self, message_id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let conversation_id: Option<Uuid> = sqlx::query_scalar(
            "DELETE FROM messages WHERE id = $1 RETURNING conversation_id",
        )
        .bind(message_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(conversation_id) = conversation_id else {
            tx.rollback().await?;
            return Ok(false);
        };

        sqlx::query(
            "UPDATE conversations
             SET last_message_at = (
                SELECT MAX(created_at) FROM messages WHERE conversation_id = $1
             )
             WHERE id = $1",
        )
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(true)
    }
}
