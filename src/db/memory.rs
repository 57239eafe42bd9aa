//! In-process store used when no `DATABASE_URL` is configured, and by tests.
//!
//! Every mutation runs under one write lock, which gives the same
//! all-or-nothing behaviour the Postgres store gets from transactions.

use std::collections::HashMap;

use axum::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
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

#[derive(Default)]
struct Tables {
    conversations: HashMap<Uuid, Conversation>,
    // conversation_id -> rows in join order
    participants: HashMap<Uuid, Vec<Participant>>,
    messages: HashMap<Uuid, Message>,
    profiles: HashMap<Uuid, UserProfile>,
    next_seq: i64,
}

impl Tables {
    fn participant(&self, conversation_id: Uuid, user_id: Uuid) -> Option<&Participant> {
        self.participants
            .get(&conversation_id)?
            .iter()
            .find(|p| p.user_id == user_id)
    }

    fn participant_mut(&mut self, conversation_id: Uuid, user_id: Uuid) -> Option<&mut Participant> {
        self.participants
            .get_mut(&conversation_id)?
            .iter_mut()
            .find(|p| p.user_id == user_id)
    }

    fn unread_for(&self, participant: &Participant) -> impl Iterator<Item = &Message> + '_ {
        let conversation_id = participant.conversation_id;
        let user_id = participant.user_id;
        let cursor = participant.last_read_at;
        self.messages.values().filter(move |m| {
            m.conversation_id == conversation_id
                && m.sender_id != user_id
                && cursor.map_or(true, |read_at| m.created_at > read_at)
        })
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationRepository for MemoryStore {
    async fn create_conversation(&self, new: NewConversation) -> Result<Conversation> {
        let mut tables = self.tables.write().await;

        let conversation = Conversation {
            id: new.id,
            title: new.title,
            created_at: new.created_at,
            updated_at: new.created_at,
            last_message_at: None,
        };

        let mut rows: Vec<Participant> = Vec::with_capacity(new.participants.len());
        for mut participant in new.participants {
            if rows.iter().any(|p| p.user_id == participant.user_id) {
                continue;
            }
            participant.conversation_id = conversation.id;
            rows.push(participant);
        }

        tables.participants.insert(conversation.id, rows);
        tables.conversations.insert(conversation.id, conversation.clone());

        Ok(conversation)
    }

    async fn find_by_id(&self, conversation_id: Uuid) -> Result<Option<Conversation>> {
        let tables = self.tables.read().await;
        Ok(tables.conversations.get(&conversation_id).cloned())
    }

    async fn find_user_conversations(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Conversation>> {
        let tables = self.tables.read().await;

        let mut conversations: Vec<Conversation> = tables
            .participants
            .iter()
            .filter(|(_, rows)| rows.iter().any(|p| p.user_id == user_id))
            .filter_map(|(id, _)| tables.conversations.get(id).cloned())
            .collect();

        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));

        Ok(conversations
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn is_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool> {
        let tables = self.tables.read().await;
        Ok(tables.participant(conversation_id, user_id).is_some())
    }

    async fn find_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Participant>> {
        let tables = self.tables.read().await;
        Ok(tables.participant(conversation_id, user_id).cloned())
    }

    async fn list_participants(&self, conversation_id: Uuid) -> Result<Vec<Participant>> {
        let tables = self.tables.read().await;
        Ok(tables
            .participants
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_participant(&self, participant: Participant) -> Result<(Participant, bool)> {
        let mut tables = self.tables.write().await;

        if !tables.conversations.contains_key(&participant.conversation_id) {
            return Err(AppError::NotFound("Conversation not found".to_string()));
        }

        if let Some(existing) = tables.participant(participant.conversation_id, participant.user_id) {
            return Ok((existing.clone(), false));
        }

        tables
            .participants
            .entry(participant.conversation_id)
            .or_default()
            .push(participant.clone());

        Ok((participant, true))
    }

    async fn remove_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<ParticipantRemoval> {
        let mut tables = self.tables.write().await;

        let Some(rows) = tables.participants.get_mut(&conversation_id) else {
            return Ok(ParticipantRemoval::NotParticipant);
        };

        let before = rows.len();
        rows.retain(|p| p.user_id != user_id);
        if rows.len() == before {
            return Ok(ParticipantRemoval::NotParticipant);
        }

        let conversation_deleted = rows.is_empty();
        if conversation_deleted {
            tables.participants.remove(&conversation_id);
            tables.conversations.remove(&conversation_id);
            tables.messages.retain(|_, m| m.conversation_id != conversation_id);
        }

        Ok(ParticipantRemoval::Removed { conversation_deleted })
    }

    async fn advance_read_cursor(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        read_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;

        let Some(participant) = tables.participant_mut(conversation_id, user_id) else {
            return Ok(false);
        };

        if participant.last_read_at.map_or(true, |current| current < read_at) {
            participant.last_read_at = Some(read_at);
        }

        Ok(true)
    }

    async fn count_conversations_with_unread(&self, user_id: Uuid) -> Result<i64> {
        let tables = self.tables.read().await;

        let count = tables
            .participants
            .values()
            .filter_map(|rows| rows.iter().find(|p| p.user_id == user_id))
            .filter(|participant| tables.unread_for(participant).next().is_some())
            .count();

        Ok(count as i64)
    }

    async fn upsert_profile(&self, profile: UserProfile) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.profiles.insert(profile.id, profile);
        Ok(())
    }

    async fn find_profiles(&self, user_ids: &[Uuid]) -> Result<Vec<UserProfile>> {
        let tables = self.tables.read().await;
        Ok(user_ids
            .iter()
            .filter_map(|id| tables.profiles.get(id).cloned())
            .collect())
    }
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn append(&self, new: NewMessage) -> Result<Option<Message>> {
        let mut tables = self.tables.write().await;

        let Some(sender) = tables.participant(new.conversation_id, new.sender_id).cloned() else {
            return Ok(None);
        };

        tables.next_seq += 1;
        let message = Message {
            id: new.id,
            seq: tables.next_seq,
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            sender_username: sender.username,
            sender_display_name: sender.display_name,
            sender_avatar_url: sender.avatar_url,
            content: new.content,
            attachment_urls: new.attachment_urls,
            is_read: false,
            created_at: new.created_at,
        };

        if let Some(conversation) = tables.conversations.get_mut(&message.conversation_id) {
            conversation.last_message_at = Some(
                conversation
                    .last_message_at
                    .map_or(message.created_at, |at| at.max(message.created_at)),
            );
            conversation.updated_at = conversation.updated_at.max(message.created_at);
        }

        if let Some(participant) = tables.participant_mut(message.conversation_id, message.sender_id) {
            if participant.last_read_at.map_or(true, |at| at < message.created_at) {
                participant.last_read_at = Some(message.created_at);
            }
        }

        tables.messages.insert(message.id, message.clone());

        Ok(Some(message))
    }

    async fn find_by_id(&self, message_id: Uuid) -> Result<Option<Message>> {
        let tables = self.tables.read().await;
        Ok(tables.messages.get(&message_id).cloned())
    }

    async fn find_conversation_messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>> {
        let tables = self.tables.read().await;

        let mut messages: Vec<Message> = tables
            .messages
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();

        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.seq.cmp(&a.seq)));

        Ok(messages
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count_unread(&self, conversation_id: Uuid, user_id: Uuid) -> Result<i64> {
        let tables = self.tables.read().await;

        let Some(participant) = tables.participant(conversation_id, user_id) else {
            return Ok(0);
        };

        Ok(tables.unread_for(participant).count() as i64)
    }

    async fn delete(&self, message_id: Uuid) -> Result<bool> {
        let mut tables = self.tables.write().await;

        let Some(removed) = tables.messages.remove(&message_id) else {
            return Ok(false);
        };

        let last_message_at = tables
            .messages
            .values()
            .filter(|m| m.conversation_id == removed.conversation_id)
            .map(|m| m.created_at)
            .max();

        if let Some(conversation) = tables.conversations.get_mut(&removed.conversation_id) {
            conversation.last_message_at = last_message_at;
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn seeded(store: &MemoryStore, users: &[Uuid]) -> Uuid {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let participants = users
            .iter()
            .map(|user| Participant::joining(id, *user, None, now))
            .collect();
        store
            .create_conversation(NewConversation { id, title: None, created_at: now, participants })
            .await
            .unwrap();
        id
    }

    fn new_message(conversation_id: Uuid, sender_id: Uuid, created_at: DateTime<Utc>) -> NewMessage {
        NewMessage {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            content: "hello".to_string(),
            attachment_urls: Vec::new(),
            created_at,
        }
    }

    #[tokio::test]
    async fn test_append_updates_conversation_and_sender_cursor() {
        let store = MemoryStore::new();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation_id = seeded(&store, &[alice, bob]).await;

        let at = Utc::now() + Duration::seconds(5);
        let message = store
            .append(new_message(conversation_id, alice, at))
            .await
            .unwrap()
            .unwrap();

        let conversation = ConversationRepository::find_by_id(&store, conversation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conversation.last_message_at, Some(message.created_at));
        assert_eq!(conversation.updated_at, message.created_at);

        let sender = store.find_participant(conversation_id, alice).await.unwrap().unwrap();
        assert_eq!(sender.last_read_at, Some(message.created_at));
        assert_eq!(store.count_unread(conversation_id, bob).await.unwrap(), 1);
        assert_eq!(store.count_unread(conversation_id, alice).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_last_leavers_delete_the_conversation() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation_id = seeded(&store, &[alice, bob]).await;

        let leavers = [alice, bob].map(|user| {
            let store = store.clone();
            tokio::spawn(async move { store.remove_participant(conversation_id, user).await })
        });

        let mut deleted = 0;
        for leaver in leavers {
            match leaver.await.unwrap().unwrap() {
                ParticipantRemoval::Removed { conversation_deleted } => deleted += conversation_deleted as usize,
                ParticipantRemoval::NotParticipant => panic!("both users were participants"),
            }
        }

        assert_eq!(deleted, 1);
        assert!(ConversationRepository::find_by_id(&*store, conversation_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_add_to_deleted_conversation_is_not_found() {
        let store = MemoryStore::new();
        let alice = Uuid::new_v4();
        let conversation_id = seeded(&store, &[alice]).await;
        store.remove_participant(conversation_id, alice).await.unwrap();

        let result = store
            .add_participant(Participant::joining(conversation_id, Uuid::new_v4(), None, Utc::now()))
            .await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert!(store.list_participants(conversation_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_by_outsider_writes_nothing() {
        let store = MemoryStore::new();
        let conversation_id = seeded(&store, &[Uuid::new_v4()]).await;

        let result = store
            .append(new_message(conversation_id, Uuid::new_v4(), Utc::now()))
            .await
            .unwrap();

        assert!(result.is_none());
        assert!(store
            .find_conversation_messages(conversation_id, 50, 0)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_equal_timestamps_keep_insertion_order() {
        let store = MemoryStore::new();
        let alice = Uuid::new_v4();
        let conversation_id = seeded(&store, &[alice]).await;
        let at = Utc::now();

        let first = store.append(new_message(conversation_id, alice, at)).await.unwrap().unwrap();
        let second = store.append(new_message(conversation_id, alice, at)).await.unwrap().unwrap();

        let newest_first = store.find_conversation_messages(conversation_id, 50, 0).await.unwrap();
        let ids: Vec<Uuid> = newest_first.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn test_read_cursor_never_moves_backwards() {
        let store = MemoryStore::new();
        let alice = Uuid::new_v4();
        let conversation_id = seeded(&store, &[alice]).await;
        let later = Utc::now();
        let earlier = later - Duration::minutes(10);

        assert!(store.advance_read_cursor(conversation_id, alice, later).await.unwrap());
        assert!(store.advance_read_cursor(conversation_id, alice, earlier).await.unwrap());

        let participant = store.find_participant(conversation_id, alice).await.unwrap().unwrap();
        assert_eq!(participant.last_read_at, Some(later));
        assert!(!store
            .advance_read_cursor(conversation_id, Uuid::new_v4(), later)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_last_participant_leaving_deletes_conversation() {
        let store = MemoryStore::new();
        let alice = Uuid::new_v4();
        let conversation_id = seeded(&store, &[alice]).await;
        store.append(new_message(conversation_id, alice, Utc::now())).await.unwrap();

        let outcome = store.remove_participant(conversation_id, alice).await.unwrap();

        assert_eq!(outcome, ParticipantRemoval::Removed { conversation_deleted: true });
        assert!(ConversationRepository::find_by_id(&store, conversation_id)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_conversation_messages(conversation_id, 50, 0)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_delete_recomputes_last_message_at() {
        let store = MemoryStore::new();
        let alice = Uuid::new_v4();
        let conversation_id = seeded(&store, &[alice]).await;
        let t1 = Utc::now();
        let t2 = t1 + Duration::seconds(1);

        store.append(new_message(conversation_id, alice, t1)).await.unwrap();
        let latest = store.append(new_message(conversation_id, alice, t2)).await.unwrap().unwrap();

        assert!(store.delete(latest.id).await.unwrap());
        assert!(!store.delete(latest.id).await.unwrap());

        let conversation = ConversationRepository::find_by_id(&store, conversation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conversation.last_message_at, Some(t1));
    }
}
