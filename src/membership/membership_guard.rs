use std::sync::Arc;

use uuid::Uuid;

use crate::{
    conversation::conversation_repository::ConversationRepository,
    error::{AppError, Result},
};

/// Answers "is this user a participant of this conversation". Every
/// participant-only operation goes through here first.
#[derive(Clone)]
pub struct MembershipGuard {
    repo: Arc<dyn ConversationRepository>,
}

impl MembershipGuard {
    pub fn new(repo: Arc<dyn ConversationRepository>) -> Self {
        Self { repo }
    }

    pub async fn is_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.repo.is_participant(conversation_id, user_id).await
    }

    /// `NotFound` if the conversation does not exist, `Forbidden` if it does
    /// and `user_id` is not in it.
    pub async fn require_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<()> {
        if self.repo.is_participant(conversation_id, user_id).await? {
            return Ok(());
        }

        if self.repo.find_by_id(conversation_id).await?.is_none() {
            return Err(AppError::NotFound("Conversation not found".to_string()));
        }

        Err(AppError::Forbidden(
            "You are not a participant in this conversation".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::conversation_models::{NewConversation, Participant};
    use crate::db::MemoryStore;
    use chrono::Utc;

    #[tokio::test]
    async fn test_require_participant_distinguishes_missing_from_forbidden() {
        let store = Arc::new(MemoryStore::new());
        let guard = MembershipGuard::new(store.clone());
        let member = Uuid::new_v4();
        let conversation_id = Uuid::new_v4();
        let now = Utc::now();

        store
            .create_conversation(NewConversation {
                id: conversation_id,
                title: None,
                created_at: now,
                participants: vec![Participant::joining(conversation_id, member, None, now)],
            })
            .await
            .unwrap();

        assert!(guard.is_participant(conversation_id, member).await.unwrap());
        assert!(guard.require_participant(conversation_id, member).await.is_ok());
        assert!(matches!(
            guard.require_participant(conversation_id, Uuid::new_v4()).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            guard.require_participant(Uuid::new_v4(), member).await,
            Err(AppError::NotFound(_))
        ));
    }
}
