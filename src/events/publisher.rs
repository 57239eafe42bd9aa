use axum::async_trait;
use serde::Serialize;
use uuid::Uuid;

/// Cross-service notifications emitted after a write commits.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all_fields = "camelCase")]
pub enum DomainEvent {
    #[serde(rename = "conversation.created")]
    ConversationCreated {
        conversation_id: Uuid,
        created_by: Uuid,
        participant_ids: Vec<Uuid>,
    },
    #[serde(rename = "message.sent")]
    MessageSent {
        conversation_id: Uuid,
        message_id: Uuid,
        sender_id: Uuid,
    },
    #[serde(rename = "message.deleted")]
    MessageDeleted {
        conversation_id: Uuid,
        message_id: Uuid,
        deleted_by: Uuid,
    },
    #[serde(rename = "participant.added")]
    ParticipantAdded {
        conversation_id: Uuid,
        user_id: Uuid,
        added_by: Uuid,
    },
    #[serde(rename = "participant.removed")]
    ParticipantRemoved {
        conversation_id: Uuid,
        user_id: Uuid,
        removed_by: Uuid,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::ConversationCreated { .. } => "conversation.created",
            DomainEvent::MessageSent { .. } => "message.sent",
            DomainEvent::MessageDeleted { .. } => "message.deleted",
            DomainEvent::ParticipantAdded { .. } => "participant.added",
            DomainEvent::ParticipantRemoved { .. } => "participant.removed",
        }
    }
}

/// Fire-and-forget sink. Implementations log failures instead of returning them.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: DomainEvent);
}

pub struct NatsEventPublisher {
    client: async_nats::Client,
    subject_prefix: String,
}

impl NatsEventPublisher {
    pub async fn connect(url: &str, subject_prefix: impl Into<String>) -> anyhow::Result<Self> {
        let client = async_nats::connect(url).await?;
        tracing::info!("Connected to NATS at {}", url);

        Ok(Self {
            client,
            subject_prefix: subject_prefix.into(),
        })
    }

    fn subject(&self, event: &DomainEvent) -> String {
        format!("{}.{}", self.subject_prefix, event.name())
    }
}

#[async_trait]
impl EventPublisher for NatsEventPublisher {
    async fn publish(&self, event: DomainEvent) {
        let subject = self.subject(&event);

        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Failed to encode {} event: {}", event.name(), e);
                return;
            }
        };

        if let Err(e) = self.client.publish(subject.clone(), payload.into()).await {
            tracing::warn!(error = %e, "Failed to publish event to {}", subject);
        }
    }
}

/// Used when no broker is configured.
#[derive(Default)]
pub struct LogEventPublisher;

#[async_trait]
impl EventPublisher for LogEventPublisher {
    async fn publish(&self, event: DomainEvent) {
        tracing::debug!(event = event.name(), "Domain event: {:?}", event);
    }
}

/// Keeps every published event in memory so tests can assert on them.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingPublisher {
    events: std::sync::Mutex<Vec<DomainEvent>>,
}

#[cfg(test)]
impl RecordingPublisher {
    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: DomainEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_is_tagged_with_its_name() {
        let conversation_id = Uuid::new_v4();
        let event = DomainEvent::MessageSent {
            conversation_id,
            message_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "message.sent");
        assert_eq!(json["conversationId"], conversation_id.to_string());
        assert_eq!(event.name(), "message.sent");
    }
}
