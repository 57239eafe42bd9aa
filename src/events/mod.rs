pub mod publisher;

pub use publisher::{DomainEvent, EventPublisher, LogEventPublisher, NatsEventPublisher};
