pub mod conversation_dto;
pub mod conversation_handlers;
pub mod conversation_models;
pub mod conversation_repository;
pub mod conversation_service;

pub use conversation_repository::ConversationRepository;
pub use conversation_service::ConversationService;
