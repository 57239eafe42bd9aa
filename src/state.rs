use std::sync::Arc;

use anyhow::Context;

use crate::{
    conversation::{ConversationRepository, ConversationService},
    events::EventPublisher,
    membership::MembershipGuard,
    message::{message_repository::MessageRepository, MessageService},
    websocket::ConnectionManager,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ws_connections: ConnectionManager,
    pub conversation_repository: Arc<dyn ConversationRepository>,
    pub membership_guard: MembershipGuard,
    pub conversation_service: ConversationService,
    pub message_service: MessageService,
}

impl AppState {
    /// Wires the services over one store that backs both repositories.
    pub fn build<S>(config: Arc<Config>, store: Arc<S>, events: Arc<dyn EventPublisher>) -> Self
    where
        S: ConversationRepository + MessageRepository + 'static,
    {
        let conversation_repository: Arc<dyn ConversationRepository> = store.clone();
        let message_repository: Arc<dyn MessageRepository> = store;

        let ws_connections = ConnectionManager::new();
        let membership_guard = MembershipGuard::new(conversation_repository.clone());

        let message_service = MessageService::new(
            message_repository.clone(),
            conversation_repository.clone(),
            membership_guard.clone(),
            ws_connections.clone(),
            events.clone(),
        );
        let conversation_service = ConversationService::new(
            conversation_repository.clone(),
            message_repository,
            membership_guard.clone(),
            message_service.clone(),
            ws_connections.clone(),
            events,
        );

        Self {
            config,
            ws_connections,
            conversation_repository,
            membership_guard,
            conversation_service,
            message_service,
        }
    }
}

const DEFAULT_CORS_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://127.0.0.1:3000",
    "http://localhost:8080",
];

#[derive(Clone, Debug)]
pub struct Config {
    pub jwt_secret: String,
    /// Memory store when unset.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    /// Events are only logged when unset.
    pub nats_url: Option<String>,
    pub nats_subject_prefix: String,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jwt_secret = var("JWT_SECRET").context("JWT_SECRET must be set")?;

        let database_max_connections = match var("DATABASE_MAX_CONNECTIONS") {
            Some(value) => value
                .parse::<u32>()
                .context("DATABASE_MAX_CONNECTIONS must be a positive number")?,
            None => 10,
        };

        let port = match var("PORT") {
            Some(value) => value.parse::<u16>().context("PORT must be a valid port number")?,
            None => 3000,
        };

        let cors_origins = match var("CORS_ORIGINS") {
            Some(value) => value
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect(),
            None => DEFAULT_CORS_ORIGINS.iter().map(|o| o.to_string()).collect(),
        };

        Ok(Self {
            jwt_secret,
            database_url: var("DATABASE_URL"),
            database_max_connections,
            nats_url: var("NATS_URL"),
            nats_subject_prefix: var("NATS_SUBJECT_PREFIX")
                .unwrap_or_else(|| "social.conversations".to_string()),
            host: var("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port,
            cors_origins,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("JWT_SECRET", "secret")]).unwrap();

        assert_eq!(config.database_url, None);
        assert_eq!(config.database_max_connections, 10);
        assert_eq!(config.nats_subject_prefix, "social.conversations");
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3000);
        assert_eq!(config.cors_origins.len(), DEFAULT_CORS_ORIGINS.len());
    }

    #[test]
    fn test_missing_secret_is_an_error() {
        assert!(config_from(&[]).is_err());
        assert!(config_from(&[("JWT_SECRET", "  ")]).is_err());
    }

    #[test]
    fn test_invalid_numbers_are_errors() {
        assert!(config_from(&[("JWT_SECRET", "s"), ("PORT", "http")]).is_err());
        assert!(config_from(&[("JWT_SECRET", "s"), ("DATABASE_MAX_CONNECTIONS", "-1")]).is_err());
    }

    #[test]
    fn test_cors_origins_are_split() {
        let config = config_from(&[
            ("JWT_SECRET", "s"),
            ("CORS_ORIGINS", "https://a.example.com, https://b.example.com,"),
        ])
        .unwrap();

        assert_eq!(
            config.cors_origins,
            vec!["https://a.example.com".to_string(), "https://b.example.com".to_string()]
        );
    }
}
