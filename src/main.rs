mod auth;
mod conversation;
mod db;
mod error;
mod events;
mod membership;
mod message;
mod middleware;
mod routes;
mod state;
mod websocket;

use db::{create_pool, run_migrations, MemoryStore, PgStore};
use events::{EventPublisher, LogEventPublisher, NatsEventPublisher};
use routes::create_router;
use state::{AppState, Config};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,conversation_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::from_env()?);

    let events: Arc<dyn EventPublisher> = match &config.nats_url {
        Some(url) => Arc::new(NatsEventPublisher::connect(url, config.nats_subject_prefix.clone()).await?),
        None => {
            tracing::info!("NATS_URL not set, domain events will only be logged");
            Arc::new(LogEventPublisher)
        }
    };

    let state = match &config.database_url {
        Some(database_url) => {
            // Sanitize URL for logging (hide password)
            let url_for_logging = database_url
                .split('@')
                .next()
                .map(|part| format!("{}@<hidden>", part))
                .unwrap_or_else(|| "<invalid format>".to_string());

            tracing::info!("Connecting to database at {}...", url_for_logging);
            let pool = create_pool(database_url, config.database_max_connections).await?;

            tracing::info!("Running migrations...");
            run_migrations(&pool).await?;

            AppState::build(config.clone(), Arc::new(PgStore::new(pool)), events)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            AppState::build(config.clone(), Arc::new(MemoryStore::new()), events)
        }
    };

    // Create router
    let app = create_router(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);

    tracing::info!("Server starting on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
