use crate::{
    conversation::{
        conversation_dto::{
            AddParticipantRequest, ConversationListResponse, CreateConversationRequest,
            MarkConversationReadRequest, SuccessResponse, UnreadCountResponse,
        },
        conversation_handlers,
        conversation_models::{
            ConversationDetailResponse, ConversationResponse, ParticipantResponse,
        },
    },
    message::{message_dto::SendMessageRequest, message_handlers, message_models::MessageResponse},
    middleware::auth_middleware,
    state::AppState,
};
use axum::http::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    HeaderValue, Method,
};
use axum::{
    middleware,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::conversation::conversation_handlers::get_conversations,
        crate::conversation::conversation_handlers::get_conversation,
        crate::conversation::conversation_handlers::create_conversation,
        crate::conversation::conversation_handlers::add_participant,
        crate::conversation::conversation_handlers::remove_participant,
        crate::conversation::conversation_handlers::mark_conversation_read,
        crate::conversation::conversation_handlers::get_unread_count,
        crate::message::message_handlers::send_message,
        crate::message::message_handlers::get_conversation_messages,
        crate::message::message_handlers::get_message,
        crate::message::message_handlers::mark_message_read,
        crate::message::message_handlers::delete_message,
    ),
    components(
        schemas(
            CreateConversationRequest,
            AddParticipantRequest,
            MarkConversationReadRequest,
            ConversationListResponse,
            ConversationResponse,
            ConversationDetailResponse,
            ParticipantResponse,
            UnreadCountResponse,
            SuccessResponse,
            SendMessageRequest,
            MessageResponse,
        )
    ),
    tags(
        (name = "conversations", description = "Conversation and participant endpoints"),
        (name = "messages", description = "Conversation message endpoints")
    ),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::Http::new(
                        utoipa::openapi::security::HttpAuthScheme::Bearer,
                    ),
                ),
            )
        }
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(true)
}

pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    // Protected routes (auth required)
    let conversation_routes = Router::new()
        .route(
            "/",
            get(conversation_handlers::get_conversations).post(conversation_handlers::create_conversation),
        )
        .route("/unread/count", get(conversation_handlers::get_unread_count))
        .route("/:id", get(conversation_handlers::get_conversation))
        .route(
            "/:id/messages",
            get(message_handlers::get_conversation_messages).post(message_handlers::send_message),
        )
        .route(
            "/:id/messages/:message_id",
            get(message_handlers::get_message).delete(message_handlers::delete_message),
        )
        .route("/:id/messages/:message_id/read", post(message_handlers::mark_message_read))
        .route("/:id/participants", post(conversation_handlers::add_participant))
        .route(
            "/:id/participants/:user_id",
            delete(conversation_handlers::remove_participant),
        )
        .route("/:id/read", post(conversation_handlers::mark_conversation_read))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // WebSocket route
    let ws_routes = Router::new()
        .route("/ws", get(crate::websocket::ws_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let api_routes = Router::new()
        .nest("/conversations", conversation_routes)
        .merge(ws_routes);

    Router::new()
        .route("/health", get(health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::create_jwt,
        db::MemoryStore,
        events::LogEventPublisher,
        state::Config,
    };
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    const SECRET: &str = "test-secret";

    fn app() -> Router {
        let config = Config {
            jwt_secret: SECRET.to_string(),
            database_url: None,
            database_max_connections: 1,
            nats_url: None,
            nats_subject_prefix: "test".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            cors_origins: vec!["http://localhost:3000".to_string()],
        };
        let state = AppState::build(
            Arc::new(config),
            Arc::new(MemoryStore::new()),
            Arc::new(LogEventPublisher),
        );
        create_router(state)
    }

    fn token(user_id: Uuid, username: &str) -> String {
        create_jwt(user_id, username, None, None, SECRET, 1).unwrap()
    }

    async fn call(app: &Router, method: &str, uri: &str, bearer: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => request
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let (status, body) = call(&app(), "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_requests_without_token_are_rejected() {
        let app = app();
        let (status, _) = call(&app, "GET", "/api/conversations", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&app, "GET", "/api/conversations", Some("not-a-jwt"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_conversation_flow_over_http() {
        let app = app();
        let (alice, bob, mallory) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let (alice_token, bob_token, mallory_token) =
            (token(alice, "alice"), token(bob, "bob"), token(mallory, "mallory"));

        // Bob's profile is cached by his first request
        let (status, _) = call(&app, "GET", "/api/conversations/unread/count", Some(&bob_token), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, created) = call(
            &app,
            "POST",
            "/api/conversations",
            Some(&alice_token),
            Some(json!({ "participantIds": [bob], "initialMessage": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["unreadCount"], 0);
        assert_eq!(created["displayTitle"], "bob");
        let id = created["id"].as_str().unwrap().to_string();

        let (status, detail) = call(&app, "GET", &format!("/api/conversations/{}", id), Some(&bob_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["messages"].as_array().unwrap().len(), 1);
        assert_eq!(detail["messages"][0]["senderUsername"], "alice");

        let (_, listed) = call(&app, "GET", "/api/conversations?page=1&pageSize=20", Some(&bob_token), None).await;
        assert_eq!(listed["unreadCount"], 1);
        assert_eq!(listed["conversations"][0]["unreadCount"], 1);

        let (status, read) = call(&app, "POST", &format!("/api/conversations/{}/read", id), Some(&bob_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(read["success"], true);

        let (_, count) = call(&app, "GET", "/api/conversations/unread/count", Some(&bob_token), None).await;
        assert_eq!(count["count"], 0);

        // Outsiders
        let (status, _) = call(&app, "GET", &format!("/api/conversations/{}", id), Some(&mallory_token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(
            &app,
            "POST",
            &format!("/api/conversations/{}/messages", id),
            Some(&mallory_token),
            Some(json!({ "content": "let me in" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, messages) = call(&app, "GET", &format!("/api/conversations/{}/messages", id), Some(&alice_token), None).await;
        assert_eq!(messages.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_message_endpoints() {
        let app = app();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let (alice_token, bob_token) = (token(alice, "alice"), token(bob, "bob"));

        let (_, created) = call(
            &app,
            "POST",
            "/api/conversations",
            Some(&alice_token),
            Some(json!({ "participantIds": [bob] })),
        )
        .await;
        let id = created["id"].as_str().unwrap().to_string();

        let (status, _) = call(
            &app,
            "POST",
            &format!("/api/conversations/{}/messages", id),
            Some(&alice_token),
            Some(json!({ "content": "   " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, message) = call(
            &app,
            "POST",
            &format!("/api/conversations/{}/messages", id),
            Some(&alice_token),
            Some(json!({ "content": "look", "attachmentUrls": ["https://cdn.example.com/a.png"] })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(message["attachmentUrls"][0], "https://cdn.example.com/a.png");
        let message_uri = format!("/api/conversations/{}/messages/{}", id, message["id"].as_str().unwrap());

        let (status, fetched) = call(&app, "GET", &message_uri, Some(&bob_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["content"], "look");

        let (status, read) = call(&app, "POST", &format!("{}/read", message_uri), Some(&bob_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(read["success"], true);

        let (status, _) = call(&app, "DELETE", &message_uri, Some(&bob_token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, deleted) = call(&app, "DELETE", &message_uri, Some(&alice_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(deleted["success"], true);

        let (status, _) = call(&app, "GET", &message_uri, Some(&bob_token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_participant_endpoints() {
        let app = app();
        let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let (alice_token, bob_token) = (token(alice, "alice"), token(bob, "bob"));

        let (_, created) = call(
            &app,
            "POST",
            "/api/conversations",
            Some(&alice_token),
            Some(json!({ "title": "Launch", "participantIds": [bob] })),
        )
        .await;
        let id = created["id"].as_str().unwrap().to_string();
        assert_eq!(created["displayTitle"], "Launch");

        for _ in 0..2 {
            let (status, participant) = call(
                &app,
                "POST",
                &format!("/api/conversations/{}/participants", id),
                Some(&alice_token),
                Some(json!({ "userId": carol })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(participant["userId"], carol.to_string());
        }

        let (status, removed) = call(
            &app,
            "DELETE",
            &format!("/api/conversations/{}/participants/{}", id, bob),
            Some(&alice_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(removed["success"], true);

        let (status, _) = call(&app, "GET", &format!("/api/conversations/{}", id), Some(&bob_token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, detail) = call(&app, "GET", &format!("/api/conversations/{}", id), Some(&alice_token), None).await;
        assert_eq!(detail["participants"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_create_requires_participants() {
        let app = app();
        let alice_token = token(Uuid::new_v4(), "alice");

        let (status, body) = call(
            &app,
            "POST",
            "/api/conversations",
            Some(&alice_token),
            Some(json!({ "participantIds": [] })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }
}
