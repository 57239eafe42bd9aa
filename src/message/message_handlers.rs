use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::{
    conversation::conversation_dto::{PageQuery, SuccessResponse},
    error::Result,
    message::{
        message_dto::{SendMessageRequest, DEFAULT_MESSAGE_PAGE_SIZE},
        message_models::MessageResponse,
    },
    middleware::AuthUser,
    state::AppState,
};

/// Send a message to a conversation
#[utoipa::path(
    post,
    path = "/api/conversations/{id}/messages",
    tag = "messages",
    params(
        ("id" = Uuid, Path, description = "Conversation ID")
    ),
    request_body = SendMessageRequest,
    responses(
        (status = 201, description = "Message sent successfully", body = MessageResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not a participant"),
        (status = 404, description = "Conversation not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn send_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(conversation_id): Path<Uuid>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<impl IntoResponse> {
    let message = state
        .message_service
        .send_message(user.id, conversation_id, payload)
        .await?;

    Ok((StatusCode::CREATED, Json(MessageResponse::from(message))))
}

/// Get a page of conversation messages, oldest first
#[utoipa::path(
    get,
    path = "/api/conversations/{id}/messages",
    tag = "messages",
    params(
        ("id" = Uuid, Path, description = "Conversation ID"),
        PageQuery
    ),
    responses(
        (status = 200, description = "Messages in ascending order", body = Vec<MessageResponse>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not a participant"),
        (status = 404, description = "Conversation not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_conversation_messages(
    State(state): State<AppState>,
    user: AuthUser,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse> {
    let (page, page_size) = query.resolve(DEFAULT_MESSAGE_PAGE_SIZE);

    let messages: Vec<MessageResponse> = state
        .message_service
        .get_conversation_messages(user.id, conversation_id, page, page_size)
        .await?
        .into_iter()
        .map(MessageResponse::from)
        .collect();

    Ok((StatusCode::OK, Json(messages)))
}

/// Get a single message
#[utoipa::path(
    get,
    path = "/api/conversations/{id}/messages/{message_id}",
    tag = "messages",
    params(
        ("id" = Uuid, Path, description = "Conversation ID"),
        ("message_id" = Uuid, Path, description = "Message ID")
    ),
    responses(
        (status = 200, description = "Message", body = MessageResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not a participant"),
        (status = 404, description = "Message not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path((conversation_id, message_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    let message = state
        .message_service
        .get_message(user.id, conversation_id, message_id)
        .await?;

    Ok((StatusCode::OK, Json(MessageResponse::from(message))))
}

/// Mark the conversation read up to this message
#[utoipa::path(
    post,
    path = "/api/conversations/{id}/messages/{message_id}/read",
    tag = "messages",
    params(
        ("id" = Uuid, Path, description = "Conversation ID"),
        ("message_id" = Uuid, Path, description = "Message ID")
    ),
    responses(
        (status = 200, description = "Message marked as read", body = SuccessResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not a participant"),
        (status = 404, description = "Message not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn mark_message_read(
    State(state): State<AppState>,
    user: AuthUser,
    Path((conversation_id, message_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    let success = state
        .message_service
        .mark_message_read(user.id, conversation_id, message_id)
        .await?;

    Ok((StatusCode::OK, Json(SuccessResponse { success })))
}

/// Delete one of your own messages
#[utoipa::path(
    delete,
    path = "/api/conversations/{id}/messages/{message_id}",
    tag = "messages",
    params(
        ("id" = Uuid, Path, description = "Conversation ID"),
        ("message_id" = Uuid, Path, description = "Message ID")
    ),
    responses(
        (status = 200, description = "Message deleted", body = SuccessResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not the sender"),
        (status = 404, description = "Message not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn delete_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path((conversation_id, message_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    let success = state
        .message_service
        .delete_message(user.id, conversation_id, message_id)
        .await?;

    Ok((StatusCode::OK, Json(SuccessResponse { success })))
}
