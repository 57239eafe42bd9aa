use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::{
    conversation::conversation_dto::{
        AddParticipantRequest, CreateConversationRequest, MarkConversationReadRequest, PageQuery,
        SuccessResponse, UnreadCountResponse, DEFAULT_CONVERSATION_PAGE_SIZE,
    },
    error::Result,
    middleware::AuthUser,
    state::AppState,
};

/// List the caller's conversations
#[utoipa::path(
    get,
    path = "/api/conversations",
    tag = "conversations",
    params(PageQuery),
    responses(
        (status = 200, description = "Conversations, most recently active first", body = ConversationListResponse),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_conversations(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse> {
    let (page, page_size) = query.resolve(DEFAULT_CONVERSATION_PAGE_SIZE);

    let response = state
        .conversation_service
        .list_user_conversations(user.id, page, page_size)
        .await?;

    Ok((StatusCode::OK, Json(response)))
}

/// Get a conversation with its participants and latest messages
#[utoipa::path(
    get,
    path = "/api/conversations/{id}",
    tag = "conversations",
    params(
        ("id" = Uuid, Path, description = "Conversation ID")
    ),
    responses(
        (status = 200, description = "Conversation detail", body = ConversationDetailResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Conversation not found or not a participant")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let detail = state
        .conversation_service
        .get_conversation_detail(user.id, conversation_id)
        .await?;

    Ok((StatusCode::OK, Json(detail)))
}

/// Start a conversation
#[utoipa::path(
    post,
    path = "/api/conversations",
    tag = "conversations",
    request_body = CreateConversationRequest,
    responses(
        (status = 201, description = "Conversation created", body = ConversationResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn create_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse> {
    let conversation = state
        .conversation_service
        .create_conversation(user.profile(), payload)
        .await?;

    Ok((StatusCode::CREATED, Json(conversation)))
}

/// Add a participant
#[utoipa::path(
    post,
    path = "/api/conversations/{id}/participants",
    tag = "conversations",
    params(
        ("id" = Uuid, Path, description = "Conversation ID")
    ),
    request_body = AddParticipantRequest,
    responses(
        (status = 200, description = "Participant (existing or newly added)", body = ParticipantResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not a participant"),
        (status = 404, description = "Conversation not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn add_participant(
    State(state): State<AppState>,
    user: AuthUser,
    Path(conversation_id): Path<Uuid>,
    Json(payload): Json<AddParticipantRequest>,
) -> Result<impl IntoResponse> {
    let participant = state
        .conversation_service
        .add_participant(user.id, conversation_id, payload.user_id)
        .await?;

    Ok((StatusCode::OK, Json(participant)))
}

/// Remove a participant, or leave the conversation
#[utoipa::path(
    delete,
    path = "/api/conversations/{id}/participants/{user_id}",
    tag = "conversations",
    params(
        ("id" = Uuid, Path, description = "Conversation ID"),
        ("user_id" = Uuid, Path, description = "Participant to remove")
    ),
    responses(
        (status = 200, description = "`success` is false when the user was not a participant", body = SuccessResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not a participant")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn remove_participant(
    State(state): State<AppState>,
    user: AuthUser,
    Path((conversation_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    let success = state
        .conversation_service
        .remove_participant(user.id, conversation_id, user_id)
        .await?;

    Ok((StatusCode::OK, Json(SuccessResponse { success })))
}

/// Mark the conversation read
#[utoipa::path(
    post,
    path = "/api/conversations/{id}/read",
    tag = "conversations",
    params(
        ("id" = Uuid, Path, description = "Conversation ID")
    ),
    request_body(content = MarkConversationReadRequest, description = "Optional, `readTimestamp` defaults to now"),
    responses(
        (status = 200, description = "Read cursor updated", body = SuccessResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not a participant"),
        (status = 404, description = "Conversation not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn mark_conversation_read(
    State(state): State<AppState>,
    user: AuthUser,
    Path(conversation_id): Path<Uuid>,
    payload: Option<Json<MarkConversationReadRequest>>,
) -> Result<impl IntoResponse> {
    let Json(payload) = payload.unwrap_or_default();

    let success = state
        .conversation_service
        .mark_conversation_read(user.id, conversation_id, payload.read_timestamp)
        .await?;

    Ok((StatusCode::OK, Json(SuccessResponse { success })))
}

/// Number of conversations holding unread messages
#[utoipa::path(
    get,
    path = "/api/conversations/unread/count",
    tag = "conversations",
    responses(
        (status = 200, description = "Unread conversation count", body = UnreadCountResponse),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_unread_count(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse> {
    let count = state
        .conversation_service
        .unread_conversations_count(user.id)
        .await?;

    Ok((StatusCode::OK, Json(UnreadCountResponse { count })))
}
