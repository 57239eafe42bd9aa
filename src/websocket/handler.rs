use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;

use crate::{
    error::{AppError, Result},
    message::message_dto::SendMessageRequest,
    middleware::AuthUser,
    state::AppState,
    websocket::types::{ClientMessage, ErrorPayload, UserTypingPayload, WsMessage},
};

use super::connection::{ConnectionId, WsSender};

/// Live connection for push events.
///
/// Every connection joins its user's group on connect. Viewing a conversation
/// (`join_conversation`) additionally subscribes it to in-view events for that
/// conversation, one conversation at a time.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    user: AuthUser,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, user, state))
}

async fn handle_socket(socket: WebSocket, user: AuthUser, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

    let connection_id = state.ws_connections.connect(user.id, tx.clone());
    tracing::info!("WebSocket connected for user {} ({})", user.id, connection_id);

    // Task: send messages from channel to WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!("Failed to encode push event: {}", e),
            }
        }
    });

    // Task: receive messages from WebSocket
    let state_clone = state.clone();
    let tx_clone = tx.clone();
    let recv_user = user.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if let Err(e) =
                        process_client_message(&text, &recv_user, connection_id, &state_clone, &tx_clone).await
                    {
                        tracing::warn!("Rejected client frame from {}: {}", recv_user.id, e);
                        let _ = tx_clone.send(WsMessage::Error(ErrorPayload {
                            message: client_error_message(&e),
                        }));
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Heartbeat task
    let tx_heartbeat = tx.clone();
    let mut heartbeat_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
        loop {
            interval.tick().await;
            if tx_heartbeat.send(WsMessage::Ping).is_err() {
                break;
            }
        }
    });

    // Stop all tasks when any one finishes
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            heartbeat_task.abort();
        },
        _ = &mut recv_task => {
            send_task.abort();
            heartbeat_task.abort();
        },
        _ = &mut heartbeat_task => {
            send_task.abort();
            recv_task.abort();
        }
    }

    state.ws_connections.disconnect(connection_id);
    tracing::info!("WebSocket closed for user {} ({})", user.id, connection_id);
}

async fn process_client_message(
    text: &str,
    user: &AuthUser,
    connection_id: ConnectionId,
    state: &AppState,
    tx: &WsSender,
) -> Result<()> {
    let client_msg: ClientMessage = serde_json::from_str(text)
        .map_err(|e| AppError::BadRequest(format!("Invalid message format: {}", e)))?;

    match client_msg {
        ClientMessage::JoinConversation { conversation_id } => {
            state
                .membership_guard
                .require_participant(conversation_id, user.id)
                .await?;
            state.ws_connections.join_conversation(connection_id, conversation_id);
        }

        ClientMessage::LeaveConversation { conversation_id } => {
            state.ws_connections.leave_conversation(connection_id, conversation_id);
        }

        ClientMessage::Typing { conversation_id } => {
            if state.ws_connections.viewing(connection_id) != Some(conversation_id) {
                return Err(AppError::BadRequest(
                    "Join the conversation before sending typing notifications".to_string(),
                ));
            }

            let typing = WsMessage::UserTyping(UserTypingPayload {
                conversation_id,
                user_id: user.id,
                username: user.display_name.clone().unwrap_or_else(|| user.username.clone()),
            });
            state
                .ws_connections
                .send_to_conversation(&conversation_id, typing, Some(connection_id));
        }

        ClientMessage::SendMessage {
            conversation_id,
            content,
            attachment_urls,
        } => {
            state
                .message_service
                .send_message(
                    user.id,
                    conversation_id,
                    SendMessageRequest {
                        content,
                        attachment_urls,
                    },
                )
                .await?;
        }

        ClientMessage::Ping => {
            let _ = tx.send(WsMessage::Pong);
        }
    }

    Ok(())
}

fn client_error_message(error: &AppError) -> String {
    if error.status_code().is_server_error() {
        "Internal server error".to_string()
    } else {
        error.to_string()
    }
}
