//! Message handlers: contact sidebar, history, seen flags and sending.

use crate::chat::presence::{DeliveryEvent, DeliveryOutcome};
use crate::core::models::{non_empty, Message, UserProfile};
use crate::core::{AppState, Ctx, Error, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SidebarResponse {
    pub users: Vec<UserProfile>,
    pub unseen_messages: HashMap<String, i64>,
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub messages: Vec<Message>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SendMessageInput {
    #[serde(alias = "message")]
    pub text: Option<String>,
    /// Media reference (URL); uploading is left to the client
    pub image: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub new_message: Message,
}

/// GET /api/message/users
pub async fn list_users(State(state): State<AppState>, ctx: Ctx) -> Result<Json<SidebarResponse>> {
    info!("GET /api/message/users - {}", ctx.user_id());

    let users = state.auth.list_users_except(ctx.user_id()).await?;
    let mut unseen_messages = state.messages.unseen_counts(ctx.user_id()).await?;
    // Only counts from listed contacts are meaningful to the sidebar.
    unseen_messages.retain(|sender, _| users.iter().any(|u| &u.id == sender));

    Ok(Json(SidebarResponse {
        users,
        unseen_messages,
    }))
}

/// GET /api/message/{id}
///
/// Full conversation with `id`; everything `id` sent to the caller is
/// marked seen afterwards.
pub async fn get_messages(
    Path(other_id): Path<String>,
    State(state): State<AppState>,
    ctx: Ctx,
) -> Result<Json<ConversationResponse>> {
    info!("GET /api/message/{} - {}", other_id, ctx.user_id());

    let messages = state.messages.conversation(ctx.user_id(), &other_id).await?;
    state
        .messages
        .mark_conversation_seen(&other_id, ctx.user_id())
        .await?;

    Ok(Json(ConversationResponse { messages }))
}

/// PUT /api/message/mark/{id}
pub async fn mark_seen(
    Path(message_id): Path<String>,
    State(state): State<AppState>,
    ctx: Ctx,
) -> Result<StatusCode> {
    debug!("PUT /api/message/mark/{} - {}", message_id, ctx.user_id());

    if state.messages.mark_seen(&message_id, ctx.user_id()).await? {
        Ok(StatusCode::OK)
    } else {
        Err(Error::MessageNotFound)
    }
}

/// POST /api/message/send/{id}
///
/// Stores the message first, then hands it to the presence router. An
/// offline recipient is not an error: the stored message stays unseen and
/// shows up in their sidebar counts.
pub async fn send_message(
    Path(receiver_id): Path<String>,
    State(state): State<AppState>,
    ctx: Ctx,
    Json(input): Json<SendMessageInput>,
) -> Result<Json<SendMessageResponse>> {
    info!("POST /api/message/send/{} - {}", receiver_id, ctx.user_id());

    let text = non_empty(input.text);
    let image = non_empty(input.image);
    if text.is_none() && image.is_none() {
        return Err(Error::EmptyMessage);
    }

    // 404 for unknown recipients rather than storing undeliverable rows.
    state.auth.get_user(&receiver_id).await?;

    let message = state
        .messages
        .append(ctx.user_id(), &receiver_id, text, image)
        .await?;

    let outcome = state.presence.route_delivery(DeliveryEvent {
        sender_id: ctx.user_id().to_string(),
        recipient_id: receiver_id.clone(),
        payload: message.clone(),
    });
    match outcome {
        DeliveryOutcome::Routed => debug!("Message {} pushed to {}", message.id, receiver_id),
        DeliveryOutcome::Unrouted => debug!(
            "Message {} stored for offline recipient {}",
            message.id, receiver_id
        ),
    }

    Ok(Json(SendMessageResponse {
        new_message: message,
    }))
}
