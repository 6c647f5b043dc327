use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::auth::handlers::authenticated_participant;
use crate::chat::{ConversationId, InboundMessage, MessageId, ParticipantId};
use crate::error::AppError;
use crate::AppState;

const DEFAULT_PAGE: i64 = 20;
const MAX_PAGE: i64 = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub participant_id: ParticipantId,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
}

impl PageQuery {
    /// Defaults to 20, capped at 100; zero or negative is rejected.
    fn size(&self) -> Result<i64, AppError> {
        match self.limit {
            None => Ok(DEFAULT_PAGE),
            Some(limit) if limit <= 0 => Err(AppError::ValidationError("limit must be positive".into())),
            Some(limit) => Ok(limit.min(MAX_PAGE)),
        }
    }
}

async fn require_member(
    state: &AppState,
    conversation_id: ConversationId,
    caller: ParticipantId,
) -> Result<(), AppError> {
    let participants = state.membership.participants_of(conversation_id).await?;
    if !participants.contains(&caller) {
        return Err(AppError::Forbidden(format!(
            "participant {} is not in conversation {}",
            caller, conversation_id
        )));
    }
    Ok(())
}

/// Opens a two-party conversation between the caller and another account.
pub async fn create_conversation(
    http: HttpRequest,
    req: web::Json<CreateConversationRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let caller = authenticated_participant(&http, &state)?;
    if caller == req.participant_id {
        return Err(AppError::ValidationError("cannot open a conversation with yourself".into()));
    }

    let conversation = state
        .accounts
        .create_conversation(&[caller, req.participant_id])
        .await?;
    info!(conversation_id = conversation.id, "Conversation created by {}", caller);
    Ok(HttpResponse::Created().json(conversation))
}

pub async fn list_conversations(
    http: HttpRequest,
    query: web::Query<PageQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let caller = authenticated_participant(&http, &state)?;
    let conversations = state.accounts.conversations_of(caller, query.size()?).await?;
    Ok(HttpResponse::Ok().json(json!({ "conversations": conversations })))
}

pub async fn delete_conversation(
    http: HttpRequest,
    path: web::Path<ConversationId>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let caller = authenticated_participant(&http, &state)?;
    let conversation_id = path.into_inner();
    require_member(&state, conversation_id, caller).await?;

    state.accounts.delete_conversation(conversation_id).await?;
    info!(conversation_id, "Conversation deleted by {}", caller);
    Ok(HttpResponse::Ok().json(json!({ "message": "Conversation deleted" })))
}

/// Message history, oldest first.
pub async fn list_messages(
    http: HttpRequest,
    path: web::Path<ConversationId>,
    query: web::Query<PageQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let caller = authenticated_participant(&http, &state)?;
    let conversation_id = path.into_inner();
    let limit = query.size()?;
    require_member(&state, conversation_id, caller).await?;

    let messages = state.accounts.recent_messages(conversation_id, limit).await?;
    Ok(HttpResponse::Ok().json(json!({ "messages": messages })))
}

/// Same path as a websocket frame: persisted, then pushed to live
/// connections.
pub async fn send_message(
    http: HttpRequest,
    path: web::Path<ConversationId>,
    req: web::Json<SendMessageRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let caller = authenticated_participant(&http, &state)?;
    let inbound = InboundMessage {
        conversation_id: path.into_inner(),
        text: req.into_inner().text,
    };

    let message = state.messages.send(caller, inbound).await?;
    Ok(HttpResponse::Created().json(message))
}

/// Only the author may delete a message.
pub async fn delete_message(
    http: HttpRequest,
    path: web::Path<MessageId>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let caller = authenticated_participant(&http, &state)?;
    let message_id = path.into_inner();

    let message = state
        .accounts
        .find_message(message_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("message {}", message_id)))?;
    if message.sender_id != caller {
        return Err(AppError::Forbidden("cannot delete another participant's message".into()));
    }

    state.accounts.delete_message(message_id).await?;
    info!(message_id, "Message deleted by {}", caller);
    Ok(HttpResponse::Ok().json(json!({ "message": "Message deleted" })))
}
