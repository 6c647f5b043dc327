use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identity of an authenticated caller.
pub type ParticipantId = i64;

pub type ConversationId = i64;

pub type MessageId = i64;

/// Client → server frame after the upgrade. Any sender field a client
/// adds is ignored; the authenticated identity is stamped server-side.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub conversation_id: ConversationId,
    pub text: String,
}

/// Canonical persisted message, and the exact payload fanned out to
/// recipients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: ParticipantId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: ParticipantId,
    pub login: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub participants: Vec<ParticipantId>,
    pub last_message_at: Option<DateTime<Utc>>,
}
