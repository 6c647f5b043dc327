//! Chat domain: message types, the collaborators the delivery hub depends
//! on, and the "send message" use case.
//!
//! The hub never talks to storage or token machinery directly. It sees
//! three narrow traits which are implemented by the Postgres layer
//! (`crate::db`), the in-memory store (`memory`) and the JWT service
//! (`crate::auth`).

pub mod handlers;
mod memory;
mod model;
mod service;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::AppError;

pub use memory::InMemoryChatStore;
pub use model::{Account, Conversation, ConversationId, InboundMessage, MessageId, ParticipantId, StoredMessage};
pub use service::MessageService;

/// Resolves who takes part in a conversation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MembershipResolver: Send + Sync {
    /// Fails with `AppError::NotFound` when the conversation does not exist.
    async fn participants_of(&self, conversation_id: ConversationId) -> Result<HashSet<ParticipantId>, AppError>;
}

/// Durable message storage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Fails with `AppError::ValidationError` on empty text and a database
    /// error otherwise.
    async fn persist(
        &self,
        conversation_id: ConversationId,
        sender_id: ParticipantId,
        text: &str,
    ) -> Result<StoredMessage, AppError>;
}

/// Turns a bearer token into the caller's identity.
#[cfg_attr(test, mockall::automock)]
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<ParticipantId, AppError>;
}

/// Account, conversation and history bookkeeping used by the HTTP API.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn create_account(&self, login: &str, name: Option<&str>) -> Result<Account, AppError>;

    async fn find_account(&self, id: ParticipantId) -> Result<Option<Account>, AppError>;

    async fn find_account_by_login(&self, login: &str) -> Result<Option<Account>, AppError>;

    async fn create_conversation(&self, participants: &[ParticipantId]) -> Result<Conversation, AppError>;

    /// Conversations `participant_id` belongs to, most recently active
    /// first; conversations without messages come last.
    async fn conversations_of(&self, participant_id: ParticipantId, limit: i64) -> Result<Vec<Conversation>, AppError>;

    /// Removes the conversation with its participants and messages.
    async fn delete_conversation(&self, conversation_id: ConversationId) -> Result<(), AppError>;

    /// The newest `limit` messages of a conversation, oldest first.
    async fn recent_messages(&self, conversation_id: ConversationId, limit: i64) -> Result<Vec<StoredMessage>, AppError>;

    async fn find_message(&self, id: MessageId) -> Result<Option<StoredMessage>, AppError>;

    async fn delete_message(&self, id: MessageId) -> Result<(), AppError>;
}

/// Shared by the message store implementations.
pub(crate) fn validate_text(text: &str) -> Result<(), AppError> {
    if text.trim().is_empty() {
        return Err(AppError::ValidationError("message text cannot be empty".into()));
    }
    Ok(())
}
