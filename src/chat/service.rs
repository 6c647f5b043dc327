use std::sync::Arc;

use tracing::{debug, info};

use super::model::{InboundMessage, ParticipantId, StoredMessage};
use super::{validate_text, MembershipResolver, MessageStore};
use crate::error::AppError;
use crate::websocket::Hub;

/// The "send message" use case: validate, persist, then fan out the stored
/// form through the hub.
pub struct MessageService {
    store: Arc<dyn MessageStore>,
    membership: Arc<dyn MembershipResolver>,
    hub: Arc<Hub>,
    echo_to_sender: bool,
}

impl MessageService {
    pub fn new(
        store: Arc<dyn MessageStore>,
        membership: Arc<dyn MembershipResolver>,
        hub: Arc<Hub>,
        echo_to_sender: bool,
    ) -> Self {
        Self {
            store,
            membership,
            hub,
            echo_to_sender,
        }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// `sender` is the authenticated identity of the connection the message
    /// arrived on.
    pub async fn send(&self, sender: ParticipantId, message: InboundMessage) -> Result<StoredMessage, AppError> {
        validate_text(&message.text)?;

        let participants = self.membership.participants_of(message.conversation_id).await?;
        if !participants.contains(&sender) {
            return Err(AppError::Forbidden(format!(
                "participant {} is not in conversation {}",
                sender, message.conversation_id
            )));
        }

        let stored = self
            .store
            .persist(message.conversation_id, sender, &message.text)
            .await?;
        info!(
            message_id = stored.id,
            conversation_id = stored.conversation_id,
            sender_id = sender,
            "Message stored"
        );

        let payload = serde_json::to_string(&stored)?;
        let exclude = if self.echo_to_sender { None } else { Some(sender) };
        let delivered = self
            .hub
            .deliver_to_conversation(stored.conversation_id, exclude, &payload)
            .await?;
        debug!(message_id = stored.id, delivered, "Message fanned out");

        Ok(stored)
    }
}
