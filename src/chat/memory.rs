use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::info;

use super::model::{Account, Conversation, ConversationId, MessageId, ParticipantId, StoredMessage};
use super::{validate_text, AccountStore, MembershipResolver, MessageStore};
use crate::error::{AppError, DatabaseError};

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<ParticipantId, Account>,
    conversations: HashMap<ConversationId, Conversation>,
    messages: Vec<StoredMessage>,
    next_account_id: i64,
    next_conversation_id: i64,
    next_message_id: i64,
}

/// Process-local storage backend for tests and `storage.backend = "memory"`.
#[derive(Debug, Default)]
pub struct InMemoryChatStore {
    tables: RwLock<Tables>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a conversation with a fixed id, replacing any existing one.
    pub async fn insert_conversation(&self, id: ConversationId, participants: &[ParticipantId]) {
        let mut tables = self.tables.write().await;
        tables.next_conversation_id = tables.next_conversation_id.max(id);
        tables.conversations.insert(id, Conversation {
            id,
            participants: participants.to_vec(),
            last_message_at: None,
        });
    }

    pub async fn conversation(&self, id: ConversationId) -> Option<Conversation> {
        self.tables.read().await.conversations.get(&id).cloned()
    }

    pub async fn messages_in(&self, conversation_id: ConversationId) -> Vec<StoredMessage> {
        self.tables
            .read()
            .await
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MembershipResolver for InMemoryChatStore {
    async fn participants_of(&self, conversation_id: ConversationId) -> Result<HashSet<ParticipantId>, AppError> {
        self.tables
            .read()
            .await
            .conversations
            .get(&conversation_id)
            .map(|c| c.participants.iter().copied().collect())
            .ok_or_else(|| AppError::NotFound(format!("conversation {}", conversation_id)))
    }
}

#[async_trait]
impl MessageStore for InMemoryChatStore {
    async fn persist(
        &self,
        conversation_id: ConversationId,
        sender_id: ParticipantId,
        text: &str,
    ) -> Result<StoredMessage, AppError> {
        validate_text(text)?;

        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let conversation = tables
            .conversations
            .get_mut(&conversation_id)
            .ok_or_else(|| AppError::NotFound(format!("conversation {}", conversation_id)))?;
        conversation.last_message_at = Some(now);

        tables.next_message_id += 1;
        let message = StoredMessage {
            id: tables.next_message_id,
            conversation_id,
            sender_id,
            text: text.to_string(),
            created_at: now,
        };
        tables.messages.push(message.clone());
        Ok(message)
    }
}

#[async_trait]
impl AccountStore for InMemoryChatStore {
    async fn create_account(&self, login: &str, name: Option<&str>) -> Result<Account, AppError> {
        let mut tables = self.tables.write().await;
        if tables.accounts.values().any(|a| a.login == login) {
            return Err(AppError::DatabaseError(DatabaseError::Duplicate));
        }

        tables.next_account_id += 1;
        let account = Account {
            id: tables.next_account_id,
            login: login.to_string(),
            name: name.map(str::to_string),
            created_at: Utc::now(),
        };
        tables.accounts.insert(account.id, account.clone());
        info!(account_id = account.id, "Created account");
        Ok(account)
    }

    async fn find_account(&self, id: ParticipantId) -> Result<Option<Account>, AppError> {
        Ok(self.tables.read().await.accounts.get(&id).cloned())
    }

    async fn find_account_by_login(&self, login: &str) -> Result<Option<Account>, AppError> {
        Ok(self.tables.read().await.accounts.values().find(|a| a.login == login).cloned())
    }

    async fn create_conversation(&self, participants: &[ParticipantId]) -> Result<Conversation, AppError> {
        let mut tables = self.tables.write().await;
        for id in participants {
            if !tables.accounts.contains_key(id) {
                return Err(AppError::NotFound(format!("participant {}", id)));
            }
        }

        tables.next_conversation_id += 1;
        let conversation = Conversation {
            id: tables.next_conversation_id,
            participants: participants.to_vec(),
            last_message_at: None,
        };
        tables.conversations.insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn conversations_of(&self, participant_id: ParticipantId, limit: i64) -> Result<Vec<Conversation>, AppError> {
        let tables = self.tables.read().await;
        let mut conversations: Vec<Conversation> = tables
            .conversations
            .values()
            .filter(|c| c.participants.contains(&participant_id))
            .cloned()
            .collect();

        // None sorts below Some, so idle conversations end up last
        conversations.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        conversations.truncate(limit.max(0) as usize);
        Ok(conversations)
    }

    async fn delete_conversation(&self, conversation_id: ConversationId) -> Result<(), AppError> {
        let mut tables = self.tables.write().await;
        if tables.conversations.remove(&conversation_id).is_none() {
            return Err(AppError::NotFound(format!("conversation {}", conversation_id)));
        }
        tables.messages.retain(|m| m.conversation_id != conversation_id);
        info!(conversation_id, "Deleted conversation");
        Ok(())
    }

    async fn recent_messages(&self, conversation_id: ConversationId, limit: i64) -> Result<Vec<StoredMessage>, AppError> {
        let mut history = self.messages_in(conversation_id).await;
        let skip = history.len().saturating_sub(limit.max(0) as usize);
        Ok(history.split_off(skip))
    }

    async fn find_message(&self, id: MessageId) -> Result<Option<StoredMessage>, AppError> {
        Ok(self.tables.read().await.messages.iter().find(|m| m.id == id).cloned())
    }

    async fn delete_message(&self, id: MessageId) -> Result<(), AppError> {
        let mut tables = self.tables.write().await;
        let before = tables.messages.len();
        tables.messages.retain(|m| m.id != id);
        if tables.messages.len() == before {
            return Err(AppError::NotFound(format!("message {}", id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_persist_assigns_ids_and_touches_conversation() {
        let store = InMemoryChatStore::new();
        store.insert_conversation(7, &[1, 2]).await;

        let first = store.persist(7, 1, "hi").await.unwrap();
        let second = store.persist(7, 2, "hello").await.unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(first.sender_id, 1);

        let conversation = store.conversation(7).await.unwrap();
        assert_eq!(conversation.last_message_at, Some(second.created_at));
        assert_eq!(store.messages_in(7).await.len(), 2);
    }

    #[tokio::test]
    async fn test_persist_rejects_blank_text() {
        let store = InMemoryChatStore::new();
        store.insert_conversation(7, &[1, 2]).await;

        let err = store.persist(7, 1, "   ").await.unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
        assert!(store.messages_in(7).await.is_empty());
    }

    #[tokio::test]
    async fn test_participants_of_unknown_conversation() {
        let store = InMemoryChatStore::new();
        let err = store.participants_of(42).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_accounts_and_conversations() {
        let store = InMemoryChatStore::new();
        let alice = store.create_account("alice", Some("Alice")).await.unwrap();
        let bob = store.create_account("bob", None).await.unwrap();

        let dup = store.create_account("alice", None).await.unwrap_err();
        assert!(matches!(dup, AppError::DatabaseError(DatabaseError::Duplicate)));

        let found = store.find_account_by_login("bob").await.unwrap();
        assert_eq!(found, Some(bob.clone()));

        let conversation = store.create_conversation(&[alice.id, bob.id]).await.unwrap();
        let participants = store.participants_of(conversation.id).await.unwrap();
        assert_eq!(participants, HashSet::from([alice.id, bob.id]));

        let missing = store.create_conversation(&[alice.id, 99]).await.unwrap_err();
        assert!(matches!(missing, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_conversations_of_orders_by_activity() {
        let store = InMemoryChatStore::new();
        store.insert_conversation(1, &[10, 20]).await;
        store.insert_conversation(2, &[10, 30]).await;
        store.insert_conversation(3, &[10, 40]).await;
        store.insert_conversation(4, &[20, 30]).await;

        store.persist(1, 10, "older").await.unwrap();
        store.persist(2, 10, "newer").await.unwrap();

        let ids: Vec<_> = store
            .conversations_of(10, 20)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![2, 1, 3]);

        let limited = store.conversations_of(10, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, 2);
    }

    #[tokio::test]
    async fn test_recent_messages_keeps_newest_in_order() {
        let store = InMemoryChatStore::new();
        store.insert_conversation(7, &[1, 2]).await;
        for text in ["one", "two", "three"] {
            store.persist(7, 1, text).await.unwrap();
        }

        let texts: Vec<_> = store
            .recent_messages(7, 2)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["two", "three"]);
        assert_eq!(store.recent_messages(7, 50).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_delete_conversation_and_message() {
        let store = InMemoryChatStore::new();
        store.insert_conversation(7, &[1, 2]).await;
        store.insert_conversation(8, &[1, 2]).await;
        let kept = store.persist(8, 1, "kept").await.unwrap();
        store.persist(7, 1, "gone").await.unwrap();

        store.delete_conversation(7).await.unwrap();
        assert!(store.conversation(7).await.is_none());
        assert!(store.messages_in(7).await.is_empty());
        assert!(matches!(store.delete_conversation(7).await, Err(AppError::NotFound(_))));

        assert_eq!(store.find_message(kept.id).await.unwrap(), Some(kept.clone()));
        store.delete_message(kept.id).await.unwrap();
        assert_eq!(store.find_message(kept.id).await.unwrap(), None);
        assert!(matches!(store.delete_message(kept.id).await, Err(AppError::NotFound(_))));
    }
}
