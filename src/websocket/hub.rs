use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chat::{ConversationId, MembershipResolver, ParticipantId};
use crate::error::AppError;

pub type ConnectionId = Uuid;

/// A serialized frame waiting to be written to one socket.
pub type Payload = String;

/// The sending half of a connection's bounded outbox, tagged with the
/// connection's identity. The hub keeps the only copy, so dropping it on
/// unregister is what ends the outbound pump.
#[derive(Debug)]
pub struct Outbox {
    id: ConnectionId,
    participant_id: ParticipantId,
    sender: mpsc::Sender<Payload>,
}

impl Outbox {
    pub fn channel(participant_id: ParticipantId, capacity: usize) -> (Self, mpsc::Receiver<Payload>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let outbox = Self {
            id: Uuid::new_v4(),
            participant_id,
            sender,
        };
        (outbox, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn participant_id(&self) -> ParticipantId {
        self.participant_id
    }
}

#[derive(Debug, Default)]
struct Registry {
    by_participant: HashMap<ParticipantId, HashMap<ConnectionId, mpsc::Sender<Payload>>>,
    owners: HashMap<ConnectionId, ParticipantId>,
}

impl Registry {
    fn insert(&mut self, outbox: Outbox) {
        self.owners.insert(outbox.id, outbox.participant_id);
        self.by_participant
            .entry(outbox.participant_id)
            .or_default()
            .insert(outbox.id, outbox.sender);
    }

    fn remove(&mut self, id: &ConnectionId) -> Option<ParticipantId> {
        let participant_id = self.owners.remove(id)?;
        if let Some(connections) = self.by_participant.get_mut(&participant_id) {
            connections.remove(id);
            if connections.is_empty() {
                self.by_participant.remove(&participant_id);
            }
        }
        Some(participant_id)
    }
}

/// Registry of live connections and the targeted delivery engine.
///
/// Every read and write of the registry goes through the same `RwLock`:
/// registration and removal take the write half, delivery scans under the
/// read half. Connections found full or closed during the scan are evicted
/// after the read guard is dropped, through `unregister`. A connection that
/// has been removed is therefore never targeted by a later delivery.
pub struct Hub {
    registry: RwLock<Registry>,
    membership: Arc<dyn MembershipResolver>,
}

impl Hub {
    pub fn new(membership: Arc<dyn MembershipResolver>) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            membership,
        }
    }

    /// Makes the connection eligible for delivery. Call exactly once per
    /// connection.
    pub async fn register(&self, outbox: Outbox) {
        let id = outbox.id;
        let participant_id = outbox.participant_id;
        self.registry.write().await.insert(outbox);
        info!(connection_id = %id, participant_id, "Connection registered");
    }

    /// Removes the connection and drops its outbox sender, which ends the
    /// outbound pump. Returns `false` if it was already gone.
    pub async fn unregister(&self, id: &ConnectionId) -> bool {
        let removed = self.registry.write().await.remove(id);
        match removed {
            Some(participant_id) => {
                info!(connection_id = %id, participant_id, "Connection unregistered");
                true
            }
            None => false,
        }
    }

    /// Non-blocking enqueue onto every live connection of `participant_id`.
    ///
    /// A connection whose outbox is full (or whose pump already exited) is
    /// evicted instead of being waited on. Returns the number of outboxes
    /// that accepted the payload; zero for an offline participant.
    pub async fn deliver_to_participant(&self, participant_id: ParticipantId, payload: &str) -> usize {
        let mut delivered = 0;
        let mut evicted = Vec::new();

        {
            let registry = self.registry.read().await;
            let Some(connections) = registry.by_participant.get(&participant_id) else {
                debug!(participant_id, "Participant offline, nothing delivered");
                return 0;
            };

            for (id, sender) in connections {
                match sender.try_send(payload.to_owned()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!(connection_id = %id, participant_id, "Outbox full, evicting slow connection");
                        evicted.push(*id);
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(connection_id = %id, participant_id, "Outbox closed, evicting connection");
                        evicted.push(*id);
                    }
                }
            }
        }

        for id in &evicted {
            self.unregister(id).await;
        }

        delivered
    }

    /// Resolves the conversation's participants and delivers to each,
    /// skipping `exclude` when given.
    pub async fn deliver_to_conversation(
        &self,
        conversation_id: ConversationId,
        exclude: Option<ParticipantId>,
        payload: &str,
    ) -> Result<usize, AppError> {
        let participants = self.membership.participants_of(conversation_id).await?;

        let mut delivered = 0;
        for participant_id in participants {
            if Some(participant_id) == exclude {
                continue;
            }
            delivered += self.deliver_to_participant(participant_id, payload).await;
        }

        Ok(delivered)
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.read().await.owners.len()
    }

    pub async fn connections_of(&self, participant_id: ParticipantId) -> usize {
        self.registry
            .read()
            .await
            .by_participant
            .get(&participant_id)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    pub async fn is_registered(&self, id: &ConnectionId) -> bool {
        self.registry.read().await.owners.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::InMemoryChatStore;
    use std::time::Duration;

    fn hub_with(store: Arc<InMemoryChatStore>) -> Arc<Hub> {
        Arc::new(Hub::new(store))
    }

    #[tokio::test]
    async fn test_delivers_only_to_matching_identity() {
        let hub = hub_with(Arc::new(InMemoryChatStore::new()));
        let (a, mut a_rx) = Outbox::channel(1, 8);
        let (b, mut b_rx) = Outbox::channel(2, 8);
        hub.register(a).await;
        hub.register(b).await;
        assert_eq!(hub.connection_count().await, 2);

        assert_eq!(hub.deliver_to_participant(2, "for b").await, 1);
        assert_eq!(b_rx.try_recv().unwrap(), "for b");
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_multiple_devices_all_receive() {
        let hub = hub_with(Arc::new(InMemoryChatStore::new()));
        let (phone, mut phone_rx) = Outbox::channel(1, 8);
        let (laptop, mut laptop_rx) = Outbox::channel(1, 8);
        hub.register(phone).await;
        hub.register(laptop).await;
        assert_eq!(hub.connections_of(1).await, 2);

        assert_eq!(hub.deliver_to_participant(1, "sync").await, 2);
        assert_eq!(phone_rx.try_recv().unwrap(), "sync");
        assert_eq!(laptop_rx.try_recv().unwrap(), "sync");
    }

    #[tokio::test]
    async fn test_offline_participant_is_silent() {
        let hub = hub_with(Arc::new(InMemoryChatStore::new()));
        assert_eq!(hub.deliver_to_participant(42, "nobody home").await, 0);
    }

    #[tokio::test]
    async fn test_unregister_closes_outbox_and_stops_delivery() {
        let hub = hub_with(Arc::new(InMemoryChatStore::new()));
        let (a, mut a_rx) = Outbox::channel(1, 8);
        let id = a.id();
        hub.register(a).await;

        assert!(hub.unregister(&id).await);
        assert!(!hub.is_registered(&id).await);
        assert_eq!(hub.deliver_to_participant(1, "late").await, 0);

        // Sender dropped by the hub: the pump sees end-of-stream
        assert_eq!(a_rx.recv().await, None);

        // Second unregister is a no-op
        assert!(!hub.unregister(&id).await);
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_saturated_outbox_is_evicted_without_blocking_others() {
        let hub = hub_with(Arc::new(InMemoryChatStore::new()));
        let (slow, mut slow_rx) = Outbox::channel(1, 2);
        let slow_id = slow.id();
        let (fast, mut fast_rx) = Outbox::channel(2, 2);
        hub.register(slow).await;
        hub.register(fast).await;

        assert_eq!(hub.deliver_to_participant(1, "one").await, 1);
        assert_eq!(hub.deliver_to_participant(1, "two").await, 1);
        // Third payload does not fit: evicted, not awaited
        let overflow = tokio::time::timeout(Duration::from_millis(100), hub.deliver_to_participant(1, "three"))
            .await
            .expect("delivery must not block on a full outbox");
        assert_eq!(overflow, 0);
        assert!(!hub.is_registered(&slow_id).await);

        // Buffered payloads drain, then the closed outbox ends the stream
        assert_eq!(slow_rx.recv().await.as_deref(), Some("one"));
        assert_eq!(slow_rx.recv().await.as_deref(), Some("two"));
        assert_eq!(slow_rx.recv().await, None);

        assert_eq!(hub.deliver_to_participant(2, "still here").await, 1);
        assert_eq!(fast_rx.try_recv().unwrap(), "still here");
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_evicted() {
        let hub = hub_with(Arc::new(InMemoryChatStore::new()));
        let (a, a_rx) = Outbox::channel(1, 8);
        let id = a.id();
        hub.register(a).await;
        drop(a_rx);

        assert_eq!(hub.deliver_to_participant(1, "gone").await, 0);
        assert!(!hub.is_registered(&id).await);
    }

    #[tokio::test]
    async fn test_conversation_fan_out_and_exclusion() {
        let store = Arc::new(InMemoryChatStore::new());
        store.insert_conversation(7, &[1, 2]).await;
        let hub = hub_with(store);

        let (a, mut a_rx) = Outbox::channel(1, 8);
        let (b, mut b_rx) = Outbox::channel(2, 8);
        let (c, mut c_rx) = Outbox::channel(3, 8);
        hub.register(a).await;
        hub.register(b).await;
        hub.register(c).await;

        assert_eq!(hub.deliver_to_conversation(7, None, "all").await.unwrap(), 2);
        assert_eq!(a_rx.try_recv().unwrap(), "all");
        assert_eq!(b_rx.try_recv().unwrap(), "all");
        assert!(c_rx.try_recv().is_err());

        assert_eq!(hub.deliver_to_conversation(7, Some(1), "not a").await.unwrap(), 1);
        assert!(a_rx.try_recv().is_err());
        assert_eq!(b_rx.try_recv().unwrap(), "not a");
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_an_error() {
        let hub = hub_with(Arc::new(InMemoryChatStore::new()));
        let err = hub.deliver_to_conversation(99, None, "x").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_unregister_deliver() {
        let hub = hub_with(Arc::new(InMemoryChatStore::new()));
        let mut tasks = Vec::new();

        for worker in 0..16i64 {
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move {
                for round in 0..50 {
                    let participant = (worker + round) % 4;
                    let (outbox, mut rx) = Outbox::channel(participant, 4);
                    let id = outbox.id();
                    hub.register(outbox).await;
                    hub.deliver_to_participant(participant, "ping").await;
                    hub.unregister(&id).await;
                    // Whatever was queued before removal drains, then the stream ends
                    while rx.recv().await.is_some() {}
                    assert!(!hub.is_registered(&id).await);
                }
            }));
        }

        for task in tasks {
            task.await.expect("worker panicked");
        }
        assert_eq!(hub.connection_count().await, 0);
        for participant in 0..4 {
            assert_eq!(hub.connections_of(participant).await, 0);
        }
    }
}
