//! Per-conversation subscription registry.
//!
//! Tracks which connections have joined which conversations. Connections
//! are identified by an opaque id assigned at accept time; a connection's
//! subscriptions are removed one by one on `Leave` and wholesale on
//! disconnect, so repeated open/close cycles of a chat surface never
//! accumulate stale subscribers.

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;

use shopchat_proto::message::ConversationId;

/// Opaque identifier for one WebSocket connection.
pub type ConnId = u64;

/// Registry mapping conversations to their subscribed connections.
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscribers: RwLock<HashMap<ConversationId, HashSet<ConnId>>>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes a connection to a conversation.
    pub async fn join(&self, conversation_id: &ConversationId, conn: ConnId) {
        let mut subscribers = self.subscribers.write().await;
        subscribers
            .entry(conversation_id.clone())
            .or_default()
            .insert(conn);
    }

    /// Unsubscribes a connection from a conversation.
    pub async fn leave(&self, conversation_id: &ConversationId, conn: ConnId) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(set) = subscribers.get_mut(conversation_id) {
            set.remove(&conn);
            if set.is_empty() {
                subscribers.remove(conversation_id);
            }
        }
    }

    /// Returns the connections subscribed to a conversation.
    pub async fn members(&self, conversation_id: &ConversationId) -> Vec<ConnId> {
        let subscribers = self.subscribers.read().await;
        subscribers
            .get(conversation_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Removes a connection from every conversation (disconnect cleanup).
    pub async fn remove_connection(&self, conn: ConnId) {
        let mut subscribers = self.subscribers.write().await;
        subscribers.retain(|_, set| {
            set.remove(&conn);
            !set.is_empty()
        });
    }
}
