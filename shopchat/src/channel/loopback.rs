//! Loopback realtime channel for testing.
//!
//! Uses an in-process [`tokio::sync::mpsc`] channel in place of a network
//! connection. Created via [`LoopbackChannel::create`], which returns the
//! channel and a [`LoopbackPublisher`] handle for pushing events into it.
//!
//! The publisher delivers every published message regardless of
//! subscription state — mimicking a shared channel — so tests can exercise
//! the session layer's conversation-id guard. Join/leave calls are tracked
//! and exposed through the publisher for lifecycle assertions.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;

use shopchat_proto::message::{ChatMessage, ConversationId};

use super::{ChannelError, RealtimeChannel};

/// In-process realtime channel backed by a `tokio::sync::mpsc` channel.
pub struct LoopbackChannel {
    /// Conversations this channel has joined.
    joined: Arc<parking_lot::Mutex<HashSet<ConversationId>>>,
    /// Receiver for published events.
    rx: tokio::sync::Mutex<mpsc::Receiver<ChatMessage>>,
}

/// Test-side handle for publishing events into a [`LoopbackChannel`].
#[derive(Clone)]
pub struct LoopbackPublisher {
    /// Shared view of the channel's joined conversations.
    joined: Arc<parking_lot::Mutex<HashSet<ConversationId>>>,
    /// Sender feeding the channel's receiver.
    tx: mpsc::Sender<ChatMessage>,
}

impl LoopbackChannel {
    /// Creates a connected channel/publisher pair.
    ///
    /// The `buffer` parameter controls the event channel capacity.
    #[must_use]
    pub fn create(buffer: usize) -> (Self, LoopbackPublisher) {
        let (tx, rx) = mpsc::channel(buffer);
        let joined = Arc::new(parking_lot::Mutex::new(HashSet::new()));
        let channel = Self {
            joined: Arc::clone(&joined),
            rx: tokio::sync::Mutex::new(rx),
        };
        let publisher = LoopbackPublisher { joined, tx };
        (channel, publisher)
    }
}

impl RealtimeChannel for LoopbackChannel {
    async fn join(&self, conversation_id: &ConversationId) -> Result<(), ChannelError> {
        self.joined.lock().insert(conversation_id.clone());
        Ok(())
    }

    async fn leave(&self, conversation_id: &ConversationId) -> Result<(), ChannelError> {
        self.joined.lock().remove(conversation_id);
        Ok(())
    }

    async fn recv(&self) -> Result<ChatMessage, ChannelError> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(ChannelError::Closed)
    }
}

impl LoopbackPublisher {
    /// Publishes a message event to the channel.
    ///
    /// Returns `false` if the channel side has been dropped.
    pub async fn publish(&self, message: ChatMessage) -> bool {
        self.tx.send(message).await.is_ok()
    }

    /// Returns `true` if the channel currently has the conversation joined.
    #[must_use]
    pub fn is_joined(&self, conversation_id: &ConversationId) -> bool {
        self.joined.lock().contains(conversation_id)
    }

    /// Returns the number of currently joined conversations.
    #[must_use]
    pub fn joined_count(&self) -> usize {
        self.joined.lock().len()
    }
}
