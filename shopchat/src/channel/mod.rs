//! Realtime notification channel abstraction.
//!
//! Defines the [`RealtimeChannel`] trait the session layer consumes.
//! Concrete implementations:
//! - [`loopback::LoopbackChannel`] — in-process channel for tests
//! - [`crate::relay_client::RelayClient`] — WebSocket connection to the relay
//!
//! The channel is injected into the session manager rather than referenced
//! as ambient process state, so its lifecycle is scoped to the session and
//! tests can substitute a fake.

pub mod loopback;

use shopchat_proto::message::{ChatMessage, ConversationId};

/// Errors that can occur during realtime channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The connection carrying the channel has been closed.
    #[error("channel closed")]
    Closed,

    /// The operation timed out before completing.
    #[error("channel operation timed out")]
    Timeout,

    /// An underlying I/O error occurred.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Async pub/sub channel delivering authoritative message events.
///
/// Subscription scoping is loose: implementations deliver events for
/// conversations the client has joined, but a shared channel may still
/// deliver foreign or late events. The session layer guards on the
/// conversation id of every event regardless.
pub trait RealtimeChannel: Send + Sync {
    /// Subscribe to a conversation's message events.
    fn join(
        &self,
        conversation_id: &ConversationId,
    ) -> impl std::future::Future<Output = Result<(), ChannelError>> + Send;

    /// Unsubscribe from a conversation's message events.
    fn leave(
        &self,
        conversation_id: &ConversationId,
    ) -> impl std::future::Future<Output = Result<(), ChannelError>> + Send;

    /// Receive the next message event.
    ///
    /// Blocks asynchronously until an event arrives or the channel closes.
    fn recv(
        &self,
    ) -> impl std::future::Future<Output = Result<ChatMessage, ChannelError>> + Send;
}

// A shared connection can serve as both collaborators of a session (the
// relay client implements submission and events over one WebSocket).
impl<T: RealtimeChannel> RealtimeChannel for std::sync::Arc<T> {
    async fn join(&self, conversation_id: &ConversationId) -> Result<(), ChannelError> {
        (**self).join(conversation_id).await
    }

    async fn leave(&self, conversation_id: &ConversationId) -> Result<(), ChannelError> {
        (**self).leave(conversation_id).await
    }

    async fn recv(&self) -> Result<ChatMessage, ChannelError> {
        (**self).recv().await
    }
}
