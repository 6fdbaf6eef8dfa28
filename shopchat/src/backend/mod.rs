//! Message submission backend abstraction.
//!
//! Defines the [`MessageBackend`] trait the session layer consumes for
//! submitting messages and fetching conversation history. Concrete
//! implementations:
//! - [`memory::InMemoryBackend`] — in-process backend for testing
//! - [`crate::relay_client::RelayClient`] — WebSocket connection to the relay

pub mod memory;

use shopchat_proto::message::{ChatMessage, ConversationId, SenderRole};

/// Errors that can occur during backend operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The backend rejected the submission (validation, policy).
    #[error("submission rejected: {0}")]
    Rejected(String),

    /// The connection to the backend has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("backend operation timed out")]
    Timeout,

    /// An underlying I/O error occurred.
    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Async submission/history service for conversations.
///
/// `submit` returns the authoritative message — server-assigned id and
/// timestamp — which the session layer reconciles against its provisional
/// entry. `fetch_conversation` serves the polling fallback for clients
/// without a realtime channel.
pub trait MessageBackend: Send + Sync {
    /// Submit a message body for a conversation.
    ///
    /// Returns the authoritative message on acceptance.
    fn submit(
        &self,
        conversation_id: &ConversationId,
        body: &str,
        sender_role: SenderRole,
    ) -> impl std::future::Future<Output = Result<ChatMessage, BackendError>> + Send;

    /// Fetch up to `limit` recent messages of a conversation, oldest first.
    fn fetch_conversation(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> impl std::future::Future<Output = Result<Vec<ChatMessage>, BackendError>> + Send;
}

// A shared connection can serve as both collaborators of a session (the
// relay client implements submission and events over one WebSocket).
impl<T: MessageBackend> MessageBackend for std::sync::Arc<T> {
    async fn submit(
        &self,
        conversation_id: &ConversationId,
        body: &str,
        sender_role: SenderRole,
    ) -> Result<ChatMessage, BackendError> {
        (**self).submit(conversation_id, body, sender_role).await
    }

    async fn fetch_conversation(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, BackendError> {
        (**self).fetch_conversation(conversation_id, limit).await
    }
}
