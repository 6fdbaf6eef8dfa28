//! In-memory backend for testing.
//!
//! Accepts submissions, mints server identifiers, and keeps per-conversation
//! history like the real relay. Two test controls shape the interleavings
//! the session layer must survive:
//!
//! - [`set_failing`](InMemoryBackend::set_failing) makes submissions fail,
//!   exercising the failure-cleanup path.
//! - [`hold`](InMemoryBackend::hold) gates `submit` *after* the message is
//!   stored (and echoed, if an echo publisher is attached) but *before* the
//!   direct response returns. With the gate held, the realtime echo or a
//!   poll fetch observes the authoritative message first — the exact race
//!   the reconciliation rule exists for — carrying the same server id the
//!   eventual response will carry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, watch};

use shopchat_proto::message::{
    ChatMessage, ConversationId, MessageId, SenderRole, Timestamp, validate_body,
};

use crate::channel::loopback::LoopbackPublisher;

use super::{BackendError, MessageBackend};

/// In-process implementation of [`MessageBackend`] for testing.
pub struct InMemoryBackend {
    /// Accepted messages per conversation, in acceptance order.
    conversations: Mutex<HashMap<ConversationId, Vec<ChatMessage>>>,
    /// When set, submissions fail with a rejection.
    fail_submissions: AtomicBool,
    /// Gate state: `true` while held.
    gate_tx: watch::Sender<bool>,
    /// Template receiver cloned by each gated submit.
    gate_rx: watch::Receiver<bool>,
    /// Optional echo target: accepted messages are published here before
    /// the direct response resolves, like the relay's broadcast.
    echo: parking_lot::Mutex<Option<LoopbackPublisher>>,
}

impl InMemoryBackend {
    /// Creates an empty backend that accepts everything immediately.
    #[must_use]
    pub fn new() -> Self {
        let (gate_tx, gate_rx) = watch::channel(false);
        Self {
            conversations: Mutex::new(HashMap::new()),
            fail_submissions: AtomicBool::new(false),
            gate_tx,
            gate_rx,
            echo: parking_lot::Mutex::new(None),
        }
    }

    /// Makes subsequent submissions fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        self.fail_submissions.store(fail, Ordering::SeqCst);
    }

    /// Holds the direct response of subsequent submissions until
    /// [`release`](Self::release) is called. Accepted messages are already
    /// stored (and echoed) while held.
    pub fn hold(&self) {
        self.gate_tx.send_replace(true);
    }

    /// Releases submissions held by [`hold`](Self::hold).
    pub fn release(&self) {
        self.gate_tx.send_replace(false);
    }

    /// Attaches an echo publisher: every accepted message is published to
    /// it before the direct response resolves.
    pub fn set_echo(&self, publisher: LoopbackPublisher) {
        *self.echo.lock() = Some(publisher);
    }

    /// Inserts a message as if another client had submitted it — for
    /// populating history in polling tests.
    pub async fn insert_remote(&self, message: ChatMessage) {
        self.conversations
            .lock()
            .await
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message);
    }

    /// Returns all accepted messages of a conversation, oldest first.
    pub async fn stored(&self, conversation_id: &ConversationId) -> Vec<ChatMessage> {
        self.conversations
            .lock()
            .await
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Waits while the gate is held.
    async fn wait_until_released(&self) {
        let mut gate = self.gate_rx.clone();
        while *gate.borrow() {
            if gate.changed().await.is_err() {
                break;
            }
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBackend for InMemoryBackend {
    async fn submit(
        &self,
        conversation_id: &ConversationId,
        body: &str,
        sender_role: SenderRole,
    ) -> Result<ChatMessage, BackendError> {
        if self.fail_submissions.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected("submission refused".to_string()));
        }
        validate_body(body).map_err(|e| BackendError::Rejected(e.to_string()))?;

        let message = ChatMessage {
            id: MessageId::server(),
            conversation_id: conversation_id.clone(),
            body: body.trim().to_string(),
            sender_role,
            created_at: Timestamp::now(),
        };

        self.conversations
            .lock()
            .await
            .entry(conversation_id.clone())
            .or_default()
            .push(message.clone());

        let echo = self.echo.lock().clone();
        if let Some(publisher) = echo {
            publisher.publish(message.clone()).await;
        }

        self.wait_until_released().await;
        Ok(message)
    }

    async fn fetch_conversation(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, BackendError> {
        let conversations = self.conversations.lock().await;
        let messages = conversations
            .get(conversation_id)
            .map(|all| {
                let skip = all.len().saturating_sub(limit);
                all[skip..].to_vec()
            })
            .unwrap_or_default();
        Ok(messages)
    }
}
