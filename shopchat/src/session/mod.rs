//! Conversation session layer for Shopchat.
//!
//! Contains the [`SessionManager`] which owns the active conversation's
//! state and orchestrates the optimistic send pipeline (provisional append
//! -> submit -> reconcile), the realtime inbound merge, and the polling
//! fallback. The manager is parameterized over its two collaborators — the
//! [`MessageBackend`] that accepts submissions and the [`RealtimeChannel`]
//! that delivers message events — so every storefront surface (customer,
//! partner, admin, guest) runs the same pipeline with its role as
//! configuration.

pub mod inbound;
pub mod reconcile;
pub mod send;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use shopchat_proto::message::{
    ChatMessage, ConversationId, MessageId, SenderRole, ValidationError,
};

use crate::backend::{BackendError, MessageBackend};
use crate::channel::{ChannelError, RealtimeChannel};

use reconcile::Reconciliation;

/// Errors that can occur when sending a message through the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// Message validation failed (empty, too large).
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// No conversation is open; a correspondent must be selected first.
    #[error("no conversation is open")]
    NoConversation,

    /// The submission was rejected or the backend is unreachable. The
    /// provisional entry has already been removed and a
    /// [`SessionEvent::SendFailed`] emitted when this is returned.
    #[error("submission failed: {0}")]
    Backend(#[from] BackendError),
}

/// Display metadata for the other party in a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correspondent {
    /// Name shown in the conversation header.
    pub display_name: String,
    /// Which surface the correspondent answers from.
    pub role: SenderRole,
}

/// Events emitted by the [`SessionManager`] for UI notification.
///
/// No failure inside the session propagates as a panic; everything the UI
/// needs to render — including failed sends — arrives as an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A conversation was opened and its channel subscription established.
    ConversationOpened {
        /// The conversation now active.
        conversation_id: ConversationId,
    },
    /// The active conversation was closed and its local state cleared.
    ConversationClosed {
        /// The conversation that was active.
        conversation_id: ConversationId,
    },
    /// A new entry became visible: a provisional send or a new inbound
    /// message from the correspondent.
    MessageAppended {
        /// The visible message.
        message: ChatMessage,
    },
    /// A provisional entry was replaced in place by its authoritative copy.
    MessageReconciled {
        /// Identifier the provisional entry carried.
        replaced: MessageId,
        /// The authoritative message now at that position.
        message: ChatMessage,
    },
    /// A submission failed; its provisional entry has been removed and the
    /// user may resend.
    SendFailed {
        /// Identifier of the removed provisional entry.
        local_id: MessageId,
        /// Human-readable failure description.
        reason: String,
    },
}

/// State of the currently open conversation.
///
/// Insertion order of `messages` is display order; reconciliation replaces
/// entries in place and never reorders them.
#[derive(Debug, Default)]
pub struct ConversationSession {
    /// The open conversation, or `None` while the user is still choosing a
    /// correspondent.
    pub(crate) conversation_id: Option<ConversationId>,
    /// The other party's display metadata.
    pub(crate) correspondent: Option<Correspondent>,
    /// Ordered message list, provisional and authoritative entries mixed.
    pub(crate) messages: Vec<ChatMessage>,
}

impl ConversationSession {
    /// Creates an empty session with no conversation selected.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Owns a [`ConversationSession`] and drives the optimistic messaging
/// pipeline against the injected collaborators.
///
/// The session state lives behind a synchronous mutex: every application of
/// the matching rule (check-and-replace or check-and-append) runs as one
/// critical section, so two confirmations racing for the same provisional
/// entry can never both decide "no match" and append twice.
pub struct SessionManager<B: MessageBackend, R: RealtimeChannel> {
    /// Submission/history collaborator.
    pub(crate) backend: B,
    /// Realtime event collaborator.
    pub(crate) channel: R,
    /// Role stamped on outgoing messages.
    pub(crate) sender_role: SenderRole,
    /// The active conversation's state.
    pub(crate) session: Mutex<ConversationSession>,
    /// Channel for emitting session events to the UI layer.
    pub(crate) event_tx: mpsc::Sender<SessionEvent>,
}

impl<B: MessageBackend, R: RealtimeChannel> SessionManager<B, R> {
    /// Creates a new `SessionManager` with no conversation open.
    ///
    /// Returns the manager and a receiver for [`SessionEvent`]s that the
    /// UI layer should consume.
    pub fn new(
        backend: B,
        channel: R,
        sender_role: SenderRole,
        event_buffer: usize,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::channel(event_buffer);
        let manager = Self {
            backend,
            channel,
            sender_role,
            session: Mutex::new(ConversationSession::new()),
            event_tx,
        };
        (manager, event_rx)
    }

    /// Opens a conversation with the given correspondent.
    ///
    /// Leaves the previously open conversation's channel (if any), clears
    /// local message state, then joins the new conversation's channel. The
    /// clear happens before the join, so a late event for the previous
    /// conversation can only hit the conversation-id guard and be dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] if joining the new conversation's channel
    /// fails. The session state already points at the new conversation in
    /// that case; callers typically surface the error and retry or close.
    pub async fn open(
        &self,
        conversation_id: ConversationId,
        correspondent: Correspondent,
    ) -> Result<(), ChannelError> {
        let previous = {
            let mut session = self.session.lock();
            let previous = session.conversation_id.take();
            session.messages.clear();
            session.correspondent = Some(correspondent);
            session.conversation_id = Some(conversation_id.clone());
            previous
        };

        if let Some(previous) = previous {
            if let Err(e) = self.channel.leave(&previous).await {
                tracing::warn!(
                    conversation_id = %previous,
                    error = %e,
                    "failed to leave previous conversation"
                );
            }
        }

        self.channel.join(&conversation_id).await?;

        let _ = self
            .event_tx
            .try_send(SessionEvent::ConversationOpened { conversation_id });
        Ok(())
    }

    /// Closes the active conversation, clearing local state and leaving its
    /// channel. A no-op if no conversation is open.
    pub async fn close(&self) {
        let previous = {
            let mut session = self.session.lock();
            session.correspondent = None;
            session.messages.clear();
            session.conversation_id.take()
        };

        if let Some(conversation_id) = previous {
            if let Err(e) = self.channel.leave(&conversation_id).await {
                tracing::debug!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "leave on close failed"
                );
            }
            let _ = self
                .event_tx
                .try_send(SessionEvent::ConversationClosed { conversation_id });
        }
    }

    /// Returns the active conversation id, if one is open.
    #[must_use]
    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.session.lock().conversation_id.clone()
    }

    /// Returns the active correspondent's metadata, if one is selected.
    #[must_use]
    pub fn correspondent(&self) -> Option<Correspondent> {
        self.session.lock().correspondent.clone()
    }

    /// Returns a snapshot of the visible message list in display order.
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.session.lock().messages.clone()
    }

    /// Returns a reference to the underlying backend collaborator.
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns a reference to the underlying realtime channel.
    pub const fn channel(&self) -> &R {
        &self.channel
    }

    /// Returns the role stamped on outgoing messages.
    #[must_use]
    pub const fn sender_role(&self) -> SenderRole {
        self.sender_role
    }

    /// Emits the UI event corresponding to a reconciliation outcome.
    pub(crate) fn emit_reconciliation(&self, outcome: &Reconciliation, message: &ChatMessage) {
        match outcome {
            Reconciliation::AlreadyKnown => {
                tracing::debug!(message_id = %message.id, "message already reconciled");
            }
            Reconciliation::Replaced { replaced, .. } => {
                let _ = self.event_tx.try_send(SessionEvent::MessageReconciled {
                    replaced: replaced.clone(),
                    message: message.clone(),
                });
            }
            Reconciliation::Appended { .. } => {
                let _ = self.event_tx.try_send(SessionEvent::MessageAppended {
                    message: message.clone(),
                });
            }
        }
    }
}
