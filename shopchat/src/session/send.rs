//! Optimistic send pipeline for [`SessionManager`].
//!
//! A send becomes visible immediately as a provisional entry and is
//! reconciled with the authoritative copy when the submission resolves —
//! unless the realtime echo got there first, in which case the resolution
//! is a no-op.

use shopchat_proto::message::{ChatMessage, MessageId, Timestamp, validate_body};

use crate::backend::MessageBackend;
use crate::channel::RealtimeChannel;

use super::{SendError, SessionEvent, SessionManager, reconcile};

impl<B: MessageBackend, R: RealtimeChannel> SessionManager<B, R> {
    /// Sends a message in the open conversation.
    ///
    /// Pipeline:
    /// 1. Trim and validate the body.
    /// 2. Build a provisional message with a fresh local id and append it to
    ///    the session list — immediately visible, before any network I/O.
    /// 3. Submit to the backend.
    /// 4. On success, replace the provisional entry in place with the
    ///    authoritative message (idempotent if the realtime echo already
    ///    did); on failure, remove the provisional entry and emit
    ///    [`SessionEvent::SendFailed`].
    ///
    /// There is no automatic retry; the user resends manually.
    ///
    /// Returns the provisional entry's local id on success.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Validation`] or [`SendError::NoConversation`]
    /// without touching session state. Returns [`SendError::Backend`] after
    /// the provisional entry has been removed and the failure emitted as an
    /// event, so no cleanup is left to the caller.
    pub async fn send(&self, body: &str) -> Result<MessageId, SendError> {
        let body = body.trim();
        validate_body(body)?;

        let (local_id, conversation_id, provisional) = {
            let mut session = self.session.lock();
            let Some(conversation_id) = session.conversation_id.clone() else {
                return Err(SendError::NoConversation);
            };
            let provisional = ChatMessage {
                id: MessageId::local(),
                conversation_id: conversation_id.clone(),
                body: body.to_string(),
                sender_role: self.sender_role,
                created_at: Timestamp::now(),
            };
            let local_id = provisional.id.clone();
            session.messages.push(provisional.clone());
            (local_id, conversation_id, provisional)
        };

        let _ = self.event_tx.try_send(SessionEvent::MessageAppended {
            message: provisional,
        });

        match self
            .backend
            .submit(&conversation_id, body, self.sender_role)
            .await
        {
            Ok(authoritative) => {
                self.finish_submission(&local_id, authoritative);
                Ok(local_id)
            }
            Err(e) => {
                let removed = {
                    let mut session = self.session.lock();
                    reconcile::remove_provisional(&mut session.messages, &local_id)
                };
                tracing::debug!(
                    local_id = %local_id,
                    removed,
                    error = %e,
                    "submission failed, provisional entry removed"
                );
                let _ = self.event_tx.try_send(SessionEvent::SendFailed {
                    local_id: local_id.clone(),
                    reason: e.to_string(),
                });
                Err(SendError::Backend(e))
            }
        }
    }

    /// Applies a submission's direct response to the session.
    ///
    /// If the session moved to a different conversation while the
    /// submission was in flight, the confirmation is stale and dropped.
    fn finish_submission(&self, local_id: &MessageId, authoritative: ChatMessage) {
        let outcome = {
            let mut session = self.session.lock();
            if session.conversation_id.as_ref() != Some(&authoritative.conversation_id) {
                tracing::debug!(
                    message_id = %authoritative.id,
                    conversation_id = %authoritative.conversation_id,
                    "dropping confirmation for a conversation no longer open"
                );
                None
            } else {
                Some(reconcile::reconcile_submission(
                    &mut session.messages,
                    local_id,
                    authoritative.clone(),
                ))
            }
        };

        if let Some(outcome) = outcome {
            self.emit_reconciliation(&outcome, &authoritative);
        }
    }
}
