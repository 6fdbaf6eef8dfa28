//! Inbound merge for [`SessionManager`]: realtime events and the polling
//! fallback.
//!
//! Both drivers feed the same matching rule. The realtime path handles one
//! pushed event at a time; the polling path fetches a batch through the
//! backend and merges each message in turn — the rule's id check makes
//! re-fetched messages no-ops, so polling the same window repeatedly is
//! harmless.

use std::sync::Arc;
use std::time::Duration;

use shopchat_proto::message::ChatMessage;

use crate::backend::MessageBackend;
use crate::channel::{ChannelError, RealtimeChannel};

use super::{SessionManager, reconcile, reconcile::Reconciliation};

impl<B: MessageBackend, R: RealtimeChannel> SessionManager<B, R> {
    /// Merges one realtime message event into the session.
    ///
    /// Events for conversations other than the open one are dropped — the
    /// channel is expected to scope subscriptions per conversation, but a
    /// shared channel may still deliver foreign or late events, so the
    /// guard is required here regardless.
    pub fn handle_realtime(&self, message: ChatMessage) {
        if let Some(outcome) = self.apply_inbound(&message) {
            self.emit_reconciliation(&outcome, &message);
        }
    }

    /// Receives the next event from the realtime channel and merges it.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] if the channel is closed or fails; the
    /// session state is untouched in that case.
    pub async fn pump_one(&self) -> Result<(), ChannelError> {
        let message = self.channel.recv().await?;
        self.handle_realtime(message);
        Ok(())
    }

    /// Merges a fetched batch of messages, oldest first.
    ///
    /// Returns the number of messages that changed the visible list (new
    /// appends and provisional replacements; already-known messages do not
    /// count).
    pub fn merge_batch(&self, batch: Vec<ChatMessage>) -> usize {
        let mut changed = 0;
        for message in batch {
            if let Some(outcome) = self.apply_inbound(&message) {
                if !matches!(outcome, Reconciliation::AlreadyKnown) {
                    changed += 1;
                }
                self.emit_reconciliation(&outcome, &message);
            }
        }
        changed
    }

    /// Spawns a task that pumps the realtime channel until it closes.
    pub fn spawn_realtime_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()>
    where
        B: 'static,
        R: 'static,
    {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                if let Err(e) = manager.pump_one().await {
                    tracing::info!(error = %e, "realtime channel closed, stopping pump");
                    break;
                }
            }
        })
    }

    /// Spawns the polling fallback: every `interval`, fetch up to `limit`
    /// recent messages of the open conversation and merge them.
    ///
    /// Used by guest sessions that have no realtime channel; the task runs
    /// until the returned handle is aborted or the runtime shuts down.
    pub fn spawn_poll_task(
        self: &Arc<Self>,
        interval: Duration,
        limit: usize,
    ) -> tokio::task::JoinHandle<()>
    where
        B: 'static,
        R: 'static,
    {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                let Some(conversation_id) = manager.conversation_id() else {
                    continue;
                };
                match manager
                    .backend
                    .fetch_conversation(&conversation_id, limit)
                    .await
                {
                    Ok(batch) => {
                        let merged = manager.merge_batch(batch);
                        if merged > 0 {
                            tracing::debug!(
                                conversation_id = %conversation_id,
                                merged,
                                "merged polled messages"
                            );
                        }
                    }
                    Err(e) => {
                        tracing::debug!(
                            conversation_id = %conversation_id,
                            error = %e,
                            "history poll failed"
                        );
                    }
                }
            }
        })
    }

    /// Applies the matching rule to one inbound message under the session
    /// lock, returning `None` when the conversation-id guard drops it.
    fn apply_inbound(&self, message: &ChatMessage) -> Option<Reconciliation> {
        let mut session = self.session.lock();
        if session.conversation_id.as_ref() != Some(&message.conversation_id) {
            tracing::debug!(
                conversation_id = %message.conversation_id,
                message_id = %message.id,
                "dropping event for inactive conversation"
            );
            return None;
        }
        Some(reconcile::merge_authoritative(
            &mut session.messages,
            message.clone(),
        ))
    }
}
