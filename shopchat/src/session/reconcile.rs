//! The duplicate-suppression matching rule.
//!
//! An authoritative message can reach the session twice: once as the direct
//! response to a submission and once as the realtime echo broadcast back to
//! the sender. These pure functions decide, for one incoming authoritative
//! message, whether an existing entry already represents it — and if so
//! replace that entry in place — so that both delivery paths collapse to a
//! single visible message regardless of arrival order.
//!
//! All functions mutate the list under the caller's lock; none of them
//! suspend, so each application of the rule is a single critical section.

use shopchat_proto::message::{ChatMessage, MessageId};

/// Outcome of applying the matching rule to one authoritative message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// The message's id is already present; nothing changed.
    AlreadyKnown,
    /// A provisional entry was replaced in place at `index`.
    Replaced {
        /// Position of the replaced entry (unchanged by the replacement).
        index: usize,
        /// Identifier the replaced provisional entry carried.
        replaced: MessageId,
    },
    /// No existing entry matched; the message was appended at `index`.
    Appended {
        /// Position of the new entry.
        index: usize,
    },
}

/// Merges an authoritative message into the list, collapsing duplicates.
///
/// Rule, in priority order:
/// 1. an entry with the same id exists — already reconciled, no-op;
/// 2. the earliest still-provisional entry with the same conversation and
///    body text is replaced in place, preserving its position;
/// 3. otherwise the message is appended as new inbound.
///
/// Rule 2 matches on body only among *provisional* entries, so a genuinely
/// new inbound message that happens to repeat the text of an already
/// confirmed one is still appended.
pub fn merge_authoritative(
    messages: &mut Vec<ChatMessage>,
    incoming: ChatMessage,
) -> Reconciliation {
    if messages.iter().any(|m| m.id == incoming.id) {
        return Reconciliation::AlreadyKnown;
    }

    let provisional_match = messages.iter().position(|m| {
        m.is_provisional()
            && m.conversation_id == incoming.conversation_id
            && m.body == incoming.body
    });

    if let Some(index) = provisional_match {
        let replaced = messages[index].id.clone();
        messages[index] = incoming;
        return Reconciliation::Replaced { index, replaced };
    }

    messages.push(incoming);
    Reconciliation::Appended {
        index: messages.len() - 1,
    }
}

/// Reconciles the direct response to a submission, keyed by the provisional
/// entry's local id.
///
/// Preferring the local id over body matching means two rapid sends with
/// identical text each reconcile against their own confirmation. If the
/// provisional entry is already gone (the realtime echo won the race and
/// replaced it), the id check in rule 1 makes this a no-op; the generic
/// rule is the fallback for anything else.
pub fn reconcile_submission(
    messages: &mut Vec<ChatMessage>,
    local_id: &MessageId,
    authoritative: ChatMessage,
) -> Reconciliation {
    if messages.iter().any(|m| m.id == authoritative.id) {
        return Reconciliation::AlreadyKnown;
    }

    if let Some(index) = messages.iter().position(|m| m.id == *local_id) {
        let replaced = messages[index].id.clone();
        messages[index] = authoritative;
        return Reconciliation::Replaced { index, replaced };
    }

    merge_authoritative(messages, authoritative)
}

/// Removes a provisional entry after a failed submission.
///
/// Returns `false` if no entry with the given id remains (the session was
/// cleared, or the echo already reconciled it).
pub fn remove_provisional(messages: &mut Vec<ChatMessage>, local_id: &MessageId) -> bool {
    match messages.iter().position(|m| m.id == *local_id) {
        Some(index) => {
            messages.remove(index);
            true
        }
        None => false,
    }
}
