//! Relay wire protocol frames.
//!
//! Frames are postcard-encoded and carried in WebSocket binary frames
//! between Shopchat clients and the relay. A connection starts with a
//! [`ClientFrame::Hello`] / [`ServerFrame::Welcome`] handshake; after that
//! the client may join/leave conversations, submit messages, and fetch
//! history. Request/response pairs (`Submit`/`Accepted`+`Rejected`,
//! `Fetch`/`History`) are correlated by a client-chosen `client_ref`.

use serde::{Deserialize, Serialize};

use crate::message::{ChatMessage, ConversationId, SenderRole};

/// Frames sent from a client to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientFrame {
    /// Opens the session. Must be the first frame on a connection; the
    /// relay answers with [`ServerFrame::Welcome`].
    Hello {
        /// Which storefront surface this client speaks for.
        role: SenderRole,
    },

    /// Subscribes this connection to a conversation's message events.
    Join {
        /// The conversation to subscribe to.
        conversation_id: ConversationId,
    },

    /// Unsubscribes this connection from a conversation.
    Leave {
        /// The conversation to unsubscribe from.
        conversation_id: ConversationId,
    },

    /// Submits a new message for a conversation.
    ///
    /// The relay answers the submitting connection with
    /// [`ServerFrame::Accepted`] or [`ServerFrame::Rejected`] carrying the
    /// same `client_ref`, and additionally broadcasts the accepted message
    /// as a [`ServerFrame::Event`] to every subscriber of the conversation,
    /// the submitter included.
    Submit {
        /// Client-chosen correlation token for the direct response.
        client_ref: u64,
        /// Target conversation.
        conversation_id: ConversationId,
        /// Message text.
        body: String,
        /// Sender category to record on the message.
        sender_role: SenderRole,
    },

    /// Requests recent messages of a conversation (oldest first).
    Fetch {
        /// Client-chosen correlation token for the response.
        client_ref: u64,
        /// Conversation to read.
        conversation_id: ConversationId,
        /// Maximum number of messages to return.
        limit: u32,
    },
}

/// Frames sent from the relay to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerFrame {
    /// Acknowledges a [`ClientFrame::Hello`].
    Welcome,

    /// Direct response to a successful submission: the authoritative
    /// message with its server-assigned id and timestamp.
    Accepted {
        /// Echo of the submission's correlation token.
        client_ref: u64,
        /// The authoritative message.
        message: ChatMessage,
    },

    /// Direct response to a failed submission.
    Rejected {
        /// Echo of the submission's correlation token.
        client_ref: u64,
        /// Human-readable rejection reason.
        reason: String,
    },

    /// A message event for a conversation this connection has joined.
    Event {
        /// The authoritative message.
        message: ChatMessage,
    },

    /// Response to a [`ClientFrame::Fetch`].
    History {
        /// Echo of the fetch's correlation token.
        client_ref: u64,
        /// Conversation the messages belong to.
        conversation_id: ConversationId,
        /// Recent messages, oldest first.
        messages: Vec<ChatMessage>,
    },

    /// The relay reports a protocol-level error condition.
    Error {
        /// Human-readable error description.
        reason: String,
    },
}
