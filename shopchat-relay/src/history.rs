//! Bounded in-memory conversation history.
//!
//! The [`HistoryStore`] keeps the most recent messages of each conversation
//! so that polling clients (guest sessions without a realtime channel) can
//! fetch what they missed. Each conversation's history is capped; the
//! oldest message is evicted FIFO when the cap is exceeded.

use std::collections::{HashMap, VecDeque};

use tokio::sync::RwLock;

use shopchat_proto::message::{ChatMessage, ConversationId};

/// Default maximum number of retained messages per conversation.
const DEFAULT_MAX_PER_CONVERSATION: usize = 500;

/// In-memory per-conversation message history with FIFO eviction.
pub struct HistoryStore {
    conversations: RwLock<HashMap<ConversationId, VecDeque<ChatMessage>>>,
    max_per_conversation: usize,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryStore {
    /// Creates an empty store with the default retention cap.
    #[must_use]
    pub fn new() -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            max_per_conversation: DEFAULT_MAX_PER_CONVERSATION,
        }
    }

    /// Creates an empty store with a custom retention cap.
    #[must_use]
    pub fn with_max_per_conversation(max_per_conversation: usize) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            max_per_conversation,
        }
    }

    /// Appends an accepted message to its conversation's history, evicting
    /// the oldest entry when the cap is exceeded. Returns the new length.
    pub async fn append(&self, message: ChatMessage) -> usize {
        let mut conversations = self.conversations.write().await;
        let history = conversations
            .entry(message.conversation_id.clone())
            .or_default();
        history.push_back(message);
        if history.len() > self.max_per_conversation {
            history.pop_front();
        }
        history.len()
    }

    /// Returns up to `limit` most recent messages, oldest first.
    pub async fn recent(&self, conversation_id: &ConversationId, limit: usize) -> Vec<ChatMessage> {
        let conversations = self.conversations.read().await;
        conversations
            .get(conversation_id)
            .map(|history| {
                let skip = history.len().saturating_sub(limit);
                history.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }
}
