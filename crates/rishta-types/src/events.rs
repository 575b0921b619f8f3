use serde::{Deserialize, Serialize};

use crate::models::{ConversationId, ConversationStatus, Message, UserId};

/// Row-level change events pushed by the remote store. The store
/// broadcasts every event; consumers filter by conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StoreEvent {
    /// A new message row was inserted.
    MessageCreated { message: Message },

    /// An existing message row changed (read receipt, moderation).
    MessageUpdated { message: Message },

    /// A conversation row changed (block/unblock).
    ConversationUpdated {
        conversation_id: ConversationId,
        status: ConversationStatus,
    },

    /// A participant's typing flag flipped.
    TypingChanged {
        conversation_id: ConversationId,
        user_id: UserId,
        typing: bool,
    },
}

impl StoreEvent {
    /// The conversation this event is scoped to.
    pub fn conversation_id(&self) -> ConversationId {
        match self {
            Self::MessageCreated { message } | Self::MessageUpdated { message } => {
                message.conversation_id
            }
            Self::ConversationUpdated { conversation_id, .. } => *conversation_id,
            Self::TypingChanged { conversation_id, .. } => *conversation_id,
        }
    }
}

/// Batch of events returned by the HTTP long-poll endpoint, with the
/// cursor to resume from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBatch {
    pub cursor: u64,
    pub events: Vec<StoreEvent>,
}
