//! Local projection of the viewer's messaging state.
//!
//! Mutated only through the synchronizer's reconciliation path; poll
//! results and push events never write anywhere else.

use rishta_types::models::{Conversation, ConversationId, Message};

#[derive(Debug, Clone, Default)]
pub struct ChatState {
    /// Conversation list, newest activity first.
    pub conversations: Vec<Conversation>,

    /// The conversation whose messages are loaded, if any.
    pub active: Option<ConversationId>,

    /// Messages of the active conversation, oldest first.
    pub messages: Vec<Message>,

    /// The composer's current draft text.
    pub draft: String,

    /// True between the start of a message load and its completion.
    pub loading_messages: bool,
}

impl ChatState {
    pub fn conversation(&self, id: ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn conversation_mut(&mut self, id: ConversationId) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }

    pub fn active_conversation(&self) -> Option<&Conversation> {
        self.active.and_then(|id| self.conversation(id))
    }
}
