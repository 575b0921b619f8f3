use async_trait::async_trait;
use tokio::sync::broadcast;

use rishta_types::models::{
    Conversation, ConversationId, ConversationStatus, Message, UserId,
};
use rishta_types::presence::{PresenceSnapshot, PresenceState};
use rishta_types::StoreEvent;

use crate::error::RemoteError;

/// The remote data service the messaging core consumes. All durable
/// state lives behind this trait; the client holds a best-effort
/// eventually-consistent projection of it.
///
/// Implementations must be cheap to share (`Arc<dyn RemoteStore>`), and
/// every operation is a single request/response pair — the transport
/// guarantees no ordering beyond that.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Conversation list for `viewer`, counterpart profile joined in,
    /// newest activity first.
    async fn list_conversations(&self, viewer: UserId) -> Result<Vec<Conversation>, RemoteError>;

    /// Messages of one conversation, oldest first, as visible to `viewer`
    /// (rejected counterpart messages are withheld).
    async fn fetch_messages(
        &self,
        conversation: ConversationId,
        viewer: UserId,
    ) -> Result<Vec<Message>, RemoteError>;

    async fn insert_message(
        &self,
        conversation: ConversationId,
        sender: UserId,
        content: &str,
    ) -> Result<Message, RemoteError>;

    /// Atomic server-side procedure: set `read_at` on every unread message
    /// not sent by `reader` and zero the reader's unread count. Returns the
    /// number of messages updated. Preferred over [`mark_messages_read`].
    ///
    /// [`mark_messages_read`]: RemoteStore::mark_messages_read
    async fn mark_conversation_read(
        &self,
        conversation: ConversationId,
        reader: UserId,
    ) -> Result<u32, RemoteError>;

    /// Row-level fallback for the mark-read RPC: same end state, applied
    /// as individual row updates.
    async fn mark_messages_read(
        &self,
        conversation: ConversationId,
        reader: UserId,
    ) -> Result<(), RemoteError>;

    async fn set_conversation_status(
        &self,
        conversation: ConversationId,
        status: ConversationStatus,
    ) -> Result<(), RemoteError>;

    async fn delete_conversation(&self, conversation: ConversationId) -> Result<(), RemoteError>;

    async fn report_user(
        &self,
        conversation: ConversationId,
        reporter: UserId,
        reason: &str,
    ) -> Result<(), RemoteError>;

    /// Refresh `user`'s last-seen timestamp and online/away/offline state.
    async fn update_presence(&self, user: UserId, state: PresenceState)
        -> Result<(), RemoteError>;

    /// Server-side derived presence view for `user`.
    async fn presence_snapshot(&self, user: UserId) -> Result<PresenceSnapshot, RemoteError>;

    async fn set_typing(
        &self,
        conversation: ConversationId,
        user: UserId,
        typing: bool,
    ) -> Result<(), RemoteError>;

    /// Subscribe to row-level change events. Every subscriber receives
    /// every event; filter with [`StoreEvent::conversation_id`].
    fn events(&self) -> broadcast::Receiver<StoreEvent>;
}
