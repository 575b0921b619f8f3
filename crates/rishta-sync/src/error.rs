use thiserror::Error;

use rishta_remote::RemoteError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("message is empty")]
    EmptyMessage,

    #[error("no active conversation")]
    NoActiveConversation,

    #[error("conversation is blocked")]
    ConversationBlocked,

    #[error(transparent)]
    Remote(#[from] RemoteError),
}
