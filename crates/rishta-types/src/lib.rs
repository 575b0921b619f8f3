pub mod api;
pub mod events;
pub mod models;
pub mod presence;

pub use events::{EventBatch, StoreEvent};
pub use models::{
    Conversation, ConversationId, ConversationStatus, Counterpart, DeliveryMarker, DeliveryState,
    LastMessage, Message, MessageId, ModerationStatus, UserId,
};
pub use presence::{PresenceSnapshot, PresenceState};
