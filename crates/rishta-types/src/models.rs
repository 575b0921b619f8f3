use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = Uuid;
pub type ConversationId = Uuid;
pub type MessageId = Uuid;

/// Public profile fields of the other participant, joined into the
/// conversation row by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counterpart {
    pub id: UserId,
    pub display_name: String,
    pub verified: bool,
}

impl Counterpart {
    /// Generic identity shown in place of the real profile while the
    /// conversation is blocked.
    pub fn blocked_placeholder(id: UserId) -> Self {
        Self {
            id,
            display_name: "Blocked user".to_string(),
            verified: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Blocked,
}

/// Denormalized preview of the newest message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMessage {
    pub content: String,
    pub sent_at: DateTime<Utc>,
    pub sender_id: UserId,
    pub read: bool,
}

/// A conversation as seen by one participant. The remote store owns the
/// underlying pair row (exactly one per unordered pair of users) and
/// projects it per viewer: `unread_count` counts the viewer's unread
/// messages, typing fields describe the counterpart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub counterpart: Counterpart,
    pub status: ConversationStatus,
    pub last_message: Option<LastMessage>,
    pub counterpart_typing: bool,
    pub counterpart_last_typing_at: Option<DateTime<Utc>>,
    pub unread_count: u32,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_blocked(&self) -> bool {
        self.status == ConversationStatus::Blocked
    }

    /// The identity to render for the counterpart. While the conversation
    /// is blocked the real profile is replaced with a generic placeholder.
    pub fn counterpart_display(&self) -> Counterpart {
        if self.is_blocked() {
            Counterpart::blocked_placeholder(self.counterpart.id)
        } else {
            self.counterpart.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationStatus {
    Pending,
    Approved,
    Rejected,
}

/// Provisional delivery signal set by the backend. `Sent` means the
/// message was stored but not delivered (the recipient has blocked the
/// sender); `Unspecified` is the default and is read as delivered.
///
/// The backend leaves this field unset in the common case, which
/// conflates "not yet populated" with "delivered" — treat the mapping
/// as provisional until the owning service pins it down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMarker {
    #[default]
    Unspecified,
    Sent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub moderation: ModerationStatus,
    #[serde(default)]
    pub delivery_marker: DeliveryMarker,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn delivery_state(&self) -> DeliveryState {
        DeliveryState::of(self)
    }
}

/// Delivery/read status of a message, derived in one place so the
/// priority ordering is enforced in one place:
/// rejection beats read state, read state beats the delivery marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Rejected by moderation; never reaches the counterpart.
    Blocked,
    /// Read by the recipient.
    Read,
    /// Stored but withheld from the recipient (sender is blocked).
    Undelivered,
    /// Delivered, not yet read.
    Delivered,
}

impl DeliveryState {
    pub fn of(message: &Message) -> Self {
        if message.moderation == ModerationStatus::Rejected {
            Self::Blocked
        } else if message.read_at.is_some() {
            Self::Read
        } else if message.delivery_marker == DeliveryMarker::Sent {
            Self::Undelivered
        } else {
            Self::Delivered
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(
        moderation: ModerationStatus,
        marker: DeliveryMarker,
        read: bool,
    ) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            content: "hello".to_string(),
            moderation,
            delivery_marker: marker,
            read_at: read.then(Utc::now),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn rejection_beats_read_state() {
        let m = message(ModerationStatus::Rejected, DeliveryMarker::Unspecified, true);
        assert_eq!(m.delivery_state(), DeliveryState::Blocked);
    }

    #[test]
    fn read_beats_delivery_marker() {
        let m = message(ModerationStatus::Approved, DeliveryMarker::Sent, true);
        assert_eq!(m.delivery_state(), DeliveryState::Read);
    }

    #[test]
    fn sent_marker_means_undelivered() {
        let m = message(ModerationStatus::Approved, DeliveryMarker::Sent, false);
        assert_eq!(m.delivery_state(), DeliveryState::Undelivered);
    }

    #[test]
    fn default_unread_is_delivered() {
        let m = message(ModerationStatus::Approved, DeliveryMarker::Unspecified, false);
        assert_eq!(m.delivery_state(), DeliveryState::Delivered);

        let pending = message(ModerationStatus::Pending, DeliveryMarker::Unspecified, false);
        assert_eq!(pending.delivery_state(), DeliveryState::Delivered);
    }

    #[test]
    fn blocked_conversation_hides_profile() {
        let counterpart_id = Uuid::new_v4();
        let mut conv = Conversation {
            id: Uuid::new_v4(),
            counterpart: Counterpart {
                id: counterpart_id,
                display_name: "Amira".to_string(),
                verified: true,
            },
            status: ConversationStatus::Active,
            last_message: None,
            counterpart_typing: false,
            counterpart_last_typing_at: None,
            unread_count: 0,
            created_at: Utc::now(),
        };

        assert_eq!(conv.counterpart_display().display_name, "Amira");

        conv.status = ConversationStatus::Blocked;
        let shown = conv.counterpart_display();
        assert_eq!(shown.display_name, "Blocked user");
        assert_eq!(shown.id, counterpart_id);
        assert!(!shown.verified);
    }
}
