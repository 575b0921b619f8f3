use serde::{Deserialize, Serialize};

use crate::models::{ConversationStatus, UserId};
use crate::presence::PresenceState;

// -- Messages --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
}

/// Result of the atomic mark-conversation-read RPC.
#[derive(Debug, Serialize, Deserialize)]
pub struct MarkReadResponse {
    pub updated: u32,
}

// -- Conversations --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusUpdateRequest {
    pub status: ConversationStatus,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportRequest {
    pub reporter_id: UserId,
    pub reason: String,
}

// -- Presence --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PresenceUpdateRequest {
    pub state: PresenceState,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypingRequest {
    pub user_id: UserId,
    pub typing: bool,
}
