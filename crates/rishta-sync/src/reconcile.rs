//! Monotone merging of incoming store state into the local projection.
//!
//! The transport guarantees nothing beyond per-call request/response
//! pairing, so polls and push events can arrive out of order. Every
//! merge here takes `(local, incoming)` and keeps the more advanced
//! value by an explicit partial order — a stale fetch can never revert
//! a read receipt the client already holds. Each function also reports
//! whether anything changed, so callers can skip redundant re-renders.

use std::collections::HashMap;

use rishta_types::models::{Conversation, Message};

/// Merge one message. Incoming is authoritative for every field except
/// `read_at`, where set beats unset: an authoritative timestamp replaces
/// an optimistic one, but an unset incoming value never clears a local
/// receipt.
pub fn merge_message(local: &Message, incoming: &Message) -> (Message, bool) {
    let mut merged = incoming.clone();
    if merged.read_at.is_none() {
        merged.read_at = local.read_at;
    }
    let changed = merged != *local;
    (merged, changed)
}

/// Merge a fetched message list into the local one.
///
/// Local messages absent from the fetch are kept: a just-sent message
/// missing from a stale response is staleness, not contradiction. The
/// result is ordered by creation time.
pub fn merge_messages(local: &[Message], incoming: Vec<Message>) -> (Vec<Message>, bool) {
    let by_id: HashMap<_, _> = local.iter().map(|m| (m.id, m)).collect();

    let mut merged: Vec<Message> = incoming
        .into_iter()
        .map(|inc| match by_id.get(&inc.id) {
            Some(loc) => merge_message(loc, &inc).0,
            None => inc,
        })
        .collect();

    for message in local {
        if !merged.iter().any(|m| m.id == message.id) {
            merged.push(message.clone());
        }
    }
    merged.sort_by_key(|m| (m.created_at, m.id));

    let changed = merged != local;
    (merged, changed)
}

/// Merge one conversation row. Incoming wins except where the local side
/// is more advanced: a locally newer last-message preview (an optimistic
/// send the store hasn't reflected yet) is kept, and for the same
/// preview the read flag only moves from unread to read.
pub fn merge_conversation(local: &Conversation, incoming: &Conversation) -> (Conversation, bool) {
    let mut merged = incoming.clone();

    match (&local.last_message, &incoming.last_message) {
        (Some(loc), Some(inc)) => {
            if loc.sent_at > inc.sent_at {
                merged.last_message = local.last_message.clone();
            } else if loc.sender_id == inc.sender_id
                && loc.sent_at == inc.sent_at
                && loc.read
                && !inc.read
            {
                if let Some(preview) = merged.last_message.as_mut() {
                    preview.read = true;
                }
            }
        }
        (Some(_), None) => {
            merged.last_message = local.last_message.clone();
        }
        _ => {}
    }

    let changed = merged != *local;
    (merged, changed)
}

/// Merge the fetched conversation list. Membership and order follow the
/// fetch (a row the store no longer returns is gone); surviving rows are
/// merged individually.
pub fn merge_conversations(
    local: &[Conversation],
    incoming: Vec<Conversation>,
) -> (Vec<Conversation>, bool) {
    let by_id: HashMap<_, _> = local.iter().map(|c| (c.id, c)).collect();

    let merged: Vec<Conversation> = incoming
        .into_iter()
        .map(|inc| match by_id.get(&inc.id) {
            Some(loc) => merge_conversation(loc, &inc).0,
            None => inc,
        })
        .collect();

    let changed = merged != local;
    (merged, changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use rishta_types::models::{
        ConversationStatus, Counterpart, DeliveryMarker, LastMessage, ModerationStatus,
    };

    fn message(sender: Uuid, read: bool) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sender_id: sender,
            content: "hello".to_string(),
            moderation: ModerationStatus::Approved,
            delivery_marker: DeliveryMarker::Unspecified,
            read_at: read.then(Utc::now),
            created_at: Utc::now(),
        }
    }

    fn conversation(counterpart: Uuid) -> Conversation {
        Conversation {
            id: Uuid::new_v4(),
            counterpart: Counterpart {
                id: counterpart,
                display_name: "other".to_string(),
                verified: false,
            },
            status: ConversationStatus::Active,
            last_message: None,
            counterpart_typing: false,
            counterpart_last_typing_at: None,
            unread_count: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn stale_unset_read_at_cannot_regress() {
        let sender = Uuid::new_v4();
        let mut local = message(sender, true);
        let mut stale = local.clone();
        stale.read_at = None;

        let (merged, changed) = merge_message(&local, &stale);
        assert_eq!(merged.read_at, local.read_at);
        assert!(!changed);

        // The authoritative receipt replaces the optimistic timestamp.
        let authoritative = Utc::now() + Duration::seconds(5);
        let mut incoming = local.clone();
        incoming.read_at = Some(authoritative);
        let (merged, changed) = merge_message(&local, &incoming);
        assert_eq!(merged.read_at, Some(authoritative));
        assert!(changed);

        // Unchanged incoming reports no change.
        local.read_at = Some(authoritative);
        let (_, changed) = merge_message(&local, &incoming);
        assert!(!changed);
    }

    #[test]
    fn incoming_moderation_applies_without_touching_receipt() {
        let local = message(Uuid::new_v4(), true);
        let mut incoming = local.clone();
        incoming.read_at = None;
        incoming.moderation = ModerationStatus::Rejected;

        let (merged, changed) = merge_message(&local, &incoming);
        assert!(changed);
        assert_eq!(merged.moderation, ModerationStatus::Rejected);
        assert_eq!(merged.read_at, local.read_at);
    }

    #[test]
    fn stale_fetch_keeps_optimistic_append() {
        let sender = Uuid::new_v4();
        let older = message(sender, false);
        let mut newer = message(sender, false);
        newer.created_at = older.created_at + Duration::seconds(10);

        let local = vec![older.clone(), newer.clone()];
        // A stale fetch that predates the send.
        let (merged, changed) = merge_messages(&local, vec![older.clone()]);
        assert!(!changed);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].id, newer.id);

        // A fetch with a genuinely new message appends it in order.
        let mut third = message(sender, false);
        third.created_at = newer.created_at + Duration::seconds(10);
        let (merged, changed) =
            merge_messages(&local, vec![older, newer, third.clone()]);
        assert!(changed);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[2].id, third.id);
    }

    #[test]
    fn preview_read_flag_is_monotone() {
        let counterpart = Uuid::new_v4();
        let me = Uuid::new_v4();
        let sent_at = Utc::now();

        let mut local = conversation(counterpart);
        local.last_message = Some(LastMessage {
            content: "hi".to_string(),
            sent_at,
            sender_id: me,
            read: true,
        });

        let mut stale = local.clone();
        if let Some(m) = stale.last_message.as_mut() {
            m.read = false;
        }

        let (merged, changed) = merge_conversation(&local, &stale);
        assert!(merged.last_message.unwrap().read);
        assert!(!changed);
    }

    #[test]
    fn newer_local_preview_survives_stale_row() {
        let counterpart = Uuid::new_v4();
        let me = Uuid::new_v4();
        let now = Utc::now();

        let mut local = conversation(counterpart);
        local.last_message = Some(LastMessage {
            content: "just sent".to_string(),
            sent_at: now,
            sender_id: me,
            read: false,
        });

        let mut stale = local.clone();
        stale.last_message = Some(LastMessage {
            content: "older".to_string(),
            sent_at: now - Duration::seconds(60),
            sender_id: counterpart,
            read: true,
        });
        stale.unread_count = 1;

        let (merged, _) = merge_conversation(&local, &stale);
        assert_eq!(merged.last_message.unwrap().content, "just sent");
        // Counts follow the incoming row; the caller pins the active
        // conversation separately.
        assert_eq!(merged.unread_count, 1);
    }

    #[test]
    fn dropped_rows_leave_the_list() {
        let a = conversation(Uuid::new_v4());
        let b = conversation(Uuid::new_v4());

        let (merged, changed) = merge_conversations(&[a.clone(), b], vec![a.clone()]);
        assert!(changed);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, a.id);
    }
}
