//! In-process reference implementation of [`RemoteStore`].
//!
//! Backs the integration tests and the demo session. Owns the same
//! invariants the hosted service owns: one row per unordered user pair,
//! `read_at` set at most once, unread bookkeeping on send and read,
//! presence rows that decay when not refreshed.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use rishta_types::models::{
    Conversation, ConversationId, ConversationStatus, Counterpart, DeliveryMarker, LastMessage,
    Message, MessageId, ModerationStatus, UserId,
};
use rishta_types::presence::{PresenceSnapshot, PresenceState};
use rishta_types::StoreEvent;

use crate::error::RemoteError;
use crate::store::RemoteStore;

/// A presence row not refreshed within this window reads as offline,
/// whatever state it was left in (three missed 30s heartbeats).
const ONLINE_TTL: i64 = 90;

/// Typing flags older than this are projected as not typing.
const TYPING_TTL: i64 = 5;

struct Side {
    profile: Counterpart,
    typing: bool,
    last_typing_at: Option<DateTime<Utc>>,
    unread: u32,
}

impl Side {
    fn new(profile: Counterpart) -> Self {
        Self {
            profile,
            typing: false,
            last_typing_at: None,
            unread: 0,
        }
    }

    fn typing_fresh(&self, now: DateTime<Utc>) -> bool {
        self.typing
            && self
                .last_typing_at
                .is_some_and(|at| now - at <= Duration::seconds(TYPING_TTL))
    }
}

struct PairRow {
    id: ConversationId,
    a: Side,
    b: Side,
    status: ConversationStatus,
    last_message: Option<LastMessage>,
    created_at: DateTime<Utc>,
}

impl PairRow {
    fn involves(&self, user: UserId) -> bool {
        self.a.profile.id == user || self.b.profile.id == user
    }

    fn side_mut(&mut self, user: UserId) -> Option<&mut Side> {
        if self.a.profile.id == user {
            Some(&mut self.a)
        } else if self.b.profile.id == user {
            Some(&mut self.b)
        } else {
            None
        }
    }

    fn other(&self, user: UserId) -> &Side {
        if self.a.profile.id == user { &self.b } else { &self.a }
    }

    fn other_mut(&mut self, user: UserId) -> &mut Side {
        if self.a.profile.id == user {
            &mut self.b
        } else {
            &mut self.a
        }
    }
}

struct PresenceRow {
    state: PresenceState,
    last_seen: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    conversations: HashMap<ConversationId, PairRow>,
    messages: HashMap<ConversationId, Vec<Message>>,
    presence: HashMap<UserId, PresenceRow>,
    reports: Vec<(ConversationId, UserId, String)>,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    events_tx: broadcast::Sender<StoreEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(1024);
        Self {
            inner: Mutex::new(Inner::default()),
            events_tx,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store lock poisoned")
    }

    fn publish(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }

    /// Create (or return) the conversation for an unordered user pair.
    /// First contact happens outside the messaging core, so this is not
    /// part of the [`RemoteStore`] surface.
    pub fn create_pair(&self, a: Counterpart, b: Counterpart) -> ConversationId {
        let mut inner = self.lock();
        if let Some(row) = inner
            .conversations
            .values()
            .find(|row| row.involves(a.id) && row.involves(b.id))
        {
            return row.id;
        }

        let id = Uuid::new_v4();
        inner.conversations.insert(
            id,
            PairRow {
                id,
                a: Side::new(a),
                b: Side::new(b),
                status: ConversationStatus::Active,
                last_message: None,
                created_at: Utc::now(),
            },
        );
        inner.messages.insert(id, Vec::new());
        id
    }

    /// Moderation decision, normally made by the admin backend.
    pub fn set_moderation(
        &self,
        message_id: MessageId,
        moderation: ModerationStatus,
    ) -> Result<(), RemoteError> {
        let updated = {
            let mut inner = self.lock();
            inner
                .messages
                .values_mut()
                .flatten()
                .find(|m| m.id == message_id)
                .map(|m| {
                    m.moderation = moderation;
                    m.clone()
                })
        }
        .ok_or(RemoteError::NotFound("message"))?;

        self.publish(StoreEvent::MessageUpdated { message: updated });
        Ok(())
    }

    /// Delivery marker, set by the backend when a message is stored but
    /// withheld from the recipient.
    pub fn set_delivery_marker(
        &self,
        message_id: MessageId,
        marker: DeliveryMarker,
    ) -> Result<(), RemoteError> {
        let updated = {
            let mut inner = self.lock();
            inner
                .messages
                .values_mut()
                .flatten()
                .find(|m| m.id == message_id)
                .map(|m| {
                    m.delivery_marker = marker;
                    m.clone()
                })
        }
        .ok_or(RemoteError::NotFound("message"))?;

        self.publish(StoreEvent::MessageUpdated { message: updated });
        Ok(())
    }

    /// Reports filed against a conversation, oldest first.
    pub fn reports_for(&self, conversation: ConversationId) -> Vec<(UserId, String)> {
        self.lock()
            .reports
            .iter()
            .filter(|(c, _, _)| *c == conversation)
            .map(|(_, reporter, reason)| (*reporter, reason.clone()))
            .collect()
    }

    fn project(row: &PairRow, viewer: UserId, now: DateTime<Utc>) -> Conversation {
        let other = row.other(viewer);
        let mine = if row.a.profile.id == viewer { &row.a } else { &row.b };
        Conversation {
            id: row.id,
            counterpart: other.profile.clone(),
            status: row.status,
            last_message: row.last_message.clone(),
            counterpart_typing: other.typing_fresh(now),
            counterpart_last_typing_at: other.last_typing_at,
            unread_count: mine.unread,
            created_at: row.created_at,
        }
    }

    /// Set `read_at` on the reader's unread messages and zero their unread
    /// count. Returns the changed messages for event publication.
    fn apply_read(
        inner: &mut Inner,
        conversation: ConversationId,
        reader: UserId,
    ) -> Result<Vec<Message>, RemoteError> {
        let row = inner
            .conversations
            .get_mut(&conversation)
            .ok_or(RemoteError::NotFound("conversation"))?;
        if row.side_mut(reader).is_none() {
            return Err(RemoteError::NotFound("participant"));
        }

        let now = Utc::now();
        let mut changed = Vec::new();
        if let Some(messages) = inner.messages.get_mut(&conversation) {
            for message in messages.iter_mut() {
                if message.sender_id != reader
                    && message.read_at.is_none()
                    && message.moderation != ModerationStatus::Rejected
                {
                    message.read_at = Some(now);
                    changed.push(message.clone());
                }
            }
        }

        let row = inner
            .conversations
            .get_mut(&conversation)
            .expect("checked above");
        if let Some(side) = row.side_mut(reader) {
            side.unread = 0;
        }
        if let Some(last) = row.last_message.as_mut() {
            if last.sender_id != reader {
                last.read = true;
            }
        }

        Ok(changed)
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list_conversations(&self, viewer: UserId) -> Result<Vec<Conversation>, RemoteError> {
        let now = Utc::now();
        let inner = self.lock();
        let mut list: Vec<Conversation> = inner
            .conversations
            .values()
            .filter(|row| row.involves(viewer))
            .map(|row| Self::project(row, viewer, now))
            .collect();
        list.sort_by_key(|c| {
            std::cmp::Reverse(c.last_message.as_ref().map_or(c.created_at, |m| m.sent_at))
        });
        Ok(list)
    }

    async fn fetch_messages(
        &self,
        conversation: ConversationId,
        viewer: UserId,
    ) -> Result<Vec<Message>, RemoteError> {
        let inner = self.lock();
        let messages = inner
            .messages
            .get(&conversation)
            .ok_or(RemoteError::NotFound("conversation"))?;
        Ok(messages
            .iter()
            .filter(|m| m.sender_id == viewer || m.moderation != ModerationStatus::Rejected)
            .cloned()
            .collect())
    }

    async fn insert_message(
        &self,
        conversation: ConversationId,
        sender: UserId,
        content: &str,
    ) -> Result<Message, RemoteError> {
        let message = {
            let mut inner = self.lock();
            let row = inner
                .conversations
                .get_mut(&conversation)
                .ok_or(RemoteError::NotFound("conversation"))?;
            if !row.involves(sender) {
                return Err(RemoteError::NotFound("participant"));
            }
            if row.status == ConversationStatus::Blocked {
                return Err(RemoteError::status(409, "conversation is blocked"));
            }

            let now = Utc::now();
            let message = Message {
                id: Uuid::new_v4(),
                conversation_id: conversation,
                sender_id: sender,
                content: content.to_string(),
                moderation: ModerationStatus::Approved,
                delivery_marker: DeliveryMarker::Unspecified,
                read_at: None,
                created_at: now,
            };

            row.last_message = Some(LastMessage {
                content: message.content.clone(),
                sent_at: now,
                sender_id: sender,
                read: false,
            });
            row.other_mut(sender).unread += 1;

            inner
                .messages
                .get_mut(&conversation)
                .expect("messages row exists for every conversation")
                .push(message.clone());
            message
        };

        self.publish(StoreEvent::MessageCreated {
            message: message.clone(),
        });
        Ok(message)
    }

    async fn mark_conversation_read(
        &self,
        conversation: ConversationId,
        reader: UserId,
    ) -> Result<u32, RemoteError> {
        let changed = {
            let mut inner = self.lock();
            Self::apply_read(&mut inner, conversation, reader)?
        };
        let count = changed.len() as u32;
        for message in changed {
            self.publish(StoreEvent::MessageUpdated { message });
        }
        Ok(count)
    }

    async fn mark_messages_read(
        &self,
        conversation: ConversationId,
        reader: UserId,
    ) -> Result<(), RemoteError> {
        let changed = {
            let mut inner = self.lock();
            Self::apply_read(&mut inner, conversation, reader)?
        };
        for message in changed {
            self.publish(StoreEvent::MessageUpdated { message });
        }
        Ok(())
    }

    async fn set_conversation_status(
        &self,
        conversation: ConversationId,
        status: ConversationStatus,
    ) -> Result<(), RemoteError> {
        {
            let mut inner = self.lock();
            let row = inner
                .conversations
                .get_mut(&conversation)
                .ok_or(RemoteError::NotFound("conversation"))?;
            row.status = status;
        }
        self.publish(StoreEvent::ConversationUpdated {
            conversation_id: conversation,
            status,
        });
        Ok(())
    }

    async fn delete_conversation(&self, conversation: ConversationId) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner
            .conversations
            .remove(&conversation)
            .ok_or(RemoteError::NotFound("conversation"))?;
        inner.messages.remove(&conversation);
        Ok(())
    }

    async fn report_user(
        &self,
        conversation: ConversationId,
        reporter: UserId,
        reason: &str,
    ) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        if !inner.conversations.contains_key(&conversation) {
            return Err(RemoteError::NotFound("conversation"));
        }
        inner.reports.push((conversation, reporter, reason.to_string()));
        Ok(())
    }

    async fn update_presence(
        &self,
        user: UserId,
        state: PresenceState,
    ) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.presence.insert(
            user,
            PresenceRow {
                state,
                last_seen: Utc::now(),
            },
        );
        Ok(())
    }

    async fn presence_snapshot(&self, user: UserId) -> Result<PresenceSnapshot, RemoteError> {
        let inner = self.lock();
        let row = inner
            .presence
            .get(&user)
            .ok_or(RemoteError::NotFound("user"))?;
        let age = Utc::now() - row.last_seen;
        let state = if age > Duration::seconds(ONLINE_TTL) {
            PresenceState::Offline
        } else {
            row.state
        };
        Ok(PresenceSnapshot {
            user_id: user,
            state,
            last_seen_minutes: age.num_minutes().max(0),
        })
    }

    async fn set_typing(
        &self,
        conversation: ConversationId,
        user: UserId,
        typing: bool,
    ) -> Result<(), RemoteError> {
        {
            let mut inner = self.lock();
            let row = inner
                .conversations
                .get_mut(&conversation)
                .ok_or(RemoteError::NotFound("conversation"))?;
            let side = row
                .side_mut(user)
                .ok_or(RemoteError::NotFound("participant"))?;
            side.typing = typing;
            if typing {
                side.last_typing_at = Some(Utc::now());
            }
        }
        self.publish(StoreEvent::TypingChanged {
            conversation_id: conversation,
            user_id: user,
            typing,
        });
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<StoreEvent> {
        self.events_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(name: &str) -> Counterpart {
        Counterpart {
            id: Uuid::new_v4(),
            display_name: name.to_string(),
            verified: false,
        }
    }

    #[tokio::test]
    async fn one_conversation_per_pair() {
        let store = MemoryStore::new();
        let a = profile("a");
        let b = profile("b");
        let first = store.create_pair(a.clone(), b.clone());
        let second = store.create_pair(b, a);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn send_updates_unread_and_preview() {
        let store = MemoryStore::new();
        let a = profile("a");
        let b = profile("b");
        let conv = store.create_pair(a.clone(), b.clone());

        store.insert_message(conv, a.id, "salaam").await.unwrap();
        store.insert_message(conv, a.id, "how are you").await.unwrap();

        let for_b = store.list_conversations(b.id).await.unwrap();
        assert_eq!(for_b.len(), 1);
        assert_eq!(for_b[0].unread_count, 2);
        let last = for_b[0].last_message.as_ref().unwrap();
        assert_eq!(last.content, "how are you");
        assert!(!last.read);

        // The sender's own unread count is untouched.
        let for_a = store.list_conversations(a.id).await.unwrap();
        assert_eq!(for_a[0].unread_count, 0);
    }

    #[tokio::test]
    async fn mark_read_rpc_zeroes_unread_once() {
        let store = MemoryStore::new();
        let a = profile("a");
        let b = profile("b");
        let conv = store.create_pair(a.clone(), b.clone());
        store.insert_message(conv, a.id, "salaam").await.unwrap();

        assert_eq!(store.mark_conversation_read(conv, b.id).await.unwrap(), 1);
        // Second call finds nothing left to update.
        assert_eq!(store.mark_conversation_read(conv, b.id).await.unwrap(), 0);

        let for_b = store.list_conversations(b.id).await.unwrap();
        assert_eq!(for_b[0].unread_count, 0);

        let for_a = store.list_conversations(a.id).await.unwrap();
        assert!(for_a[0].last_message.as_ref().unwrap().read);
    }

    #[tokio::test]
    async fn rejected_messages_hidden_from_recipient_only() {
        let store = MemoryStore::new();
        let a = profile("a");
        let b = profile("b");
        let conv = store.create_pair(a.clone(), b.clone());
        let msg = store.insert_message(conv, a.id, "spam").await.unwrap();
        store
            .set_moderation(msg.id, ModerationStatus::Rejected)
            .unwrap();

        assert_eq!(store.fetch_messages(conv, b.id).await.unwrap().len(), 0);
        // The sender still sees their own message (rendered as Blocked).
        assert_eq!(store.fetch_messages(conv, a.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn blocked_conversation_rejects_insert() {
        let store = MemoryStore::new();
        let a = profile("a");
        let b = profile("b");
        let conv = store.create_pair(a.clone(), b.clone());
        store
            .set_conversation_status(conv, ConversationStatus::Blocked)
            .await
            .unwrap();

        let err = store.insert_message(conv, a.id, "hello").await.unwrap_err();
        assert!(matches!(err, RemoteError::Status { status: 409, .. }));
    }

    #[tokio::test]
    async fn presence_decays_to_offline() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        store
            .update_presence(user, PresenceState::Online)
            .await
            .unwrap();

        let snap = store.presence_snapshot(user).await.unwrap();
        assert!(snap.is_online());
        assert_eq!(snap.last_seen_minutes, 0);

        // Age the row past the online TTL.
        {
            let mut inner = store.lock();
            inner.presence.get_mut(&user).unwrap().last_seen =
                Utc::now() - Duration::seconds(ONLINE_TTL + 30);
        }
        let snap = store.presence_snapshot(user).await.unwrap();
        assert_eq!(snap.state, PresenceState::Offline);
        assert!(!snap.is_online());
    }

    #[tokio::test]
    async fn reports_are_recorded() {
        let store = MemoryStore::new();
        let a = profile("a");
        let b = profile("b");
        let conv = store.create_pair(a.clone(), b.clone());

        store
            .report_user(conv, b.id, "inappropriate messages")
            .await
            .unwrap();
        assert_eq!(
            store.reports_for(conv),
            vec![(b.id, "inappropriate messages".to_string())]
        );

        let err = store
            .report_user(Uuid::new_v4(), b.id, "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::NotFound("conversation")));
    }

    #[tokio::test]
    async fn typing_events_published() {
        let store = MemoryStore::new();
        let a = profile("a");
        let b = profile("b");
        let conv = store.create_pair(a.clone(), b.clone());

        let mut rx = store.events();
        store.set_typing(conv, a.id, true).await.unwrap();

        match rx.recv().await.unwrap() {
            StoreEvent::TypingChanged {
                conversation_id,
                user_id,
                typing,
            } => {
                assert_eq!(conversation_id, conv);
                assert_eq!(user_id, a.id);
                assert!(typing);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let for_b = store.list_conversations(b.id).await.unwrap();
        assert!(for_b[0].counterpart_typing);
    }
}
