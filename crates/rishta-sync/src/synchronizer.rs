//! The conversation synchronizer: keeps the local conversation list and
//! the active conversation's messages plausible under concurrent sends,
//! background polling, and the push-event channel.
//!
//! Single-writer policy: poll results and push events both land in the
//! same reconciliation path ([`crate::reconcile`]); nothing else mutates
//! [`ChatState`].

use std::cmp::Reverse;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use rishta_presence::PresenceTracker;
use rishta_remote::RemoteStore;
use rishta_types::models::{Conversation, ConversationId, ConversationStatus, LastMessage, Message, UserId};
use rishta_types::StoreEvent;

use crate::error::SyncError;
use crate::events::SyncEvent;
use crate::reconcile;
use crate::scroll::{ScrollSync, ViewportMetrics};
use crate::state::ChatState;

/// Cadence of the background reconciliation poll — a backstop for
/// missed push events, not the primary update path.
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
        }
    }
}

#[derive(Clone)]
pub struct Synchronizer {
    inner: Arc<SyncInner>,
}

struct SyncInner {
    store: Arc<dyn RemoteStore>,
    presence: PresenceTracker,
    viewer: UserId,
    config: SyncConfig,
    state: RwLock<ChatState>,
    scroll: std::sync::Mutex<ScrollSync>,
    events_tx: broadcast::Sender<SyncEvent>,
    /// Bumped whenever the active conversation changes; in-flight work
    /// captured under an older epoch discards its result instead of
    /// writing into the new conversation's state.
    epoch: AtomicU64,
    poll: Mutex<Option<JoinHandle<()>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Synchronizer {
    pub fn new(store: Arc<dyn RemoteStore>, presence: PresenceTracker, viewer: UserId) -> Self {
        Self::with_config(store, presence, viewer, SyncConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn RemoteStore>,
        presence: PresenceTracker,
        viewer: UserId,
        config: SyncConfig,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(SyncInner {
                store,
                presence,
                viewer,
                config,
                state: RwLock::new(ChatState::default()),
                scroll: std::sync::Mutex::new(ScrollSync::default()),
                events_tx,
                epoch: AtomicU64::new(0),
                poll: Mutex::new(None),
                listener: Mutex::new(None),
            }),
        }
    }

    pub fn viewer(&self) -> UserId {
        self.inner.viewer
    }

    pub fn presence(&self) -> PresenceTracker {
        self.inner.presence.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Cloned snapshot of the local state.
    pub async fn state(&self) -> ChatState {
        self.inner.state.read().await.clone()
    }

    // -- Conversation list --

    /// Fetch the conversation list. On failure the prior state is left
    /// untouched and the error is returned for the UI to surface.
    pub async fn load_conversations(&self) -> Result<(), SyncError> {
        let fetched = self.inner.store.list_conversations(self.inner.viewer).await?;

        let (changed, emptied) = {
            let mut state = self.inner.state.write().await;
            let (merged, mut changed) =
                reconcile::merge_conversations(&state.conversations, fetched);
            state.conversations = merged;

            // No conversation can stay active without a backing row.
            let emptied = state.conversations.is_empty() && state.active.is_some();
            if emptied {
                state.active = None;
                state.messages.clear();
                state.loading_messages = false;
                changed = true;
            }
            (changed, emptied)
        };

        if emptied {
            self.bump_epoch();
            self.stop_listener().await;
        }
        if changed {
            self.emit(SyncEvent::ConversationsUpdated);
        }
        Ok(())
    }

    // -- Active conversation --

    /// Switch to `conversation` and run the optimistic read flow:
    /// fetch, locally mark counterpart messages read before any remote
    /// confirmation, push receipts (RPC, then row fallback, then
    /// optimistic-only), zero the unread count, and reconcile against
    /// one authoritative background refetch.
    pub async fn open_conversation(&self, conversation: ConversationId) -> Result<(), SyncError> {
        let epoch = self.bump_epoch();
        {
            let mut state = self.inner.state.write().await;
            state.active = Some(conversation);
            state.loading_messages = true;
            state.messages.clear();
        }
        self.restart_listener(conversation, epoch).await;
        info!(%conversation, "opening conversation");

        let fetched = match self
            .inner
            .store
            .fetch_messages(conversation, self.inner.viewer)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                if self.is_current(epoch) {
                    self.inner.state.write().await.loading_messages = false;
                }
                return Err(e.into());
            }
        };
        if !self.is_current(epoch) {
            return Ok(());
        }

        // Optimistic receipts: the view must never show unread for
        // messages the viewer is looking at, so flip them before the
        // remote write settles.
        let now = Utc::now();
        {
            let mut state = self.inner.state.write().await;
            state.messages = fetched
                .into_iter()
                .map(|mut m| {
                    if m.sender_id != self.inner.viewer && m.read_at.is_none() {
                        m.read_at = Some(now);
                    }
                    m
                })
                .collect();
        }

        self.push_read_receipts(conversation).await;
        if !self.is_current(epoch) {
            return Ok(());
        }

        {
            let mut state = self.inner.state.write().await;
            if let Some(conv) = state.conversation_mut(conversation) {
                conv.unread_count = 0;
                if let Some(last) = conv.last_message.as_mut() {
                    if last.sender_id != self.inner.viewer {
                        last.read = true;
                    }
                }
            }
            state.loading_messages = false;
        }

        self.inner
            .scroll
            .lock()
            .expect("scroll lock poisoned")
            .on_messages_loaded();
        self.emit(SyncEvent::MessagesUpdated {
            conversation_id: conversation,
        });
        self.emit(SyncEvent::ConversationsUpdated);
        self.emit(SyncEvent::ScrollToLatest);

        // One authoritative refetch to pick up server-side read_at values.
        let this = self.clone();
        tokio::spawn(async move {
            this.refetch_messages(conversation, epoch).await;
        });

        Ok(())
    }

    /// The view reports how its scroll attempt went; a layout race gets
    /// exactly one retry.
    pub fn report_viewport(&self, metrics: ViewportMetrics) {
        let retry = self
            .inner
            .scroll
            .lock()
            .expect("scroll lock poisoned")
            .on_viewport_report(metrics);
        if retry.is_some() {
            self.emit(SyncEvent::ScrollToLatest);
        }
    }

    // -- Composer --

    pub async fn set_draft(&self, content: impl Into<String>) {
        self.inner.state.write().await.draft = content.into();
    }

    pub async fn draft(&self) -> String {
        self.inner.state.read().await.draft.clone()
    }

    /// Send the draft. Validation short-circuits before any remote call;
    /// the draft is only cleared on confirmed success.
    pub async fn send_draft(&self) -> Result<Message, SyncError> {
        let (conversation, content) = {
            let state = self.inner.state.read().await;
            let content = state.draft.trim().to_string();
            if content.is_empty() {
                return Err(SyncError::EmptyMessage);
            }
            let Some(active) = state.active else {
                return Err(SyncError::NoActiveConversation);
            };
            let conv = state
                .conversation(active)
                .ok_or(SyncError::NoActiveConversation)?;
            if conv.is_blocked() {
                return Err(SyncError::ConversationBlocked);
            }
            (active, content)
        };

        let message = self
            .inner
            .store
            .insert_message(conversation, self.inner.viewer, &content)
            .await?;

        {
            let mut state = self.inner.state.write().await;
            if state.active == Some(conversation)
                && !state.messages.iter().any(|m| m.id == message.id)
            {
                state.messages.push(message.clone());
            }
            if let Some(conv) = state.conversation_mut(conversation) {
                conv.last_message = Some(LastMessage {
                    content: message.content.clone(),
                    sent_at: message.created_at,
                    sender_id: self.inner.viewer,
                    read: false,
                });
            }
            resort(&mut state.conversations);
            state.draft.clear();
        }

        self.inner.presence.stop_typing(conversation).await;

        self.emit(SyncEvent::MessagesUpdated {
            conversation_id: conversation,
        });
        self.emit(SyncEvent::ConversationsUpdated);
        Ok(message)
    }

    // -- Blocking, reporting, deletion --

    /// Block the counterpart in the active conversation. The local
    /// status flips immediately on remote success, disabling sends
    /// client-side and hiding the counterpart's profile.
    pub async fn block_counterpart(&self) -> Result<(), SyncError> {
        self.set_active_status(ConversationStatus::Blocked).await
    }

    pub async fn unblock_counterpart(&self) -> Result<(), SyncError> {
        self.set_active_status(ConversationStatus::Active).await
    }

    async fn set_active_status(&self, status: ConversationStatus) -> Result<(), SyncError> {
        let conversation = self
            .inner
            .state
            .read()
            .await
            .active
            .ok_or(SyncError::NoActiveConversation)?;

        self.inner
            .store
            .set_conversation_status(conversation, status)
            .await?;

        {
            let mut state = self.inner.state.write().await;
            if let Some(conv) = state.conversation_mut(conversation) {
                conv.status = status;
            }
        }
        self.emit(SyncEvent::ConversationsUpdated);
        Ok(())
    }

    pub async fn report_counterpart(&self, reason: &str) -> Result<(), SyncError> {
        let conversation = self
            .inner
            .state
            .read()
            .await
            .active
            .ok_or(SyncError::NoActiveConversation)?;
        self.inner
            .store
            .report_user(conversation, self.inner.viewer, reason)
            .await?;
        Ok(())
    }

    /// Delete a conversation remotely, then remove it from the list and
    /// clear the active view in one state transition — no intermediate
    /// render can show messages for a conversation that is gone.
    pub async fn delete_conversation(&self, conversation: ConversationId) -> Result<(), SyncError> {
        self.inner.store.delete_conversation(conversation).await?;

        let was_active = {
            let mut state = self.inner.state.write().await;
            state.conversations.retain(|c| c.id != conversation);
            let was_active = state.active == Some(conversation);
            if was_active {
                state.active = None;
                state.messages.clear();
                state.loading_messages = false;
            }
            was_active
        };

        if was_active {
            self.bump_epoch();
            self.stop_listener().await;
        }
        self.emit(SyncEvent::ConversationsUpdated);
        Ok(())
    }

    // -- Background poll --

    /// Start the reconciliation poll. One loop per synchronizer.
    pub async fn start(&self) {
        let mut slot = self.inner.poll.lock().await;
        if slot.is_some() {
            return;
        }
        let this = self.clone();
        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.inner.config.poll_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                this.poll_once().await;
            }
        }));
        info!(viewer = %self.inner.viewer, "reconciliation poll started");
    }

    /// Stop the poll and the push listener. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.inner.poll.lock().await.take() {
            handle.abort();
        }
        self.stop_listener().await;
    }

    /// One poll cycle. Failures are contained — a failing cycle logs and
    /// leaves the next one to retry.
    async fn poll_once(&self) {
        let viewer = self.inner.viewer;

        let fetched_list = match self.inner.store.list_conversations(viewer).await {
            Ok(list) => Some(list),
            Err(e) => {
                warn!("conversation poll failed: {e}");
                None
            }
        };

        let epoch = self.current_epoch();
        let active = self.inner.state.read().await.active;

        let fetched_messages = match active {
            Some(conversation) => {
                match self.inner.store.fetch_messages(conversation, viewer).await {
                    Ok(messages) => Some((conversation, messages)),
                    Err(e) => {
                        warn!(%conversation, "message poll failed: {e}");
                        None
                    }
                }
            }
            None => None,
        };

        if !self.is_current(epoch) {
            // The active conversation changed mid-cycle; drop the results.
            return;
        }

        let mut convs_changed = false;
        let mut messages_changed = None;
        let mut emptied = false;
        let mut push_receipts_for = None;
        {
            let mut state = self.inner.state.write().await;

            if let Some(list) = fetched_list {
                let (merged, changed) =
                    reconcile::merge_conversations(&state.conversations, list);
                state.conversations = merged;
                convs_changed = changed;

                if state.conversations.is_empty() && state.active.is_some() {
                    state.active = None;
                    state.messages.clear();
                    state.loading_messages = false;
                    emptied = true;
                    convs_changed = true;
                }
            }

            if let Some((conversation, fetched)) = fetched_messages {
                if state.active == Some(conversation) {
                    let (merged, mut changed) =
                        reconcile::merge_messages(&state.messages, fetched);
                    state.messages = merged;

                    // Counterpart messages that arrived while the viewer
                    // is looking at this conversation count as loaded:
                    // mark them read now, push receipts after the lock.
                    let now = Utc::now();
                    let mut fresh = false;
                    for m in state.messages.iter_mut() {
                        if m.sender_id != viewer && m.read_at.is_none() {
                            m.read_at = Some(now);
                            fresh = true;
                        }
                    }
                    if fresh {
                        push_receipts_for = Some(conversation);
                        changed = true;
                    }
                    if changed {
                        messages_changed = Some(conversation);
                    }
                }
            }

            // The open conversation never shows unread state, whatever a
            // (possibly stale) row said.
            if let Some(active) = state.active {
                if let Some(conv) = state.conversation_mut(active) {
                    if conv.unread_count != 0 {
                        conv.unread_count = 0;
                        convs_changed = true;
                    }
                    if let Some(last) = conv.last_message.as_mut() {
                        if last.sender_id != viewer && !last.read {
                            last.read = true;
                            convs_changed = true;
                        }
                    }
                }
            }
        }

        if emptied {
            self.bump_epoch();
            self.stop_listener().await;
        }
        if let Some(conversation) = push_receipts_for {
            self.push_read_receipts(conversation).await;
        }
        if convs_changed {
            self.emit(SyncEvent::ConversationsUpdated);
        }
        if let Some(conversation) = messages_changed {
            self.emit(SyncEvent::MessagesUpdated {
                conversation_id: conversation,
            });
        }
    }

    // -- Push listener --

    /// (Re)establish the single push listener for the active
    /// conversation. The previous listener is aborted first, so there is
    /// never more than one.
    async fn restart_listener(&self, conversation: ConversationId, epoch: u64) {
        let mut slot = self.inner.listener.lock().await;
        if let Some(previous) = slot.take() {
            previous.abort();
        }

        let this = self.clone();
        let mut events = self.inner.store.events();
        *slot = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if !this.is_current(epoch) {
                            break;
                        }
                        if event.conversation_id() != conversation {
                            continue;
                        }
                        this.apply_event(conversation, event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("push listener lagged by {n} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    async fn stop_listener(&self) {
        if let Some(handle) = self.inner.listener.lock().await.take() {
            handle.abort();
        }
    }

    async fn apply_event(&self, conversation: ConversationId, event: StoreEvent) {
        match event {
            StoreEvent::MessageUpdated { message } => {
                let (messages_changed, convs_changed) = {
                    let mut state = self.inner.state.write().await;
                    let mut messages_changed = false;
                    if let Some(local) =
                        state.messages.iter_mut().find(|m| m.id == message.id)
                    {
                        let (merged, changed) = reconcile::merge_message(local, &message);
                        if changed {
                            *local = merged;
                            messages_changed = true;
                        }
                    }

                    // A read receipt on our own last message flips the
                    // list preview without waiting for the next poll.
                    let mut convs_changed = false;
                    if message.sender_id == self.inner.viewer && message.read_at.is_some() {
                        if let Some(conv) = state.conversation_mut(conversation) {
                            if let Some(last) = conv.last_message.as_mut() {
                                if last.sender_id == self.inner.viewer
                                    && last.sent_at == message.created_at
                                    && !last.read
                                {
                                    last.read = true;
                                    convs_changed = true;
                                }
                            }
                        }
                    }
                    (messages_changed, convs_changed)
                };

                if messages_changed {
                    self.emit(SyncEvent::MessagesUpdated {
                        conversation_id: conversation,
                    });
                }
                if convs_changed {
                    self.emit(SyncEvent::ConversationsUpdated);
                }
            }

            StoreEvent::MessageCreated { message } => {
                let appended = {
                    let mut state = self.inner.state.write().await;
                    if state.active != Some(conversation)
                        || state.messages.iter().any(|m| m.id == message.id)
                    {
                        false
                    } else {
                        if let Some(conv) = state.conversation_mut(conversation) {
                            conv.last_message = Some(LastMessage {
                                content: message.content.clone(),
                                sent_at: message.created_at,
                                sender_id: message.sender_id,
                                read: false,
                            });
                        }
                        state.messages.push(message.clone());
                        resort(&mut state.conversations);
                        true
                    }
                };

                if appended {
                    debug!(%conversation, "live message appended");
                    self.emit(SyncEvent::MessagesUpdated {
                        conversation_id: conversation,
                    });
                    self.emit(SyncEvent::ConversationsUpdated);
                }
            }

            StoreEvent::ConversationUpdated {
                conversation_id,
                status,
            } => {
                let changed = {
                    let mut state = self.inner.state.write().await;
                    match state.conversation_mut(conversation_id) {
                        Some(conv) if conv.status != status => {
                            conv.status = status;
                            true
                        }
                        _ => false,
                    }
                };
                if changed {
                    self.emit(SyncEvent::ConversationsUpdated);
                }
            }

            // Typing is the presence tracker's concern.
            StoreEvent::TypingChanged { .. } => {}
        }
    }

    // -- Internals --

    /// RPC batch path first, row fallback second; a double failure keeps
    /// the optimistic local state and moves on — read-marking is never
    /// allowed to block the view.
    async fn push_read_receipts(&self, conversation: ConversationId) {
        match self
            .inner
            .store
            .mark_conversation_read(conversation, self.inner.viewer)
            .await
        {
            Ok(updated) => debug!(%conversation, updated, "read receipts pushed"),
            Err(rpc_err) => {
                warn!(%conversation, "read rpc failed, trying row path: {rpc_err}");
                if let Err(row_err) = self
                    .inner
                    .store
                    .mark_messages_read(conversation, self.inner.viewer)
                    .await
                {
                    warn!(
                        %conversation,
                        "both read paths failed, keeping optimistic state: {row_err}"
                    );
                }
            }
        }
    }

    async fn refetch_messages(&self, conversation: ConversationId, epoch: u64) {
        match self
            .inner
            .store
            .fetch_messages(conversation, self.inner.viewer)
            .await
        {
            Ok(fetched) => {
                if !self.is_current(epoch) {
                    return;
                }
                let changed = {
                    let mut state = self.inner.state.write().await;
                    if state.active != Some(conversation) {
                        return;
                    }
                    let (merged, changed) = reconcile::merge_messages(&state.messages, fetched);
                    if changed {
                        state.messages = merged;
                    }
                    changed
                };
                if changed {
                    self.emit(SyncEvent::MessagesUpdated {
                        conversation_id: conversation,
                    });
                }
            }
            Err(e) => debug!(%conversation, "background refetch failed: {e}"),
        }
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.inner.events_tx.send(event);
    }

    fn current_epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    fn bump_epoch(&self) -> u64 {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.current_epoch() == epoch
    }
}

/// Newest activity first, matching the store's list order.
fn resort(conversations: &mut [Conversation]) {
    conversations.sort_by_key(|c| {
        Reverse(c.last_message.as_ref().map_or(c.created_at, |m| m.sent_at))
    });
}
