//! Self-presence tracking: heartbeat, visibility, and counterpart
//! status lookups.
//!
//! The tracker is an explicit per-session context object: construct it
//! once, call [`PresenceTracker::start_tracking`], and call
//! [`PresenceTracker::stop_tracking`] from the host's shutdown path.
//! Every remote failure in here is logged and swallowed — presence is a
//! best-effort affordance, never a hard failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use rishta_remote::RemoteStore;
use rishta_types::models::{ConversationId, UserId};
use rishta_types::presence::{PresenceSnapshot, PresenceState};

/// Cadence for refreshing our own last-seen timestamp.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Cadence at which callers should re-fetch counterpart statuses.
/// There is no push channel for generic presence changes, only for
/// typing updates.
pub const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Quiet period after which an armed typing flag auto-clears.
pub const TYPING_QUIET_PERIOD: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct PresenceConfig {
    pub heartbeat_interval: Duration,
    pub typing_quiet_period: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: HEARTBEAT_INTERVAL,
            typing_quiet_period: TYPING_QUIET_PERIOD,
        }
    }
}

/// App visibility as reported by the host shell (window focus, tab
/// visibility, app foreground state).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

#[derive(Clone)]
pub struct PresenceTracker {
    pub(crate) inner: Arc<TrackerInner>,
}

pub(crate) struct TrackerInner {
    pub(crate) store: Arc<dyn RemoteStore>,
    pub(crate) self_id: UserId,
    pub(crate) config: PresenceConfig,
    started: AtomicBool,
    /// Current self state broadcast by the heartbeat (online or away).
    state: std::sync::Mutex<PresenceState>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    pub(crate) typing: Mutex<HashMap<ConversationId, JoinHandle<()>>>,
    pub(crate) watch: Mutex<Option<(ConversationId, JoinHandle<()>)>>,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn RemoteStore>, self_id: UserId) -> Self {
        Self::with_config(store, self_id, PresenceConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn RemoteStore>,
        self_id: UserId,
        config: PresenceConfig,
    ) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                store,
                self_id,
                config,
                started: AtomicBool::new(false),
                state: std::sync::Mutex::new(PresenceState::Offline),
                heartbeat: Mutex::new(None),
                typing: Mutex::new(HashMap::new()),
                watch: Mutex::new(None),
            }),
        }
    }

    pub fn self_id(&self) -> UserId {
        self.inner.self_id
    }

    /// Mark self online and start the heartbeat. Idempotent: a second
    /// call while tracking is a no-op, so concurrent mounts cannot end
    /// up with two heartbeats.
    pub async fn start_tracking(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }

        self.set_state(PresenceState::Online);
        self.touch(PresenceState::Online).await;

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(inner.config.heartbeat_interval);
            // First tick completes immediately; the initial touch already
            // happened above.
            interval.tick().await;
            loop {
                interval.tick().await;
                let state = *inner.state.lock().expect("presence state lock poisoned");
                if let Err(e) = inner.store.update_presence(inner.self_id, state).await {
                    warn!("heartbeat update failed: {e}");
                }
            }
        });
        *self.inner.heartbeat.lock().await = Some(handle);

        info!(user = %self.inner.self_id, "presence tracking started");
    }

    /// Cancel the heartbeat and every typing timer, and mark self
    /// offline. Safe to call when tracking never started. This is the
    /// process-exit surface: hosts call it from their shutdown path.
    pub async fn stop_tracking(&self) {
        if let Some(handle) = self.inner.heartbeat.lock().await.take() {
            handle.abort();
        }

        let timers: Vec<(ConversationId, JoinHandle<()>)> =
            self.inner.typing.lock().await.drain().collect();
        for (conversation, handle) in timers {
            handle.abort();
            self.clear_remote_typing(conversation).await;
        }

        if let Some((_, handle)) = self.inner.watch.lock().await.take() {
            handle.abort();
        }

        if self.inner.started.swap(false, Ordering::SeqCst) {
            self.set_state(PresenceState::Offline);
            self.touch(PresenceState::Offline).await;
            info!(user = %self.inner.self_id, "presence tracking stopped");
        }
    }

    /// Visibility change from the host: hidden marks self away, visible
    /// marks self online, both with an immediate last-seen refresh.
    pub async fn set_visibility(&self, visibility: Visibility) {
        let state = match visibility {
            Visibility::Hidden => PresenceState::Away,
            Visibility::Visible => PresenceState::Online,
        };
        self.set_state(state);
        self.touch(state).await;
    }

    /// Derived presence of one user, `None` when the fetch fails.
    /// Callers re-poll on [`STATUS_POLL_INTERVAL`].
    pub async fn status_of(&self, user: UserId) -> Option<PresenceSnapshot> {
        match self.inner.store.presence_snapshot(user).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(%user, "presence fetch failed: {e}");
                None
            }
        }
    }

    /// Batched lookup. One user's failure degrades that entry to `None`
    /// ("unknown") and never fails the batch.
    pub async fn statuses_of(
        &self,
        users: &[UserId],
    ) -> HashMap<UserId, Option<PresenceSnapshot>> {
        let fetches = users.iter().map(|&user| async move {
            (user, self.status_of(user).await)
        });
        join_all(fetches).await.into_iter().collect()
    }

    fn set_state(&self, state: PresenceState) {
        *self.inner.state.lock().expect("presence state lock poisoned") = state;
    }

    async fn touch(&self, state: PresenceState) {
        if let Err(e) = self.inner.store.update_presence(self.inner.self_id, state).await {
            warn!("presence update failed: {e}");
        }
    }

    pub(crate) async fn clear_remote_typing(&self, conversation: ConversationId) {
        if let Err(e) = self
            .inner
            .store
            .set_typing(conversation, self.inner.self_id, false)
            .await
        {
            warn!(%conversation, "typing clear failed: {e}");
        }
    }
}
