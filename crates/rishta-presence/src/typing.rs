//! Typing state: debounced self-typing broadcast and the per-conversation
//! watch on the counterpart's typing flag.

use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::warn;

use rishta_remote::RemoteStore;
use rishta_types::models::ConversationId;
use rishta_types::StoreEvent;

use crate::tracker::PresenceTracker;

/// An observed typing flag with no refresh within this window expires
/// locally, in case the counterpart's stop event was lost.
const OBSERVED_TYPING_TTL: Duration = Duration::from_secs(5);

impl PresenceTracker {
    /// Flag self as typing in `conversation`. Idempotent while already
    /// typing: no duplicate remote write, but every call re-arms the
    /// auto-stop timer to a fresh quiet period. One owned timer handle
    /// per conversation — re-arming aborts and replaces it, never
    /// accumulates.
    pub async fn start_typing(&self, conversation: ConversationId) {
        let mut timers = self.inner.typing.lock().await;

        match timers.remove(&conversation) {
            Some(previous) => previous.abort(),
            None => {
                if let Err(e) = self
                    .inner
                    .store
                    .set_typing(conversation, self.inner.self_id, true)
                    .await
                {
                    warn!(%conversation, "typing start failed: {e}");
                }
            }
        }

        let tracker = self.clone();
        let quiet = self.inner.config.typing_quiet_period;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            tracker.quiet_elapsed(conversation).await;
        });
        timers.insert(conversation, handle);
    }

    /// Clear the typing flag. No-op when not typing.
    pub async fn stop_typing(&self, conversation: ConversationId) {
        let Some(timer) = self.inner.typing.lock().await.remove(&conversation) else {
            return;
        };
        timer.abort();
        self.clear_remote_typing(conversation).await;
    }

    /// Auto-stop body running inside the timer task itself: drop the map
    /// entry without aborting (we are that task), then clear remotely.
    async fn quiet_elapsed(&self, conversation: ConversationId) {
        if self.inner.typing.lock().await.remove(&conversation).is_none() {
            // Re-armed or stopped concurrently; the newer owner wins.
            return;
        }
        self.clear_remote_typing(conversation).await;
    }

    /// Observe the counterpart's typing flag in `conversation`.
    ///
    /// Subscribes to the store's push events, keeps only typing changes
    /// for this conversation from the other user, and expires the flag
    /// after [`OBSERVED_TYPING_TTL`] without a refresh. At most one watch
    /// exists per tracker: watching a different conversation replaces the
    /// previous task.
    pub async fn watch_typing(&self, conversation: ConversationId) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);

        let mut slot = self.inner.watch.lock().await;
        if let Some((_, previous)) = slot.take() {
            previous.abort();
        }

        let mut events = self.inner.store.events();
        let self_id = self.inner.self_id;
        let handle = tokio::spawn(async move {
            loop {
                let observed_typing = *tx.borrow();
                let event = if observed_typing {
                    match tokio::time::timeout(OBSERVED_TYPING_TTL, events.recv()).await {
                        Ok(event) => event,
                        Err(_) => {
                            if tx.send(false).is_err() {
                                break;
                            }
                            continue;
                        }
                    }
                } else {
                    events.recv().await
                };

                match event {
                    Ok(StoreEvent::TypingChanged {
                        conversation_id,
                        user_id,
                        typing,
                    }) if conversation_id == conversation && user_id != self_id => {
                        if tx.send(typing).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("typing watch lagged by {n} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        *slot = Some((conversation, handle));

        rx
    }

    /// Tear down the active typing watch, if any.
    pub async fn unwatch_typing(&self) {
        if let Some((_, handle)) = self.inner.watch.lock().await.take() {
            handle.abort();
        }
    }
}
