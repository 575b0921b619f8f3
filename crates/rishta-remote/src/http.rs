//! `reqwest`-backed [`RemoteStore`] speaking the hosted service's REST
//! surface, with a long-poll pump feeding the push-event channel.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use rishta_types::api::{
    MarkReadResponse, PresenceUpdateRequest, ReportRequest, SendMessageRequest,
    StatusUpdateRequest, TypingRequest,
};
use rishta_types::events::EventBatch;
use rishta_types::models::{Conversation, ConversationId, ConversationStatus, Message, UserId};
use rishta_types::presence::{PresenceSnapshot, PresenceState};
use rishta_types::StoreEvent;

use crate::config::RemoteConfig;
use crate::error::RemoteError;
use crate::store::RemoteStore;

/// Seconds the server holds an empty long-poll open before returning.
const LONG_POLL_WAIT: u64 = 25;

/// Backoff between pump retries after a transport failure.
const PUMP_BACKOFF: Duration = Duration::from_secs(5);

pub struct HttpStore {
    client: Client,
    base_url: String,
    events_tx: broadcast::Sender<StoreEvent>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl HttpStore {
    /// Build the client and start the event pump. The pump long-polls
    /// `/events` and re-broadcasts every received event; it retries with
    /// backoff on failure and runs until [`close`] or drop.
    ///
    /// [`close`]: HttpStore::close
    pub fn connect(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(token) = &config.token {
            let value = reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| RemoteError::Config("auth token is not a valid header".to_string()))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()?;

        let (events_tx, _) = broadcast::channel(1024);
        let store = Self {
            client: client.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            events_tx: events_tx.clone(),
            pump: Mutex::new(None),
        };

        let pump = tokio::spawn(run_pump(client, store.base_url.clone(), events_tx));
        *store.pump.lock().expect("pump handle lock poisoned") = Some(pump);
        Ok(store)
    }

    /// Stop the event pump. Safe to call more than once.
    pub fn close(&self) {
        if let Some(pump) = self.pump.lock().expect("pump handle lock poisoned").take() {
            pump.abort();
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for HttpStore {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_pump(client: Client, base_url: String, events_tx: broadcast::Sender<StoreEvent>) {
    let mut cursor: u64 = 0;
    loop {
        let url = format!("{}/events?cursor={}&wait={}", base_url, cursor, LONG_POLL_WAIT);
        let result = async {
            let resp = client
                .get(&url)
                .timeout(Duration::from_secs(LONG_POLL_WAIT + 10))
                .send()
                .await?;
            let batch: EventBatch = check(resp).await?.json().await?;
            Ok::<_, RemoteError>(batch)
        }
        .await;

        match result {
            Ok(batch) => {
                cursor = batch.cursor;
                debug!(count = batch.events.len(), cursor = batch.cursor, "event batch");
                for event in batch.events {
                    let _ = events_tx.send(event);
                }
            }
            Err(e) => {
                warn!("event pump failed, retrying: {e}");
                tokio::time::sleep(PUMP_BACKOFF).await;
            }
        }
    }
}

async fn check(resp: Response) -> Result<Response, RemoteError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let detail = resp.text().await.unwrap_or_default();
    if status == StatusCode::NOT_FOUND {
        return Err(RemoteError::NotFound("resource"));
    }
    Err(RemoteError::status(status.as_u16(), detail))
}

#[async_trait]
impl RemoteStore for HttpStore {
    async fn list_conversations(&self, viewer: UserId) -> Result<Vec<Conversation>, RemoteError> {
        let resp = self
            .client
            .get(self.url(&format!("/users/{viewer}/conversations")))
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn fetch_messages(
        &self,
        conversation: ConversationId,
        viewer: UserId,
    ) -> Result<Vec<Message>, RemoteError> {
        let resp = self
            .client
            .get(self.url(&format!(
                "/conversations/{conversation}/messages?viewer={viewer}"
            )))
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn insert_message(
        &self,
        conversation: ConversationId,
        _sender: UserId,
        content: &str,
    ) -> Result<Message, RemoteError> {
        let resp = self
            .client
            .post(self.url(&format!("/conversations/{conversation}/messages")))
            .json(&SendMessageRequest {
                content: content.to_string(),
            })
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn mark_conversation_read(
        &self,
        conversation: ConversationId,
        reader: UserId,
    ) -> Result<u32, RemoteError> {
        let resp = self
            .client
            .post(self.url(&format!(
                "/conversations/{conversation}/read?reader={reader}"
            )))
            .send()
            .await?;
        let body: MarkReadResponse = check(resp).await?.json().await?;
        Ok(body.updated)
    }

    async fn mark_messages_read(
        &self,
        conversation: ConversationId,
        reader: UserId,
    ) -> Result<(), RemoteError> {
        let resp = self
            .client
            .post(self.url(&format!(
                "/conversations/{conversation}/messages/read?reader={reader}"
            )))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn set_conversation_status(
        &self,
        conversation: ConversationId,
        status: ConversationStatus,
    ) -> Result<(), RemoteError> {
        let resp = self
            .client
            .patch(self.url(&format!("/conversations/{conversation}")))
            .json(&StatusUpdateRequest { status })
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn delete_conversation(&self, conversation: ConversationId) -> Result<(), RemoteError> {
        let resp = self
            .client
            .delete(self.url(&format!("/conversations/{conversation}")))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn report_user(
        &self,
        conversation: ConversationId,
        reporter: UserId,
        reason: &str,
    ) -> Result<(), RemoteError> {
        let resp = self
            .client
            .post(self.url(&format!("/conversations/{conversation}/report")))
            .json(&ReportRequest {
                reporter_id: reporter,
                reason: reason.to_string(),
            })
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn update_presence(
        &self,
        user: UserId,
        state: PresenceState,
    ) -> Result<(), RemoteError> {
        let resp = self
            .client
            .post(self.url(&format!("/users/{user}/presence")))
            .json(&PresenceUpdateRequest { state })
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn presence_snapshot(&self, user: UserId) -> Result<PresenceSnapshot, RemoteError> {
        let resp = self
            .client
            .get(self.url(&format!("/users/{user}/presence")))
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn set_typing(
        &self,
        conversation: ConversationId,
        user: UserId,
        typing: bool,
    ) -> Result<(), RemoteError> {
        let resp = self
            .client
            .post(self.url(&format!("/conversations/{conversation}/typing")))
            .json(&TypingRequest {
                user_id: user,
                typing,
            })
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<StoreEvent> {
        self.events_tx.subscribe()
    }
}
