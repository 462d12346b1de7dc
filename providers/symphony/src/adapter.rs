use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, warn};

use crate::api::SymphonyClient;
use crate::codec;
use crate::config::SymphonyConfig;
use crate::directory::{DirectoryCache, DirectoryEntry, SharedUserRegistry, UserLookup};
use crate::error::SymphonyResult;
use crate::feed::{FeedClient, FeedEvents, FeedState};
use crate::telemetry;
use crate::types::{FORMAT_MESSAGEML, RawMessage};

/// Message handed to [`SymphonyAdapter::send`].
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    Text(String),
    /// Text plus the structured object payload rendered alongside it.
    Structured { text: String, data: Value },
}

impl From<&str> for Outbound {
    fn from(text: &str) -> Self {
        Outbound::Text(text.to_string())
    }
}

impl From<String> for Outbound {
    fn from(text: String) -> Self {
        Outbound::Text(text)
    }
}

/// Host-facing surface: inbound feed lifecycle plus outbound messaging and
/// directory lookups.
pub struct SymphonyAdapter {
    client: SymphonyClient,
    directory: Arc<DirectoryCache>,
    feed: FeedClient,
}

impl SymphonyAdapter {
    pub fn connect(config: &SymphonyConfig, registry: SharedUserRegistry) -> SymphonyResult<Self> {
        let client = SymphonyClient::connect(config)?;
        Ok(Self::with_client(config, client, registry))
    }

    pub fn with_client(
        config: &SymphonyConfig,
        client: SymphonyClient,
        registry: SharedUserRegistry,
    ) -> Self {
        let directory = Arc::new(DirectoryCache::new(
            client.clone(),
            registry,
            config.directory_ttl,
        ));
        let feed = FeedClient::new(client.clone(), Arc::clone(&directory), config.backoff);
        info!(
            reconnect_attempts = config.backoff.max_attempts,
            "symphony adapter initialised"
        );
        Self {
            client,
            directory,
            feed,
        }
    }

    /// Runs `hook` once if the feed gives up reconnecting.
    pub fn with_shutdown_hook(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.feed = self.feed.with_shutdown_hook(hook);
        self
    }

    pub fn client(&self) -> &SymphonyClient {
        &self.client
    }

    pub fn directory(&self) -> &DirectoryCache {
        &self.directory
    }

    pub fn feed_state(&self) -> FeedState {
        self.feed.state()
    }

    pub fn start(&self) -> SymphonyResult<FeedEvents> {
        self.feed.start()
    }

    pub fn close(&self) {
        self.feed.close();
    }

    /// Sends without waiting for the platform. Failures are logged; the
    /// returned handle can be awaited for the outcome.
    pub fn send(
        &self,
        stream_id: &str,
        message: impl Into<Outbound>,
    ) -> JoinHandle<SymphonyResult<RawMessage>> {
        let client = self.client.clone();
        let stream_id = stream_id.to_string();
        let message = message.into();
        let span = telemetry::span_for_send("message.send", &stream_id);
        tokio::spawn(
            async move {
                let result = deliver(&client, &stream_id, message).await;
                if let Err(err) = &result {
                    warn!(error = %err, "failed to send symphony message");
                }
                result
            }
            .instrument(span),
        )
    }

    /// Replies to `sender_email` in `stream_id`, prefixing an @-mention.
    pub fn reply(
        &self,
        stream_id: &str,
        sender_email: &str,
        text: &str,
    ) -> JoinHandle<SymphonyResult<RawMessage>> {
        debug!(stream_id, "sending symphony reply");
        self.send(stream_id, codec::mention_reply(sender_email, text))
    }

    pub async fn resolve_user_by_username(&self, username: &str) -> SymphonyResult<DirectoryEntry> {
        self.directory.resolve_by_username(username).await
    }

    pub async fn resolve_user_by_email(&self, email: &str) -> SymphonyResult<DirectoryEntry> {
        self.directory.resolve_by_email(email).await
    }

    pub async fn send_direct_message_to_username(
        &self,
        username: &str,
        message: impl Into<Outbound>,
    ) -> SymphonyResult<RawMessage> {
        debug!(username, "sending direct message");
        let user = self.resolve_user_by_username(username).await?;
        self.send_direct_message_to_user_id(user.id, message).await
    }

    pub async fn send_direct_message_to_email(
        &self,
        email: &str,
        message: impl Into<Outbound>,
    ) -> SymphonyResult<RawMessage> {
        debug!(email, "sending direct message");
        let user = self
            .directory
            .resolve(&UserLookup::by_email(email), None)
            .await?;
        self.send_direct_message_to_user_id(user.id, message).await
    }

    /// Opens (or reuses) the IM with `user_id` and sends into it.
    pub async fn send_direct_message_to_user_id(
        &self,
        user_id: u64,
        message: impl Into<Outbound>,
    ) -> SymphonyResult<RawMessage> {
        let im = self.client.create_im(user_id).await?;
        let span = telemetry::span_for_send("message.direct", &im.id);
        deliver(&self.client, &im.id, message.into())
            .instrument(span)
            .await
    }
}

async fn deliver(
    client: &SymphonyClient,
    stream_id: &str,
    message: Outbound,
) -> SymphonyResult<RawMessage> {
    match message {
        Outbound::Text(text) => {
            let body = codec::encode(&text);
            debug!(stream_id, "sending symphony message");
            client.send_message(stream_id, &body, FORMAT_MESSAGEML).await
        }
        Outbound::Structured { text, data } => {
            let body = codec::encode(&text);
            debug!(stream_id, "sending symphony message with structured objects");
            client
                .send_message_with_structured_objects(stream_id, &body, &data)
                .await
        }
    }
}
