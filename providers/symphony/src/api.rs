use std::sync::Arc;

use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::SymphonyConfig;
use crate::directory::UserQuery;
use crate::error::{SymphonyError, SymphonyResult};
use crate::tokens::{KEY_MANAGER_TOKEN_HEADER, SESSION_TOKEN_HEADER, TokenCache};
use crate::transport::{Headers, ReqwestTransport, SharedTransport, endpoint_url};
use crate::types::{
    CreateMessage, CreateStructuredMessage, DatafeedResponse, Echo, ImResponse, RawMessage,
    SessionInfo, SymphonyUser, V2_MESSAGE_TYPE,
};

/// Thin typed wrapper over the pod and agent REST endpoints.
///
/// Pod calls go to the pod host with the session token; agent calls go to the
/// agent host with both tokens.
#[derive(Clone)]
pub struct SymphonyClient {
    transport: SharedTransport,
    tokens: Arc<TokenCache>,
    host: String,
    agent_host: String,
}

impl SymphonyClient {
    /// Builds the mutually-authenticated client described by `config`. Fails
    /// immediately when the certificate or key cannot be loaded.
    pub fn connect(config: &SymphonyConfig) -> SymphonyResult<Self> {
        let transport: SharedTransport =
            Arc::new(ReqwestTransport::from_credential(config.credential())?);
        Ok(Self::with_transport(config, transport))
    }

    pub fn with_transport(config: &SymphonyConfig, transport: SharedTransport) -> Self {
        config.log_endpoints();
        let tokens = Arc::new(TokenCache::new(
            Arc::clone(&transport),
            config.session_auth_host(),
            config.key_manager_host(),
            config.token_ttl,
        ));
        Self {
            transport,
            tokens,
            host: config.host().to_string(),
            agent_host: config.agent_host().to_string(),
        }
    }

    pub fn tokens(&self) -> &TokenCache {
        &self.tokens
    }

    pub fn agent_host(&self) -> &str {
        &self.agent_host
    }

    /// Test endpoint returning its input.
    pub async fn echo(&self, message: &str) -> SymphonyResult<Echo> {
        let body = to_body(&Echo {
            message: message.to_string(),
        })?;
        self.agent(Method::POST, "/agent/v1/util/echo", Some(body))
            .await
    }

    /// Id of the calling user.
    pub async fn who_am_i(&self) -> SymphonyResult<SessionInfo> {
        self.pod(Method::GET, "/pod/v1/sessioninfo", None).await
    }

    /// Looks a user up locally by id, username or email address.
    pub async fn get_user(&self, query: &UserQuery) -> SymphonyResult<SymphonyUser> {
        let filter = match query {
            UserQuery::UserId(id) => format!("uid={id}"),
            UserQuery::Username(name) => format!("username={}", urlencoding::encode(name)),
            UserQuery::Email(email) => format!("email={}", urlencoding::encode(email)),
        };
        let path = format!("/pod/v2/user?{filter}&local=true");
        self.pod(Method::GET, &path, None).await
    }

    pub async fn send_message(
        &self,
        stream_id: &str,
        message: &str,
        format: &str,
    ) -> SymphonyResult<RawMessage> {
        let path = format!("/agent/v2/stream/{stream_id}/message/create");
        let body = to_body(&CreateMessage { message, format })?;
        self.agent(Method::POST, &path, Some(body)).await
    }

    /// Posts a message together with its structured object payload.
    pub async fn send_message_with_structured_objects(
        &self,
        stream_id: &str,
        message: &str,
        data: &Value,
    ) -> SymphonyResult<RawMessage> {
        let path = format!("/agent/v4/stream/{stream_id}/message/create");
        let body = to_body(&CreateStructuredMessage { message, data })?;
        self.agent(Method::POST, &path, Some(body)).await
    }

    pub async fn get_messages(&self, stream_id: &str) -> SymphonyResult<Vec<RawMessage>> {
        let path = format!("/agent/v2/stream/{stream_id}/message");
        Ok(self
            .agent_optional(Method::GET, &path, None)
            .await?
            .unwrap_or_default())
    }

    /// Creates a datafeed spanning every conversation the caller is part of.
    pub async fn create_datafeed(&self) -> SymphonyResult<DatafeedResponse> {
        self.agent(Method::POST, "/agent/v4/datafeed/create", None)
            .await
    }

    /// Reads pending chat messages; an idle feed answers 204 and yields
    /// nothing. Entries of any other `v2messageType` are dropped before
    /// decoding since their shapes differ from a chat message.
    pub async fn read_datafeed(&self, datafeed_id: &str) -> SymphonyResult<Vec<RawMessage>> {
        let path = format!("/agent/v4/datafeed/{datafeed_id}/read");
        let entries: Vec<Value> = self
            .agent_optional(Method::GET, &path, None)
            .await?
            .unwrap_or_default();
        entries
            .into_iter()
            .filter(|entry| {
                let message_type = entry.get("v2messageType").and_then(Value::as_str);
                if message_type != Some(V2_MESSAGE_TYPE) {
                    debug!(?message_type, "skipping non-chat datafeed entry");
                    return false;
                }
                true
            })
            .map(|entry| decode(&self.agent_host, &path, entry))
            .collect()
    }

    /// Creates, or returns the existing, IM between the caller and `user_id`.
    pub async fn create_im(&self, user_id: u64) -> SymphonyResult<ImResponse> {
        let body = to_body(&[user_id])?;
        self.pod(Method::POST, "/pod/v1/im/create", Some(body)).await
    }

    async fn pod<T>(&self, method: Method, path: &str, body: Option<Value>) -> SymphonyResult<T>
    where
        T: DeserializeOwned,
    {
        let session = self.tokens.session_token().await?;
        let headers: Headers = vec![(SESSION_TOKEN_HEADER, session.token)];
        let response = self
            .transport
            .request(method, &self.host, path, headers, body)
            .await?;
        decode_required(&self.host, path, response)
    }

    async fn agent<T>(&self, method: Method, path: &str, body: Option<Value>) -> SymphonyResult<T>
    where
        T: DeserializeOwned,
    {
        let response = self.agent_raw(method, path, body).await?;
        decode_required(&self.agent_host, path, response)
    }

    async fn agent_optional<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> SymphonyResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        match self.agent_raw(method, path, body).await? {
            Some(value) => decode(&self.agent_host, path, value).map(Some),
            None => Ok(None),
        }
    }

    async fn agent_raw(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> SymphonyResult<Option<Value>> {
        let (session, key_manager) = self.tokens.both().await?;
        let headers: Headers = vec![
            (SESSION_TOKEN_HEADER, session.token),
            (KEY_MANAGER_TOKEN_HEADER, key_manager.token),
        ];
        debug!(%method, path, "calling symphony agent");
        self.transport
            .request(method, &self.agent_host, path, headers, body)
            .await
    }
}

fn to_body<T: Serialize + ?Sized>(value: &T) -> SymphonyResult<Value> {
    serde_json::to_value(value)
        .map_err(|err| SymphonyError::validation(format!("unserializable request body: {err}")))
}

fn decode<T: DeserializeOwned>(host: &str, path: &str, value: Value) -> SymphonyResult<T> {
    serde_json::from_value(value).map_err(|source| SymphonyError::Decode {
        url: endpoint_url(host, path),
        source,
    })
}

fn decode_required<T: DeserializeOwned>(
    host: &str,
    path: &str,
    response: Option<Value>,
) -> SymphonyResult<T> {
    match response {
        Some(value) => decode(host, path, value),
        None => decode(host, path, Value::Null),
    }
}
