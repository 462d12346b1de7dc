use std::time::Duration;

use reqwest::Method;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::cache::TtlCache;
use crate::error::{SymphonyError, SymphonyResult};
use crate::transport::{SharedTransport, endpoint_url};
use crate::types::AuthenticateResponse;

pub const SESSION_AUTH_PATH: &str = "/sessionauth/v1/authenticate";
pub const KEY_AUTH_PATH: &str = "/keyauth/v1/authenticate";

pub const SESSION_TOKEN_HEADER: &str = "sessionToken";
pub const KEY_MANAGER_TOKEN_HEADER: &str = "keyManagerToken";

/// Bearer credential issued by one of the authentication endpoints.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    pub name: String,
    pub token: String,
    pub acquired_at: OffsetDateTime,
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("name", &self.name)
            .field("token", &"<redacted>")
            .field("acquired_at", &self.acquired_at)
            .finish()
    }
}

/// Caches the session and key manager tokens, refreshing each once its TTL
/// has elapsed. Both accessors share one cache keyed by (host, path).
pub struct TokenCache {
    transport: SharedTransport,
    session_auth_host: String,
    key_manager_host: String,
    cache: TtlCache<(String, String), Token>,
}

impl TokenCache {
    pub fn new(
        transport: SharedTransport,
        session_auth_host: impl Into<String>,
        key_manager_host: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            transport,
            session_auth_host: session_auth_host.into(),
            key_manager_host: key_manager_host.into(),
            cache: TtlCache::new(ttl),
        }
    }

    pub async fn session_token(&self) -> SymphonyResult<Token> {
        self.authenticate(&self.session_auth_host, SESSION_AUTH_PATH)
            .await
    }

    pub async fn key_manager_token(&self) -> SymphonyResult<Token> {
        self.authenticate(&self.key_manager_host, KEY_AUTH_PATH)
            .await
    }

    /// Both tokens, as required by the agent API family.
    pub async fn both(&self) -> SymphonyResult<(Token, Token)> {
        tokio::try_join!(self.session_token(), self.key_manager_token())
    }

    async fn authenticate(&self, host: &str, path: &'static str) -> SymphonyResult<Token> {
        let key = (host.to_string(), path.to_string());
        self.cache
            .get_or_try_fetch(&key, || async {
                debug!(host, path, "requesting symphony token");
                let response = self
                    .transport
                    .request(Method::POST, host, path, Vec::new(), None)
                    .await
                    .map_err(|err| authentication_error(host, path, err))?;
                let body = response.ok_or_else(|| {
                    authentication_error(
                        host,
                        path,
                        SymphonyError::validation("empty authentication response"),
                    )
                })?;
                let parsed: AuthenticateResponse =
                    serde_json::from_value(body).map_err(|source| {
                        authentication_error(
                            host,
                            path,
                            SymphonyError::Decode {
                                url: endpoint_url(host, path),
                                source,
                            },
                        )
                    })?;
                info!(host, path, name = %parsed.name, "obtained symphony token");
                Ok(Token {
                    name: parsed.name,
                    token: parsed.token,
                    acquired_at: OffsetDateTime::now_utc(),
                })
            })
            .await
    }
}

fn authentication_error(host: &str, path: &str, source: SymphonyError) -> SymphonyError {
    SymphonyError::Authentication {
        endpoint: endpoint_url(host, path),
        source: Box::new(source),
    }
}
