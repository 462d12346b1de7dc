use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use crate::backoff::{BackoffSettings, DEFAULT_FAIL_CONNECT_AFTER};
use crate::error::{SymphonyError, SymphonyResult};

pub const ENV_HOST: &str = "SYMPHONY_HOST";
pub const ENV_PUBLIC_KEY: &str = "SYMPHONY_PUBLIC_KEY";
pub const ENV_PRIVATE_KEY: &str = "SYMPHONY_PRIVATE_KEY";
pub const ENV_PASSPHRASE: &str = "SYMPHONY_PASSPHRASE";
pub const ENV_KM_HOST: &str = "SYMPHONY_KM_HOST";
pub const ENV_SESSIONAUTH_HOST: &str = "SYMPHONY_SESSIONAUTH_HOST";
pub const ENV_AGENT_HOST: &str = "SYMPHONY_AGENT_HOST";
pub const ENV_FAIL_CONNECT_AFTER: &str = "SYMPHONY_FAIL_CONNECT_AFTER";

const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const DEFAULT_DIRECTORY_TTL: Duration = Duration::from_secs(60 * 60);

/// Client certificate material identifying the bot to the pod.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credential {
    pub public_key: PathBuf,
    pub private_key: PathBuf,
    pub passphrase: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SymphonyConfig {
    host: String,
    key_manager_host: String,
    session_auth_host: String,
    agent_host: String,
    credential: Credential,
    pub backoff: BackoffSettings,
    pub token_ttl: Duration,
    pub directory_ttl: Duration,
}

impl SymphonyConfig {
    pub fn new(host: impl Into<String>, credential: Credential) -> Self {
        let host = host.into();
        Self {
            key_manager_host: host.clone(),
            session_auth_host: host.clone(),
            agent_host: host.clone(),
            host,
            credential,
            backoff: BackoffSettings::default(),
            token_ttl: DEFAULT_TOKEN_TTL,
            directory_ttl: DEFAULT_DIRECTORY_TTL,
        }
    }

    /// Reads the `SYMPHONY_*` environment. The pod host and the certificate
    /// triple are mandatory; the remaining hosts default to the pod host.
    pub fn from_env() -> SymphonyResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> SymphonyResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| SymphonyError::config(format!("{key} undefined")))
        };
        let optional = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let host = required(ENV_HOST)?;
        let credential = Credential {
            public_key: PathBuf::from(required(ENV_PUBLIC_KEY)?),
            private_key: PathBuf::from(required(ENV_PRIVATE_KEY)?),
            passphrase: required(ENV_PASSPHRASE)?,
        };

        let mut config = Self::new(host, credential);
        if let Some(km) = optional(ENV_KM_HOST) {
            config = config.with_key_manager_host(km);
        }
        if let Some(session) = optional(ENV_SESSIONAUTH_HOST) {
            config = config.with_session_auth_host(session);
        }
        if let Some(agent) = optional(ENV_AGENT_HOST) {
            config = config.with_agent_host(agent);
        }

        let fail_connect_after = match optional(ENV_FAIL_CONNECT_AFTER) {
            Some(raw) => raw.trim().parse::<u32>().map_err(|err| {
                SymphonyError::config(format!("{ENV_FAIL_CONNECT_AFTER} invalid: {err}"))
            })?,
            None => DEFAULT_FAIL_CONNECT_AFTER,
        };
        config.backoff = config.backoff.with_max_attempts(fail_connect_after);
        Ok(config)
    }

    pub fn with_key_manager_host(mut self, host: impl Into<String>) -> Self {
        self.key_manager_host = host.into();
        self
    }

    pub fn with_session_auth_host(mut self, host: impl Into<String>) -> Self {
        self.session_auth_host = host.into();
        self
    }

    pub fn with_agent_host(mut self, host: impl Into<String>) -> Self {
        self.agent_host = host.into();
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffSettings) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub fn with_directory_ttl(mut self, ttl: Duration) -> Self {
        self.directory_ttl = ttl;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn key_manager_host(&self) -> &str {
        &self.key_manager_host
    }

    pub fn session_auth_host(&self) -> &str {
        &self.session_auth_host
    }

    pub fn agent_host(&self) -> &str {
        &self.agent_host
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub(crate) fn log_endpoints(&self) {
        info!(host = %self.host, "connecting to symphony pod");
        if self.key_manager_host != self.host {
            info!(key_manager_host = %self.key_manager_host, "using separate key manager");
        }
        if self.session_auth_host != self.host {
            info!(session_auth_host = %self.session_auth_host, "using separate session auth");
        }
        if self.agent_host != self.host {
            info!(agent_host = %self.agent_host, "using separate agent");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![
            (ENV_HOST, "foundation.symphony.com"),
            (ENV_PUBLIC_KEY, "./certs/publicKey.pem"),
            (ENV_PRIVATE_KEY, "./certs/privateKey.pem"),
            (ENV_PASSPHRASE, "changeit"),
        ]
    }

    #[test]
    fn secondary_hosts_default_to_pod_host() {
        let config = SymphonyConfig::from_lookup(env(&required())).expect("config");
        assert_eq!(config.host(), "foundation.symphony.com");
        assert_eq!(config.key_manager_host(), "foundation.symphony.com");
        assert_eq!(config.session_auth_host(), "foundation.symphony.com");
        assert_eq!(config.agent_host(), "foundation.symphony.com");
        assert_eq!(config.backoff.max_attempts, 23);
        assert_eq!(config.token_ttl, Duration::from_secs(604_800));
        assert_eq!(config.directory_ttl, Duration::from_secs(3_600));
        assert_eq!(config.credential().passphrase, "changeit");
    }

    #[test]
    fn separate_hosts_and_attempts_are_read() {
        let mut pairs = required();
        pairs.push((ENV_KM_HOST, "keymanager.example.com"));
        pairs.push((ENV_SESSIONAUTH_HOST, "session.example.com"));
        pairs.push((ENV_AGENT_HOST, "agent.example.com"));
        pairs.push((ENV_FAIL_CONNECT_AFTER, "5"));
        let config = SymphonyConfig::from_lookup(env(&pairs)).expect("config");
        assert_eq!(config.key_manager_host(), "keymanager.example.com");
        assert_eq!(config.session_auth_host(), "session.example.com");
        assert_eq!(config.agent_host(), "agent.example.com");
        assert_eq!(config.backoff.max_attempts, 5);
    }

    #[test]
    fn each_required_variable_is_enforced() {
        for missing in [ENV_HOST, ENV_PUBLIC_KEY, ENV_PRIVATE_KEY, ENV_PASSPHRASE] {
            let pairs: Vec<_> = required()
                .into_iter()
                .filter(|(key, _)| *key != missing)
                .collect();
            let err = SymphonyConfig::from_lookup(env(&pairs)).unwrap_err();
            assert!(
                matches!(&err, SymphonyError::Configuration(msg) if msg == &format!("{missing} undefined")),
                "unexpected error for {missing}: {err}"
            );
        }
    }

    #[test]
    fn invalid_attempt_count_is_rejected() {
        let mut pairs = required();
        pairs.push((ENV_FAIL_CONNECT_AFTER, "lots"));
        let err = SymphonyConfig::from_lookup(env(&pairs)).unwrap_err();
        assert!(matches!(err, SymphonyError::Configuration(_)));
    }
}
