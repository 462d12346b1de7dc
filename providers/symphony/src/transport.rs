use std::fs;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use metrics::{counter, histogram};
use reqwest::{Client, Identity, Method, StatusCode};
use rsa::RsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Credential;
use crate::error::{SymphonyError, SymphonyResult};

/// Request headers, by name. Values are never logged.
pub type Headers = Vec<(&'static str, String)>;

/// Executes one HTTP exchange with the platform.
///
/// Implementations classify every non-2xx status and every network failure as
/// [`SymphonyError::Transport`] and perform no retries or caching. `Ok(None)`
/// means the platform answered 2xx without a body (for example 204 on an idle
/// datafeed).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(
        &self,
        method: Method,
        host: &str,
        path: &str,
        headers: Headers,
        body: Option<Value>,
    ) -> SymphonyResult<Option<Value>>;
}

pub type SharedTransport = Arc<dyn Transport>;

/// Builds the absolute URL for `path` on `host`. Hosts are bare names and
/// reached over HTTPS unless they already carry a scheme.
pub fn endpoint_url(host: &str, path: &str) -> String {
    let base = if host.contains("://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("https://{}", host.trim_end_matches('/'))
    };
    format!("{base}{path}")
}

/// Metric label for a request path: the numeric and opaque segments are
/// collapsed so per-stream and per-datafeed calls share a series.
fn endpoint_label(path: &str) -> String {
    let path = path.split('?').next().unwrap_or(path);
    path.split('/')
        .map(|segment| {
            let opaque = segment.len() > 20 || segment.chars().all(|c| c.is_ascii_digit());
            if opaque && !segment.is_empty() { ":id" } else { segment }
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a client that presents `credential` on every connection.
    pub fn from_credential(credential: &Credential) -> SymphonyResult<Self> {
        let identity = load_identity(credential)?;
        let client = Client::builder()
            .identity(identity)
            .build()
            .map_err(|err| SymphonyError::config(format!("unable to build http client: {err}")))?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn request(
        &self,
        method: Method,
        host: &str,
        path: &str,
        headers: Headers,
        body: Option<Value>,
    ) -> SymphonyResult<Option<Value>> {
        let url = endpoint_url(host, path);
        let endpoint = endpoint_label(path);
        debug!(%method, %url, "sending symphony request");

        let mut request = self.client.request(method, &url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(body) = body.as_ref() {
            request = request.json(body);
        }

        let started = Instant::now();
        let response = request.send().await.map_err(|err| {
            counter!(
                "symphony_errors_total",
                "kind" => "transport",
                "endpoint" => endpoint.clone()
            )
            .increment(1);
            warn!(%url, error = %err, "symphony request failed");
            SymphonyError::Transport {
                url: url.clone(),
                status: err.status(),
                body: String::new(),
                source: Some(err),
            }
        })?;

        let status = response.status();
        histogram!(
            "symphony_http_roundtrip_seconds",
            "endpoint" => endpoint.clone(),
            "status" => status.as_str().to_string()
        )
        .record(started.elapsed().as_secs_f64());

        let bytes = response.bytes().await.map_err(|err| SymphonyError::Transport {
            url: url.clone(),
            status: Some(status),
            body: String::new(),
            source: Some(err),
        })?;

        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes).into_owned();
            counter!(
                "symphony_errors_total",
                "kind" => "remote",
                "endpoint" => endpoint,
                "status" => status.as_str().to_string()
            )
            .increment(1);
            warn!(%url, status = status.as_u16(), %body, "symphony returned error response");
            return Err(SymphonyError::Transport {
                url,
                status: Some(status),
                body,
                source: None,
            });
        }

        debug!(%url, status = status.as_u16(), bytes = bytes.len(), "received symphony response");
        if status == StatusCode::NO_CONTENT || bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| SymphonyError::Decode { url, source })
    }
}

/// Reads the PEM certificate and private key into a TLS client identity. An
/// encrypted PKCS#8 key is unlocked with the passphrase first.
fn load_identity(credential: &Credential) -> SymphonyResult<Identity> {
    let cert = fs::read_to_string(&credential.public_key).map_err(|err| {
        SymphonyError::config(format!(
            "unable to read client certificate {}: {err}",
            credential.public_key.display()
        ))
    })?;
    let key = fs::read_to_string(&credential.private_key).map_err(|err| {
        SymphonyError::config(format!(
            "unable to read private key {}: {err}",
            credential.private_key.display()
        ))
    })?;

    let key = if key.contains("BEGIN ENCRYPTED PRIVATE KEY") {
        let decrypted =
            RsaPrivateKey::from_pkcs8_encrypted_pem(&key, credential.passphrase.as_bytes())
                .map_err(|err| {
                    SymphonyError::config(format!(
                        "unable to decrypt private key {}: {err}",
                        credential.private_key.display()
                    ))
                })?;
        let pem = decrypted.to_pkcs8_pem(LineEnding::LF).map_err(|err| {
            SymphonyError::config(format!("unable to re-encode private key: {err}"))
        })?;
        pem.to_string()
    } else {
        key
    };

    let mut bundle = cert;
    if !bundle.ends_with('\n') {
        bundle.push('\n');
    }
    bundle.push_str(&key);
    Identity::from_pem(bundle.as_bytes()).map_err(|err| {
        SymphonyError::config(format!("unable to load client certificate/key: {err}"))
    })
}
