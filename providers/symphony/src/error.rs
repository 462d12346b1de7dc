use reqwest::StatusCode;

/// Failures surfaced by the Symphony client stack.
///
/// Transport and the caches never swallow these; the feed client is the only
/// component that retries.
#[derive(Debug, thiserror::Error)]
pub enum SymphonyError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("unable to authenticate against {endpoint}")]
    Authentication {
        endpoint: String,
        #[source]
        source: Box<SymphonyError>,
    },
    #[error("received {} response from {url}: {body}", status_label(.status))]
    Transport {
        url: String,
        status: Option<StatusCode>,
        body: String,
        #[source]
        source: Option<reqwest::Error>,
    },
    #[error("unable to decode response from {url}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid request: {0}")]
    Validation(String),
}

impl SymphonyError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        SymphonyError::Configuration(message.into())
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        SymphonyError::Validation(message.into())
    }

    /// HTTP status of the failed call, if the platform answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            SymphonyError::Transport { status, .. } => *status,
            SymphonyError::Authentication { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SymphonyError::Configuration(_) => "configuration",
            SymphonyError::Authentication { .. } => "authentication",
            SymphonyError::Transport { status: None, .. } => "transport",
            SymphonyError::Transport { .. } => "remote",
            SymphonyError::Decode { .. } => "decode",
            SymphonyError::Validation(_) => "validation",
        }
    }
}

fn status_label(status: &Option<StatusCode>) -> String {
    status
        .map(|status| status.as_u16().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub type SymphonyResult<T> = Result<T, SymphonyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_reports_status_and_body() {
        let err = SymphonyError::Transport {
            url: "https://pod.example/agent/v4/datafeed/create".into(),
            status: Some(StatusCode::BAD_REQUEST),
            body: r#"{"code":400}"#.into(),
            source: None,
        };
        assert_eq!(
            err.to_string(),
            r#"received 400 response from https://pod.example/agent/v4/datafeed/create: {"code":400}"#
        );
        assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
        assert_eq!(err.kind(), "remote");
    }

    #[test]
    fn missing_status_is_reported_as_unknown() {
        let err = SymphonyError::Transport {
            url: "https://pod.example/pod/v1/sessioninfo".into(),
            status: None,
            body: String::new(),
            source: None,
        };
        assert!(err.to_string().starts_with("received unknown response"));
        assert_eq!(err.kind(), "transport");
    }

    #[test]
    fn authentication_error_exposes_upstream_status() {
        let err = SymphonyError::Authentication {
            endpoint: "https://auth.example/sessionauth/v1/authenticate".into(),
            source: Box::new(SymphonyError::Transport {
                url: "https://auth.example/sessionauth/v1/authenticate".into(),
                status: Some(StatusCode::UNAUTHORIZED),
                body: String::new(),
                source: None,
            }),
        };
        assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
        assert_eq!(err.kind(), "authentication");
    }
}
