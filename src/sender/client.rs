use crate::domain::Statement;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, ClientBuilder, StatusCode};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

pub const XAPI_VERSION: &str = "1.0.3";
const XAPI_VERSION_HEADER: HeaderName = HeaderName::from_static("x-experience-api-version");

#[derive(Error, Debug)]
pub enum DeliveryError {
    /// The connection was never established; nothing reached the LRS.
    #[error("Connection failed: {0}")]
    Connect(String),
    /// The request went out but no response arrived in time.
    #[error("Request timeout: {0}")]
    Timeout(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("{message}")]
    Remote {
        status: u16,
        reason: String,
        message: String,
    },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl DeliveryError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Remote { reason, .. } => reason,
            _ => "",
        }
    }

    fn from_reqwest(error: reqwest::Error) -> Self {
        let message = error_chain(&error);
        if error.is_builder() {
            Self::InvalidRequest(message)
        } else if error.is_connect() {
            Self::Connect(message)
        } else if error.is_timeout() {
            Self::Timeout(message)
        } else {
            Self::Transport(message)
        }
    }
}

fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    pub max_connections: usize,
    pub keep_alive_timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            max_connections: 10,
            keep_alive_timeout: Duration::from_secs(60),
            user_agent: format!("lrs-forwarder/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// One POST of a statement array to an LRS.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryRequest<'a> {
    pub endpoint: &'a str,
    pub key: &'a str,
    pub secret: &'a str,
    pub authorization: Option<&'a str>,
    pub timeout: Duration,
    pub statements: &'a [Statement],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LrsResponse {
    pub status: u16,
    pub reason: String,
    pub latency: Duration,
}

/// Thin HTTP client for the xAPI statements resource. Never retries.
#[derive(Debug, Clone)]
pub struct LrsClient {
    client: Client,
}

impl LrsClient {
    pub fn new(config: ClientConfig) -> Result<Self, DeliveryError> {
        let client = ClientBuilder::new()
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.max_connections)
            .pool_idle_timeout(config.keep_alive_timeout)
            .user_agent(&config.user_agent)
            .gzip(true)
            .build()
            .map_err(|e| {
                DeliveryError::InvalidRequest(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client })
    }

    /// POSTs the statements to `{endpoint}/statements`.
    ///
    /// Any non-2xx response comes back as [`DeliveryError::Remote`].
    pub async fn post_statements(
        &self,
        request: &DeliveryRequest<'_>,
    ) -> Result<LrsResponse, DeliveryError> {
        let url = statements_url(request.endpoint);
        let body = serde_json::to_vec(request.statements)?;
        let headers = build_headers(request.authorization)?;

        let mut builder = self
            .client
            .post(&url)
            .headers(headers)
            .timeout(request.timeout)
            .body(body);

        // An explicit Authorization header replaces basic auth entirely
        if request.authorization.is_none() {
            builder = builder.basic_auth(request.key, Some(request.secret));
        }

        let start = Instant::now();
        let response = builder.send().await.map_err(DeliveryError::from_reqwest)?;
        let latency = start.elapsed();

        let status = response.status();
        let reason = reason_phrase(&response);

        debug!(
            url = %url,
            count = request.statements.len(),
            status = status.as_u16(),
            latency_ms = latency.as_millis() as u64,
            "LRS responded"
        );

        if status.is_success() {
            Ok(LrsResponse {
                status: status.as_u16(),
                reason,
                latency,
            })
        } else {
            Err(DeliveryError::Remote {
                status: status.as_u16(),
                message: describe_failure(&url, status, &reason),
                reason,
            })
        }
    }
}

pub fn statements_url(endpoint: &str) -> String {
    format!("{endpoint}/statements")
}

pub fn build_headers(authorization: Option<&str>) -> Result<HeaderMap, DeliveryError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(XAPI_VERSION_HEADER, HeaderValue::from_static(XAPI_VERSION));

    if let Some(value) = authorization {
        let mut value = HeaderValue::from_str(value).map_err(|e| {
            DeliveryError::InvalidRequest(format!("Invalid authorization header: {e}"))
        })?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    Ok(headers)
}

/// The phrase from the status line, or the canonical one when the LRS sent
/// the standard text or none.
fn reason_phrase(response: &reqwest::Response) -> String {
    response
        .extensions()
        .get::<hyper::ext::ReasonPhrase>()
        .and_then(|phrase| std::str::from_utf8(phrase.as_bytes()).ok())
        .or_else(|| response.status().canonical_reason())
        .unwrap_or_default()
        .to_string()
}

fn describe_failure(url: &str, status: StatusCode, reason: &str) -> String {
    let class = if status.is_client_error() {
        "Client error"
    } else if status.is_server_error() {
        "Server error"
    } else {
        "Unsuccessful request"
    };
    format!(
        "{class}: `POST {url}` resulted in a `{} {reason}` response",
        status.as_u16()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_url_appends_resource() {
        assert_eq!(
            statements_url("https://lrs.example.com/xapi"),
            "https://lrs.example.com/xapi/statements"
        );
    }

    #[test]
    fn test_headers_carry_xapi_version() {
        let headers = build_headers(None).unwrap();
        assert_eq!(headers["x-experience-api-version"], "1.0.3");
        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert!(headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_authorization_override_is_sensitive() {
        let headers = build_headers(Some("Basic b3ZlcnJpZGU6dmFsdWU=")).unwrap();
        let value = &headers[AUTHORIZATION];
        assert_eq!(value, "Basic b3ZlcnJpZGU6dmFsdWU=");
        assert!(value.is_sensitive());
    }

    #[test]
    fn test_invalid_authorization_override_is_rejected() {
        let result = build_headers(Some("Basic line\nbreak"));
        assert!(matches!(result, Err(DeliveryError::InvalidRequest(_))));
    }

    #[test]
    fn test_failure_description_classes() {
        let url = "https://lrs.example.com/statements";
        assert_eq!(
            describe_failure(url, StatusCode::BAD_REQUEST, "Bad Request"),
            "Client error: `POST https://lrs.example.com/statements` resulted in a `400 Bad Request` response"
        );
        assert!(
            describe_failure(url, StatusCode::BAD_GATEWAY, "Bad Gateway").starts_with("Server error")
        );
        assert!(
            describe_failure(url, StatusCode::NOT_MODIFIED, "Not Modified")
                .starts_with("Unsuccessful request")
        );
    }

    #[test]
    fn test_remote_error_exposes_status_and_reason() {
        let error = DeliveryError::Remote {
            status: 503,
            reason: "Service Unavailable".to_string(),
            message: "Server error".to_string(),
        };
        assert_eq!(error.status(), Some(503));
        assert_eq!(error.reason(), "Service Unavailable");
        assert_eq!(error.to_string(), "Server error");
        assert_eq!(DeliveryError::Connect("refused".to_string()).status(), None);
    }
}
