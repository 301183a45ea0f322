use async_trait::async_trait;
use serde_json::Value;

use crjr_audit_core::source::{DataSource, QuerySpec, SourceKind};
use crjr_audit_core::types::Record;
use crjr_audit_core::SourceError;

use crate::config::HttpConfig;

/// Non-2xx bodies are cut to this many characters in error messages.
const ERROR_BODY_LIMIT: usize = 200;

/// Errors raised while building the client, before any request is made.
#[derive(Debug, thiserror::Error)]
pub enum HttpSetupError {
    #[error("invalid API base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Read-only [`DataSource`] over the monitoring HTTP API.
#[derive(Debug)]
pub struct HttpDataSource {
    client: reqwest::Client,
    base_url: String,
    timeout_secs: f64,
}

impl HttpDataSource {
    pub fn new(config: &HttpConfig) -> Result<Self, HttpSetupError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("crjr-audit/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Self::with_client(client, config)
    }

    /// Reuse an existing client. The client's own timeout applies.
    pub fn with_client(client: reqwest::Client, config: &HttpConfig) -> Result<Self, HttpSetupError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let parsed = reqwest::Url::parse(&base_url).map_err(|e| HttpSetupError::InvalidBaseUrl {
            url: config.base_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(HttpSetupError::InvalidBaseUrl {
                url: config.base_url.clone(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }
        Ok(Self {
            client,
            base_url,
            timeout_secs: config.timeout.as_secs_f64(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{endpoint}", self.base_url)
        } else {
            format!("{}/{endpoint}", self.base_url)
        }
    }

    fn transport_error(&self, url: &str, err: reqwest::Error) -> SourceError {
        if err.is_timeout() {
            SourceError::EndpointUnavailable(format!(
                "GET {url} timed out after {}s",
                self.timeout_secs
            ))
        } else if err.is_connect() || err.is_request() {
            SourceError::EndpointUnavailable(format!("GET {url} failed: {err}"))
        } else {
            SourceError::Response(format!("GET {url} failed: {err}"))
        }
    }
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= ERROR_BODY_LIMIT {
        return body.to_string();
    }
    let short: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    format!("{short}...")
}

#[async_trait]
impl DataSource for HttpDataSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Http
    }

    async fn fetch_scalar(&self, _query: &QuerySpec) -> Result<Value, SourceError> {
        Err(SourceError::Query(
            "HTTP source does not support relational queries".to_string(),
        ))
    }

    async fn fetch_rows(&self, _query: &QuerySpec) -> Result<Vec<Record>, SourceError> {
        Err(SourceError::Query(
            "HTTP source does not support relational queries".to_string(),
        ))
    }

    async fn fetch_json(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<Value, SourceError> {
        let url = self.url_for(endpoint);
        tracing::debug!(url = %url, ?params, "Requesting endpoint");

        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| self.transport_error(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Response(format!(
                "GET {url} returned {status}: {}",
                truncate(&body)
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(&url, e))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            SourceError::Response(format!("GET {url} returned malformed JSON: {e}"))
        })
    }
}
