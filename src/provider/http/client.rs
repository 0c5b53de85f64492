//! HTTP client wrapper for LLM API requests.

use crate::provider::error::Error;
use crate::provider::stream::EventStream;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;

/// HTTP request timeout for non-streaming requests.
const TIMEOUT: Duration = Duration::from_secs(120);
/// Connection timeout.
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Authentication configuration.
#[derive(Clone)]
pub enum AuthConfig {
    /// Bearer token authentication (Authorization: Bearer {token}).
    Bearer(String),
    /// Custom header authentication (e.g., x-api-key: {key}).
    ApiKey { header: String, key: String },
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bearer(_) => f.debug_tuple("Bearer").field(&"[REDACTED]").finish(),
            Self::ApiKey { header, .. } => f
                .debug_struct("ApiKey")
                .field("header", header)
                .field("key", &"[REDACTED]")
                .finish(),
        }
    }
}

/// Build JSON request headers, authentication and any provider extras.
///
/// An empty bearer token sends no `Authorization` header (local servers).
pub(crate) fn build_headers(
    auth: &AuthConfig,
    extra: &[(String, String)],
) -> Result<HeaderMap, Error> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    match auth {
        AuthConfig::Bearer(token) if token.is_empty() => {}
        AuthConfig::Bearer(token) => {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| Error::Api("Bearer token contains invalid header characters".into()))?;
            headers.insert(AUTHORIZATION, value);
        }
        AuthConfig::ApiKey { header, key } => {
            let name = HeaderName::try_from(header.as_str())
                .map_err(|_| Error::Api("API key header name is invalid".into()))?;
            let value = HeaderValue::from_str(key)
                .map_err(|_| Error::Api("API key contains invalid header characters".into()))?;
            headers.insert(name, value);
        }
    }

    for (name, value) in extra {
        let name = HeaderName::try_from(name.as_str())
            .map_err(|_| Error::Api(format!("Invalid header name: {name}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| Error::Api(format!("Invalid value for header {name}")))?;
        headers.insert(name, value);
    }

    Ok(headers)
}

/// Turn a non-2xx status into an API error carrying the body.
pub(crate) fn check_status(status: StatusCode, body: &str) -> Result<(), Error> {
    if status.is_success() {
        Ok(())
    } else {
        Err(Error::Api(format!("HTTP {status}: {body}")))
    }
}

/// HTTP client for LLM API requests.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
    auth: AuthConfig,
    extra_headers: Vec<(String, String)>,
}

impl HttpClient {
    /// Create a new HTTP client.
    pub fn new(base_url: impl Into<String>, auth: AuthConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.into(),
            auth,
            extra_headers: Vec::new(),
        }
    }

    /// Send extra headers with every request (e.g. `anthropic-version`).
    #[must_use]
    pub fn with_extra_headers(mut self, extra: Vec<(String, String)>) -> Self {
        self.extra_headers = extra;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    /// Make a POST request with JSON body and deserialize the response.
    pub async fn post_json<T: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<R, Error> {
        let headers = build_headers(&self.auth, &self.extra_headers)?;

        let response = self
            .client
            .post(self.url(path))
            .headers(headers)
            .timeout(TIMEOUT)
            .json(body)
            .send()
            .await?;

        Self::read_json(response).await
    }

    /// Make a GET request with query parameters and deserialize the response.
    pub async fn get_json<R: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<R, Error> {
        let headers = build_headers(&self.auth, &self.extra_headers)?;

        let response = self
            .client
            .get(self.url(path))
            .headers(headers)
            .timeout(TIMEOUT)
            .query(query)
            .send()
            .await?;

        Self::read_json(response).await
    }

    /// Make a POST request for a streaming response.
    ///
    /// Automatically sets `Accept: text/event-stream`. No overall timeout is
    /// applied; the stream lives as long as the server keeps it open.
    pub async fn post_stream<T: Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<EventStream, Error> {
        let mut headers = build_headers(&self.auth, &self.extra_headers)?;
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        let response = self
            .client
            .post(self.url(path))
            .headers(headers)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("HTTP {status}: {text}")));
        }

        Ok(EventStream::new(response.bytes_stream()))
    }

    async fn read_json<R: DeserializeOwned>(response: reqwest::Response) -> Result<R, Error> {
        let status = response.status();
        let text = response.text().await?;
        check_status(status, &text)?;

        serde_json::from_str(&text)
            .map_err(|e| Error::Api(format!("Failed to parse response: {e}\nBody: {text}")))
    }
}
