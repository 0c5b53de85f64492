//! Blocking HTTP client for streaming on the calling thread.
//!
//! Must not be created or dropped inside an async context; run it on a plain
//! thread or through `tokio::task::spawn_blocking`.

use super::client::{AuthConfig, CONNECT_TIMEOUT, build_headers};
use crate::provider::error::Error;
use crate::provider::stream::EventIter;
use reqwest::header::{ACCEPT, HeaderValue};
use serde::Serialize;

/// Blocking counterpart of [`HttpClient`](super::HttpClient), streaming only.
#[derive(Debug)]
pub struct BlockingHttpClient {
    client: reqwest::blocking::Client,
    base_url: String,
    auth: AuthConfig,
    extra_headers: Vec<(String, String)>,
}

impl BlockingHttpClient {
    pub fn new(base_url: impl Into<String>, auth: AuthConfig) -> Result<Self, Error> {
        // No overall timeout: a streamed completion can run for minutes.
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(None)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            auth,
            extra_headers: Vec::new(),
        })
    }

    #[must_use]
    pub fn with_extra_headers(mut self, extra: Vec<(String, String)>) -> Self {
        self.extra_headers = extra;
        self
    }

    /// POST a JSON body and return a blocking iterator over the SSE events.
    pub fn post_stream<T: Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<EventIter<reqwest::blocking::Response>, Error> {
        let url = format!("{}{path}", self.base_url.trim_end_matches('/'));
        let mut headers = build_headers(&self.auth, &self.extra_headers)?;
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        let response = self.client.post(&url).headers(headers).json(body).send()?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(Error::Api(format!("HTTP {status}: {text}")));
        }

        Ok(EventIter::new(response))
    }
}
