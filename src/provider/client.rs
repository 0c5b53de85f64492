//! Provider clients.
//!
//! [`Client`] covers the full request surface asynchronously.
//! [`BlockingClient`] streams chat completions on the calling thread.

use super::api_provider::{Provider, ProviderConfig};
use super::error::Error;
use super::http::{BlockingHttpClient, HttpClient};
use super::stream::{EventIter, EventStream, StreamSummary};
use super::types::{
    AnthropicMessage, ChatCompletion, ChatCompletionResponse, ChatRequest, CompletionResponse,
    GenerationResponse, Message, ModelList, Role, TextCompletionRequest,
};
use serde::Serialize;
use std::io::Write;

/// Anthropic rejects requests without `max_tokens`.
const ANTHROPIC_DEFAULT_MAX_TOKENS: u32 = 1024;

/// Async client for one provider.
#[derive(Debug, Clone)]
pub struct Client {
    http: HttpClient,
    config: ProviderConfig,
}

impl Client {
    pub fn new(config: ProviderConfig) -> Self {
        let http = HttpClient::new(config.base_url.clone(), config.auth.clone())
            .with_extra_headers(config.extra_headers.clone());
        Self { http, config }
    }

    /// Create client from provider, reading the API key from the environment.
    pub fn from_provider(provider: Provider) -> Result<Self, Error> {
        Ok(Self::new(ProviderConfig::from_env(provider)?))
    }

    pub fn provider(&self) -> Provider {
        self.config.provider
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Legacy text completion (`/completions`).
    pub async fn text_completion(
        &self,
        request: &TextCompletionRequest,
    ) -> Result<CompletionResponse, Error> {
        let path = self.config.endpoints.completion.ok_or(Error::Unsupported {
            provider: self.provider().name(),
            operation: "text completion",
        })?;

        tracing::debug!(provider = %self.provider().id(), model = %request.model, "Text completion request");
        self.http.post_json(path, request).await
    }

    /// Non-streaming chat completion.
    pub async fn chat_completion(&self, request: &ChatRequest) -> Result<ChatCompletion, Error> {
        let path = self.config.endpoints.chat_completion;
        tracing::debug!(
            provider = %self.provider().id(),
            model = %request.model,
            messages = request.messages.len(),
            "Chat completion request"
        );

        if self.provider() == Provider::Anthropic {
            let body = AnthropicRequest::from_chat(request);
            let message: AnthropicMessage = self.http.post_json(path, &body).await?;
            Ok(ChatCompletion::Anthropic(message))
        } else {
            let response: ChatCompletionResponse = self.http.post_json(path, request).await?;
            Ok(ChatCompletion::OpenAI(response))
        }
    }

    /// Stream a chat completion as decoded SSE events.
    ///
    /// The request is sent with `stream: true` regardless of its own setting.
    /// Dropping the returned stream closes the connection.
    pub async fn chat_completion_stream(&self, request: &ChatRequest) -> Result<EventStream, Error> {
        let path = streaming_path(&self.config)?;
        let request = request.streaming();
        tracing::debug!(
            provider = %self.provider().id(),
            model = %request.model,
            messages = request.messages.len(),
            "Chat completion stream request"
        );

        self.http.post_stream(path, &request).await
    }

    /// Stats for a finished generation (OpenRouter).
    pub async fn generation(&self, id: &str) -> Result<GenerationResponse, Error> {
        let path = self.config.endpoints.generation.ok_or(Error::Unsupported {
            provider: self.provider().name(),
            operation: "generation lookup",
        })?;
        self.http.get_json(path, &[("id", id)]).await
    }

    /// List available models, decoded by provider.
    pub async fn models(&self) -> Result<ModelList, Error> {
        let path = self.config.endpoints.models;
        Ok(match self.provider() {
            Provider::Anthropic => ModelList::Anthropic(self.http.get_json(path, &[]).await?),
            Provider::OpenRouter => ModelList::OpenRouter(self.http.get_json(path, &[]).await?),
            Provider::OpenAI | Provider::Local => {
                ModelList::OpenAI(self.http.get_json(path, &[]).await?)
            }
        })
    }
}

/// Blocking client for streaming chat completions.
#[derive(Debug)]
pub struct BlockingClient {
    http: BlockingHttpClient,
    config: ProviderConfig,
}

impl BlockingClient {
    pub fn new(config: ProviderConfig) -> Result<Self, Error> {
        let http = BlockingHttpClient::new(config.base_url.clone(), config.auth.clone())?
            .with_extra_headers(config.extra_headers.clone());
        Ok(Self { http, config })
    }

    pub fn provider(&self) -> Provider {
        self.config.provider
    }

    /// Stream a chat completion, blocking on each chunk.
    pub fn chat_completion_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<EventIter<reqwest::blocking::Response>, Error> {
        let path = streaming_path(&self.config)?;
        let request = request.streaming();
        tracing::debug!(
            provider = %self.provider().id(),
            model = %request.model,
            "Blocking chat completion stream request"
        );

        self.http.post_stream(path, &request)
    }

    /// Stream a chat completion straight to `out`, flushing every delta.
    pub fn print_chat_stream<W: Write>(
        &self,
        request: &ChatRequest,
        out: &mut W,
    ) -> Result<StreamSummary, Error> {
        self.chat_completion_stream(request)?.print_deltas(out)
    }
}

/// Chat endpoint for streaming. Anthropic streams typed `event:` frames whose
/// text lives outside `choices[0].delta.content`, so it is not offered here.
fn streaming_path(config: &ProviderConfig) -> Result<&'static str, Error> {
    if config.provider == Provider::Anthropic {
        return Err(Error::Unsupported {
            provider: config.provider.name(),
            operation: "chat completion streaming",
        });
    }
    Ok(config.endpoints.chat_completion)
}

/// Anthropic Messages API body: system prompt is a top-level field.
#[derive(Debug, Serialize, PartialEq)]
struct AnthropicRequest<'a> {
    model: &'a str,
    messages: Vec<&'a Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(rename = "stop_sequences", skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
}

impl<'a> AnthropicRequest<'a> {
    fn from_chat(request: &'a ChatRequest) -> Self {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        Self {
            model: &request.model,
            messages: request
                .messages
                .iter()
                .filter(|m| m.role != Role::System)
                .collect(),
            system: (!system.is_empty()).then(|| system.join("\n")),
            max_tokens: request
                .params
                .max_tokens
                .unwrap_or(ANTHROPIC_DEFAULT_MAX_TOKENS),
            temperature: request.params.temperature,
            top_p: request.params.top_p,
            top_k: request.params.top_k,
            stop: request.params.stop.as_deref(),
        }
    }
}
