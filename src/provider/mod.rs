//! LLM provider access.
//!
//! Clients for OpenAI, Anthropic, OpenRouter and OpenAI-compatible local
//! servers, plus the incremental SSE decoding shared by streaming calls.
//!
//! # Example
//!
//! ```ignore
//! use llmio::provider::{ChatRequest, Client, Message, Provider};
//! use futures::StreamExt;
//!
//! let client = Client::from_provider(Provider::OpenRouter)?;
//! let request = ChatRequest::new("openai/gpt-4o-mini", vec![Message::user("Hi")]);
//! let mut stream = client.chat_completion_stream(&request).await?;
//! while let Some(event) = stream.next().await {
//!     print!("{}", event?.delta_text().unwrap_or_default());
//! }
//! ```

mod api_provider;
mod client;
mod error;
mod http;
mod stream;
mod types;

pub use api_provider::{Endpoints, Provider, ProviderConfig};
pub use client::{BlockingClient, Client};
pub use error::{Error, format_api_error};
pub use http::{AuthConfig, DATA_PREFIX, DONE_SENTINEL, SseDecoder, StreamEvent};
pub use stream::{CHUNK_SIZE, EventIter, EventStream, StreamEnd, StreamSummary};
pub use types::*;
