//! Shared HTTP utilities for LLM providers.

mod blocking;
mod client;
mod sse;

pub use blocking::BlockingHttpClient;
pub use client::{AuthConfig, HttpClient};
pub use sse::{DATA_PREFIX, DONE_SENTINEL, SseDecoder, StreamEvent};
