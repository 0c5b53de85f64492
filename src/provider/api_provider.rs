//! API providers and their base configuration.
//!
//! Each provider has a fixed default base URL, auth scheme and endpoint set.
//! [`ProviderConfig`] carries those defaults and lets callers override them
//! per client instance.

use super::error::Error;
use super::http::AuthConfig;
use std::env;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Supported API providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    /// Direct OpenAI API
    OpenAI,
    /// Direct Anthropic API
    Anthropic,
    /// OpenRouter aggregator
    OpenRouter,
    /// Any OpenAI-compatible server at a user-supplied URL
    Local,
}

impl Provider {
    pub const ALL: &'static [Provider] = &[
        Provider::OpenAI,
        Provider::Anthropic,
        Provider::OpenRouter,
        Provider::Local,
    ];

    /// Lowercase ID for config storage and CLI flags.
    pub fn id(&self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Anthropic => "anthropic",
            Provider::OpenRouter => "openrouter",
            Provider::Local => "local",
        }
    }

    /// Parse provider from ID string.
    pub fn from_id(id: &str) -> Option<Self> {
        match id.to_lowercase().as_str() {
            "openai" => Some(Provider::OpenAI),
            "anthropic" => Some(Provider::Anthropic),
            "openrouter" => Some(Provider::OpenRouter),
            "local" => Some(Provider::Local),
            _ => None,
        }
    }

    /// Display name for the provider.
    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAI => "OpenAI",
            Provider::Anthropic => "Anthropic",
            Provider::OpenRouter => "OpenRouter",
            Provider::Local => "Local",
        }
    }

    /// Environment variable(s) holding the API key.
    pub fn env_vars(&self) -> &'static [&'static str] {
        match self {
            Provider::OpenAI => &["OPENAI_API_KEY"],
            Provider::Anthropic => &["ANTHROPIC_API_KEY"],
            Provider::OpenRouter => &["OPENROUTER_API_KEY"],
            Provider::Local => &["LOCAL_API_KEY"],
        }
    }

    /// Get the API key from the environment, if set.
    pub fn api_key(&self) -> Option<String> {
        self.env_vars()
            .iter()
            .find_map(|var| env::var(var).ok().filter(|key| !key.is_empty()))
    }

    /// Local servers usually run without auth.
    pub fn requires_api_key(&self) -> bool {
        *self != Provider::Local
    }

    /// Default base URL. `Local` has none and must be configured.
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAI => Some("https://api.openai.com/v1"),
            Provider::Anthropic => Some("https://api.anthropic.com/v1"),
            Provider::OpenRouter => Some("https://openrouter.ai/api/v1"),
            Provider::Local => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Endpoint paths relative to the base URL. `None` means unsupported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub completion: Option<&'static str>,
    pub chat_completion: &'static str,
    pub generation: Option<&'static str>,
    pub models: &'static str,
}

impl Endpoints {
    /// Paths shared by OpenAI-style APIs.
    fn openai_style() -> Self {
        Self {
            completion: Some("/completions"),
            chat_completion: "/chat/completions",
            generation: Some("/generations"),
            models: "/models",
        }
    }

    pub fn for_provider(provider: Provider) -> Self {
        match provider {
            Provider::Anthropic => Self {
                completion: None,
                chat_completion: "/messages",
                generation: None,
                models: "/models",
            },
            Provider::OpenRouter => Self {
                generation: Some("/generation"),
                ..Self::openai_style()
            },
            Provider::OpenAI | Provider::Local => Self::openai_style(),
        }
    }
}

/// Per-instance provider configuration.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider: Provider,
    pub base_url: String,
    pub auth: AuthConfig,
    pub extra_headers: Vec<(String, String)>,
    pub endpoints: Endpoints,
}

impl ProviderConfig {
    /// Defaults for a hosted provider with the given key.
    ///
    /// Fails for [`Provider::Local`], which has no default URL; use
    /// [`ProviderConfig::local`] instead.
    pub fn new(provider: Provider, api_key: impl Into<String>) -> Result<Self, Error> {
        let base_url = provider.default_base_url().ok_or_else(|| {
            Error::Api(format!("{provider} requires an explicit base URL"))
        })?;
        Ok(Self::build(provider, base_url.to_string(), api_key.into()))
    }

    /// An OpenAI-compatible server at `base_url`. An empty key sends no auth header.
    pub fn local(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::build(Provider::Local, base_url.into(), api_key.into())
    }

    /// Defaults for a provider, reading the key from its environment variables.
    pub fn from_env(provider: Provider) -> Result<Self, Error> {
        let api_key = match provider.api_key() {
            Some(key) => key,
            None if !provider.requires_api_key() => String::new(),
            None => {
                return Err(Error::MissingApiKey {
                    backend: provider.name().to_string(),
                    env_vars: provider.env_vars().iter().map(|s| s.to_string()).collect(),
                });
            }
        };
        Self::new(provider, api_key)
    }

    fn build(provider: Provider, base_url: String, api_key: String) -> Self {
        let (auth, extra_headers) = match provider {
            Provider::Anthropic => (
                AuthConfig::ApiKey {
                    header: "x-api-key".to_string(),
                    key: api_key,
                },
                vec![("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string())],
            ),
            _ => (AuthConfig::Bearer(api_key), Vec::new()),
        };

        Self {
            provider,
            base_url,
            auth,
            extra_headers,
            endpoints: Endpoints::for_provider(provider),
        }
    }

    /// Override the base URL (proxies, self-hosted gateways).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Add a header sent with every request.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }
}
