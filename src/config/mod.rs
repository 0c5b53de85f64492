use crate::download::{DEFAULT_GGUF_PREFERENCE, DEFAULT_HUB_URL, DownloadOptions};
use crate::provider::{Provider, ProviderConfig};
use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "llmio";
const CONFIG_FILE: &str = "config.toml";

/// Per-provider overrides from `[providers.<id>]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderOverride {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DownloadConfig {
    /// Root for downloaded models. Default: `<data dir>/llmio/models`.
    pub dest_dir: PathBuf,
    pub gguf_preference: Vec<String>,
    pub hub_url: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        let dest_dir = dirs::data_dir()
            .map(|d| d.join(APP_DIR).join("models"))
            .unwrap_or_else(|| PathBuf::from("models"));

        Self {
            dest_dir,
            gguf_preference: DEFAULT_GGUF_PREFERENCE.iter().map(|s| s.to_string()).collect(),
            hub_url: DEFAULT_HUB_URL.to_string(),
        }
    }
}

impl DownloadConfig {
    pub fn options(&self) -> DownloadOptions {
        DownloadOptions {
            dest_dir: self.dest_dir.clone(),
            gguf_preference: self.gguf_preference.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Provider used when none is given on the command line.
    pub provider: Option<String>,
    /// Model used when none is given on the command line.
    pub model: Option<String>,
    /// Keyed by provider id (`openai`, `anthropic`, `openrouter`, `local`).
    pub providers: HashMap<String, ProviderOverride>,
    pub download: DownloadConfig,
}

impl Config {
    /// `~/.config/llmio/config.toml` on Linux, platform equivalent elsewhere.
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join(APP_DIR).join(CONFIG_FILE))
            .unwrap_or_else(|| PathBuf::from(".llmio").join(CONFIG_FILE))
    }

    /// Load the user config, or defaults if the file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Resolve the provider: explicit choice, then config, then OpenRouter.
    pub fn resolve_provider(&self, explicit: Option<&str>) -> anyhow::Result<Provider> {
        let Some(id) = explicit.or(self.provider.as_deref()) else {
            return Ok(Provider::OpenRouter);
        };
        Provider::from_id(id).with_context(|| {
            let known: Vec<_> = Provider::ALL.iter().map(Provider::id).collect();
            format!("Unknown provider '{id}' (expected one of: {})", known.join(", "))
        })
    }

    /// API key from the environment, falling back to the config file.
    pub fn api_key_for(&self, provider: Provider) -> Option<String> {
        provider.api_key().or_else(|| {
            self.providers
                .get(provider.id())
                .and_then(|p| p.api_key.clone())
                .filter(|k| !k.is_empty())
        })
    }

    /// Build the client configuration for `provider`.
    pub fn provider_config(&self, provider: Provider) -> anyhow::Result<ProviderConfig> {
        let overrides = self.providers.get(provider.id());
        let base_url = overrides.and_then(|p| p.base_url.clone());
        let api_key = self.api_key_for(provider);

        if provider == Provider::Local {
            let Some(url) = base_url else {
                bail!(
                    "Local provider needs a base URL: set providers.local.base_url in {}",
                    Self::path().display()
                );
            };
            return Ok(ProviderConfig::local(url, api_key.unwrap_or_default()));
        }

        let Some(api_key) = api_key else {
            bail!(
                "Missing API key for {provider}. Set {} or providers.{}.api_key in {}",
                provider.env_vars().join(" or "),
                provider.id(),
                Self::path().display()
            );
        };

        let config = ProviderConfig::new(provider, api_key)?;
        Ok(match base_url {
            Some(url) => config.with_base_url(url),
            None => config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
provider = "openrouter"
model = "openai/gpt-4o-mini"

[providers.local]
base_url = "http://localhost:8080/v1"

[providers.anthropic]
api_key = "from-file"
base_url = "https://proxy.example/v1"

[download]
dest_dir = "/data/models"
gguf_preference = ["Q8_0"]
"#;

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("none.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.download.gguf_preference, vec!["Q4_K_M", "Q4_K_S"]);
        assert_eq!(config.download.hub_url, DEFAULT_HUB_URL);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.provider.as_deref(), Some("openrouter"));
        assert_eq!(config.model.as_deref(), Some("openai/gpt-4o-mini"));
        assert_eq!(config.download.dest_dir, PathBuf::from("/data/models"));
        assert_eq!(config.download.gguf_preference, vec!["Q8_0"]);
        assert_eq!(config.download.hub_url, DEFAULT_HUB_URL);
        assert_eq!(config.download.options().gguf_preference, vec!["Q8_0"]);
    }

    #[test]
    fn test_load_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"provider = [").unwrap();
        assert!(Config::load_from(file.path()).is_err());
    }

    #[test]
    fn test_resolve_provider() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.resolve_provider(None).unwrap(), Provider::OpenRouter);
        assert_eq!(
            config.resolve_provider(Some("anthropic")).unwrap(),
            Provider::Anthropic
        );
        assert!(config.resolve_provider(Some("groq")).is_err());
        assert_eq!(
            Config::default().resolve_provider(None).unwrap(),
            Provider::OpenRouter
        );
    }

    #[test]
    fn test_local_provider_config() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let local = config.provider_config(Provider::Local).unwrap();
        assert_eq!(local.base_url, "http://localhost:8080/v1");

        assert!(Config::default().provider_config(Provider::Local).is_err());
    }

    #[test]
    fn test_file_key_and_base_url_override() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        // Skip when the environment already supplies a key.
        if Provider::Anthropic.api_key().is_some() {
            return;
        }
        assert_eq!(config.api_key_for(Provider::Anthropic).as_deref(), Some("from-file"));
        let anthropic = config.provider_config(Provider::Anthropic).unwrap();
        assert_eq!(anthropic.base_url, "https://proxy.example/v1");
    }
}
